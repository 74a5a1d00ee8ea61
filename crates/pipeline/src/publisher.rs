//! Maps domain events onto exchanges, routing keys, and message ids.
//!
//! This is the single place that knows where each event kind goes, used both
//! for direct best-effort publication and for building outbox rows inside
//! the order-creation transaction.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use broker::envelope::MessageEnvelope;
use broker::topology::{INVENTORY_EVENTS_EXCHANGE, ORDER_EVENTS_EXCHANGE, ORDER_TIMEOUT_EXCHANGE};
use broker::Broker;
use common::OrderId;
use domain::{InventoryDeduct, InventoryRollback, OrderCreated, OrderTimeout};
use store::NewOutboxMessage;

use crate::error::Result;

pub const ORDER_CREATED_RK: &str = "order.created";
pub const INVENTORY_DEDUCT_RK: &str = "inventory.deduct";
pub const INVENTORY_ROLLBACK_RK: &str = "inventory.rollback";
pub const ORDER_TIMEOUT_RK: &str = "order.timeout";

/// How long the relay holds back the durable copy of the timeout event, so
/// a relay restart does not fire timeouts early.
const TIMEOUT_OUTBOX_HOLDBACK: Duration = Duration::from_secs(60);

fn order_created_id(order_id: OrderId) -> String {
    format!("order_created_{order_id}")
}

fn order_timeout_id(order_id: OrderId) -> String {
    format!("order_timeout_{order_id}")
}

fn inventory_deduct_id(event: &InventoryDeduct) -> String {
    format!("inv_{}_{}", Uuid::new_v4().simple(), event.sku_id)
}

fn rollback_id(order_id: OrderId) -> String {
    format!("inventory_rollback_{}_{}", order_id, Uuid::new_v4().simple())
}

/// Publishes domain events directly to the broker.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn Broker>,
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub async fn publish_order_created(&self, event: &OrderCreated) -> Result<()> {
        let envelope =
            MessageEnvelope::json(event)?.with_message_id(order_created_id(event.order_id));
        self.broker
            .publish(ORDER_EVENTS_EXCHANGE, ORDER_CREATED_RK, envelope)
            .await?;
        metrics::counter!("events_published_total", "event" => "order_created").increment(1);
        Ok(())
    }

    pub async fn publish_inventory_deduct(&self, event: &InventoryDeduct) -> Result<()> {
        let envelope = MessageEnvelope::json(event)?.with_message_id(inventory_deduct_id(event));
        self.broker
            .publish(INVENTORY_EVENTS_EXCHANGE, INVENTORY_DEDUCT_RK, envelope)
            .await?;
        metrics::counter!("events_published_total", "event" => "inventory_deduct").increment(1);
        Ok(())
    }

    /// Publishes the timeout event with an `x-delay` header so the delayed
    /// exchange holds it until the payment window closes.
    pub async fn publish_order_timeout(&self, event: &OrderTimeout) -> Result<()> {
        let envelope = MessageEnvelope::json(event)?
            .with_message_id(order_timeout_id(event.order_id))
            .with_delay_ms(event.delay_seconds * 1_000);
        self.broker
            .publish(ORDER_TIMEOUT_EXCHANGE, ORDER_TIMEOUT_RK, envelope)
            .await?;
        metrics::counter!("events_published_total", "event" => "order_timeout").increment(1);
        Ok(())
    }

    pub async fn publish_inventory_rollback(&self, event: &InventoryRollback) -> Result<()> {
        let envelope = MessageEnvelope::json(event)?.with_message_id(rollback_id(event.order_id));
        self.broker
            .publish(INVENTORY_EVENTS_EXCHANGE, INVENTORY_ROLLBACK_RK, envelope)
            .await?;
        metrics::counter!("events_published_total", "event" => "inventory_rollback").increment(1);
        Ok(())
    }
}

/// Builds the outbox rows for one created order: the creation event, one
/// deduct per item, and the delayed timeout event.
pub fn outbox_rows_for_order(
    order_id: OrderId,
    items: &[(common::SkuId, u32)],
    timeout_delay: Duration,
) -> Result<Vec<NewOutboxMessage>> {
    let mut rows = Vec::with_capacity(items.len() + 2);

    let created = OrderCreated::new(order_id);
    rows.push(NewOutboxMessage::new(
        order_created_id(order_id),
        ORDER_EVENTS_EXCHANGE,
        ORDER_CREATED_RK,
        serde_json::to_string(&created)?,
    ));

    for &(sku_id, quantity) in items {
        let deduct = InventoryDeduct::new(order_id, sku_id, quantity);
        rows.push(NewOutboxMessage::new(
            inventory_deduct_id(&deduct),
            INVENTORY_EVENTS_EXCHANGE,
            INVENTORY_DEDUCT_RK,
            serde_json::to_string(&deduct)?,
        ));
    }

    let timeout = OrderTimeout::new(order_id, timeout_delay.as_secs());
    rows.push(
        NewOutboxMessage::new(
            order_timeout_id(order_id),
            ORDER_TIMEOUT_EXCHANGE,
            ORDER_TIMEOUT_RK,
            serde_json::to_string(&timeout)?,
        )
        .delayed(TIMEOUT_OUTBOX_HOLDBACK),
    );

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SkuId;

    #[test]
    fn test_outbox_rows_cover_every_event_kind() {
        let rows = outbox_rows_for_order(
            OrderId::new(9),
            &[(SkuId::new(1), 2), (SkuId::new(2), 1)],
            Duration::from_secs(1800),
        )
        .unwrap();

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].message_id, "order_created_9");
        assert_eq!(rows[0].exchange, ORDER_EVENTS_EXCHANGE);
        assert!(rows[1].message_id.starts_with("inv_"));
        assert!(rows[1].message_id.ends_with("_1"));
        assert_eq!(rows[2].routing_key, INVENTORY_DEDUCT_RK);
        assert_eq!(rows[3].message_id, "order_timeout_9");
        assert!(rows[3].next_retry_time > rows[0].next_retry_time);

        let timeout: serde_json::Value = serde_json::from_str(&rows[3].body).unwrap();
        assert_eq!(timeout["delay_seconds"], 1800);
    }
}
