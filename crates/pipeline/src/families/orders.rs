//! Order-side consumers: creation confirmation and timeout cancellation.

use async_trait::async_trait;

use broker::topology::{ORDER_CREATED, ORDER_TIMEOUT, QueueSpec};
use common::OrderId;

use crate::consumer::QueueFamily;
use crate::error::Result;
use crate::orchestrator::OrderOrchestrator;

fn order_id_from(data: &serde_json::Value) -> Option<OrderId> {
    data.get("order_id")
        .and_then(|v| v.as_i64())
        .filter(|id| *id > 0)
        .map(OrderId::new)
}

/// Consumes `order_created` and `order_timeout`.
pub struct OrderEventsFamily {
    orchestrator: OrderOrchestrator,
}

impl OrderEventsFamily {
    pub fn new(orchestrator: OrderOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Creation confirmation is a side-effect-free acknowledgement point;
    /// downstream systems hang off this hook.
    async fn handle_created(&self, data: serde_json::Value) -> Result<bool> {
        let Some(order_id) = order_id_from(&data) else {
            tracing::warn!("order_created event without order_id");
            return Ok(false);
        };
        metrics::counter!("order_created_confirmed_total").increment(1);
        tracing::info!(%order_id, "order creation confirmed");
        Ok(true)
    }

    /// The payment window closed. Cancelling an order that was paid (or
    /// already cancelled) in the meantime is a no-op, so redelivered timeout
    /// events are harmless.
    async fn handle_timeout(&self, data: serde_json::Value) -> Result<bool> {
        let Some(order_id) = order_id_from(&data) else {
            tracing::warn!("order_timeout event without order_id");
            return Ok(false);
        };
        let cancelled = self
            .orchestrator
            .cancel_order(order_id, "payment timeout")
            .await?;
        if cancelled {
            tracing::info!(%order_id, "order cancelled on timeout");
        }
        Ok(true)
    }
}

#[async_trait]
impl QueueFamily for OrderEventsFamily {
    fn describe(&self) -> &'static str {
        "order-events"
    }

    fn queues(&self) -> Vec<QueueSpec> {
        vec![ORDER_CREATED, ORDER_TIMEOUT]
    }

    async fn handle(&self, data: serde_json::Value, queue: &QueueSpec) -> Result<bool> {
        match queue.name {
            "order_created" => self.handle_created(data).await,
            "order_timeout" => self.handle_timeout(data).await,
            other => {
                tracing::error!(queue = other, "no handler registered for queue");
                Ok(false)
            }
        }
    }
}
