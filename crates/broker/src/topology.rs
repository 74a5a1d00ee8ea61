//! Queue topology catalog and declaration.
//!
//! Every logical queue gets three physical queues:
//!
//! ```text
//! <queue>         business queue, dead-letters back to its own exchange
//! <queue>.retry   TTL queue; expiry dead-letters into the business queue
//! <queue>.dlx     per-queue dead-letter queue on the shared dlx.exchange
//! ```
//!
//! plus one shared `global.dlq` bound to `dlx.exchange` with `#`. The retry
//! queue is how delayed redelivery works: consumers publish failures there
//! and the TTL routes them back without any consumer-side timers.

use crate::error::Result;
use crate::traits::{Broker, ExchangeKind, ExchangeSpec, QueueArgs};

pub const ORDER_EVENTS_EXCHANGE: &str = "order.events.exchange";
pub const INVENTORY_EVENTS_EXCHANGE: &str = "inventory.events.exchange";
pub const ORDER_TIMEOUT_EXCHANGE: &str = "order.timeout.exchange";
pub const DLX_EXCHANGE: &str = "dlx.exchange";
pub const MAIN_EXCHANGE: &str = "main.exchange";

/// The shared dead-letter queue feeding the failed-message ledger.
pub const GLOBAL_DLQ: &str = "global.dlq";

/// One logical queue: its exchange, binding, retry TTL, and retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: &'static str,
    pub exchange: &'static str,
    pub exchange_kind: ExchangeKind,
    pub routing_key: &'static str,
    pub retry_ttl_ms: u64,
    pub max_retries: u32,
}

impl QueueSpec {
    /// Name of the companion retry queue.
    pub fn retry_queue(&self) -> String {
        format!("{}.retry", self.name)
    }

    /// Name of the companion dead-letter queue.
    pub fn dlx_queue(&self) -> String {
        format!("{}.dlx", self.name)
    }

    /// Exchange spec for the business exchange.
    pub fn exchange_spec(&self) -> ExchangeSpec {
        ExchangeSpec {
            name: self.exchange.to_string(),
            kind: self.exchange_kind,
        }
    }
}

pub const ORDER_CREATED: QueueSpec = QueueSpec {
    name: "order_created",
    exchange: ORDER_EVENTS_EXCHANGE,
    exchange_kind: ExchangeKind::Topic,
    routing_key: "order.created",
    retry_ttl_ms: 5_000,
    max_retries: 3,
};

pub const INVENTORY_DEDUCT: QueueSpec = QueueSpec {
    name: "inventory_deduct",
    exchange: INVENTORY_EVENTS_EXCHANGE,
    exchange_kind: ExchangeKind::Topic,
    routing_key: "inventory.deduct",
    retry_ttl_ms: 10_000,
    max_retries: 5,
};

pub const INVENTORY_ROLLBACK: QueueSpec = QueueSpec {
    name: "inventory_rollback",
    exchange: INVENTORY_EVENTS_EXCHANGE,
    exchange_kind: ExchangeKind::Topic,
    routing_key: "inventory.rollback",
    retry_ttl_ms: 8_000,
    max_retries: 3,
};

pub const ORDER_TIMEOUT: QueueSpec = QueueSpec {
    name: "order_timeout",
    exchange: ORDER_TIMEOUT_EXCHANGE,
    exchange_kind: ExchangeKind::DelayedMessage,
    routing_key: "order.timeout",
    retry_ttl_ms: 15_000,
    max_retries: 2,
};

/// Every business queue in the topology.
pub fn all_queues() -> [QueueSpec; 4] {
    [ORDER_CREATED, INVENTORY_DEDUCT, INVENTORY_ROLLBACK, ORDER_TIMEOUT]
}

/// Declares one queue trio (business, retry, dlx) and its bindings.
///
/// The business queue dead-letters back to its own exchange/routing-key so
/// that messages expiring in the retry queue land back on it.
pub async fn declare_queue_trio(broker: &dyn Broker, spec: &QueueSpec) -> Result<()> {
    let business_args = QueueArgs {
        message_ttl_ms: None,
        dead_letter_exchange: Some(spec.exchange.to_string()),
        dead_letter_routing_key: Some(spec.routing_key.to_string()),
    };
    broker.declare_queue(spec.name, &business_args).await?;
    broker
        .bind_queue(spec.name, spec.exchange, spec.routing_key)
        .await?;

    let retry_queue = spec.retry_queue();
    let retry_args = QueueArgs {
        message_ttl_ms: Some(spec.retry_ttl_ms),
        dead_letter_exchange: Some(spec.exchange.to_string()),
        dead_letter_routing_key: Some(spec.routing_key.to_string()),
    };
    broker.declare_queue(&retry_queue, &retry_args).await?;
    broker
        .bind_queue(&retry_queue, spec.exchange, &retry_queue)
        .await?;

    let dlx_queue = spec.dlx_queue();
    broker.declare_queue(&dlx_queue, &QueueArgs::default()).await?;
    broker.bind_queue(&dlx_queue, DLX_EXCHANGE, &dlx_queue).await?;

    tracing::info!(
        queue = spec.name,
        retry = %retry_queue,
        dlx = %dlx_queue,
        "declared queue trio"
    );
    Ok(())
}

/// Declares the exchanges and queue trios one consumer family needs.
///
/// Declaration failure must be treated as fatal by callers: consuming
/// against a misconfigured topology silently strands messages.
pub async fn declare_family(broker: &dyn Broker, queues: &[QueueSpec]) -> Result<()> {
    broker
        .declare_exchange(&ExchangeSpec::topic(DLX_EXCHANGE))
        .await?;
    for spec in queues {
        broker.declare_exchange(&spec.exchange_spec()).await?;
        declare_queue_trio(broker, spec).await?;
    }
    Ok(())
}

/// Declares or repairs the whole topology. Idempotent.
///
/// With `force`, existing queues and exchanges are deleted first. This
/// discards any queued messages.
pub async fn declare_all(broker: &dyn Broker, force: bool) -> Result<()> {
    if force {
        tracing::warn!("force-recreating broker topology; queued messages will be lost");
        for spec in all_queues() {
            broker.delete_queue(spec.name).await?;
            broker.delete_queue(&spec.retry_queue()).await?;
            broker.delete_queue(&spec.dlx_queue()).await?;
        }
        broker.delete_queue(GLOBAL_DLQ).await?;
        for exchange in [
            ORDER_EVENTS_EXCHANGE,
            INVENTORY_EVENTS_EXCHANGE,
            ORDER_TIMEOUT_EXCHANGE,
            DLX_EXCHANGE,
            MAIN_EXCHANGE,
        ] {
            broker.delete_exchange(exchange).await?;
        }
    }

    broker
        .declare_exchange(&ExchangeSpec::topic(MAIN_EXCHANGE))
        .await?;
    declare_family(broker, &all_queues()).await?;

    broker.declare_queue(GLOBAL_DLQ, &QueueArgs::default()).await?;
    broker.bind_queue(GLOBAL_DLQ, DLX_EXCHANGE, "#").await?;

    tracing::info!("broker topology declared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_names() {
        assert_eq!(ORDER_CREATED.retry_queue(), "order_created.retry");
        assert_eq!(ORDER_CREATED.dlx_queue(), "order_created.dlx");
    }

    #[test]
    fn test_budgets_match_queue_config() {
        assert_eq!(ORDER_CREATED.max_retries, 3);
        assert_eq!(INVENTORY_DEDUCT.max_retries, 5);
        assert_eq!(ORDER_TIMEOUT.max_retries, 2);
        assert_eq!(INVENTORY_ROLLBACK.max_retries, 3);
    }

    #[test]
    fn test_timeout_exchange_is_delayed() {
        assert_eq!(ORDER_TIMEOUT.exchange_kind, ExchangeKind::DelayedMessage);
        assert_eq!(ORDER_TIMEOUT.exchange, ORDER_TIMEOUT_EXCHANGE);
    }
}
