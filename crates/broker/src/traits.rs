//! The broker seam every transport implements.

use async_trait::async_trait;

use crate::envelope::{Delivery, MessageEnvelope};
use crate::error::Result;

/// Exchange flavors used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Standard topic exchange.
    Topic,
    /// Delayed-message exchange (plugin type, base type topic). Honors the
    /// `x-delay` header.
    DelayedMessage,
}

/// A durable exchange to declare.
#[derive(Debug, Clone)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
}

impl ExchangeSpec {
    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::Topic,
        }
    }

    pub fn delayed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeKind::DelayedMessage,
        }
    }
}

/// Declaration arguments for a durable queue.
#[derive(Debug, Clone, Default)]
pub struct QueueArgs {
    /// Per-message TTL; expired messages are routed to the dead-letter pair.
    pub message_ttl_ms: Option<u64>,
    /// Exchange that receives expired/rejected messages.
    pub dead_letter_exchange: Option<String>,
    /// Routing key used when dead-lettering.
    pub dead_letter_routing_key: Option<String>,
}

/// Transport-agnostic broker operations.
///
/// Consumption is pull-based (`get` + `ack`): one in-flight message per
/// caller loop, which keeps message handling strictly sequential per
/// connection. Implementations must be `Send + Sync`; a single instance may
/// be shared across tasks.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declares a durable exchange. Idempotent.
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<()>;

    /// Declares a durable queue with the given arguments. Idempotent as long
    /// as the arguments match the existing declaration.
    async fn declare_queue(&self, name: &str, args: &QueueArgs) -> Result<()>;

    /// Binds a queue to an exchange under a routing-key pattern.
    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Deletes a queue, discarding its messages.
    async fn delete_queue(&self, name: &str) -> Result<()>;

    /// Deletes an exchange.
    async fn delete_exchange(&self, name: &str) -> Result<()>;

    /// Publishes a persistent JSON message to an exchange.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: MessageEnvelope,
    ) -> Result<()>;

    /// Pulls the next message from a queue, or `None` when the queue is
    /// empty. The message stays unacknowledged until [`Broker::ack`].
    async fn get(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Acknowledges a delivery. Every pulled message must be acknowledged
    /// exactly once.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;
}
