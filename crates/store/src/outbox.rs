//! Local outbox rows and the store trait behind the relay.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Delivery state of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    /// Not yet delivered to the broker.
    Pending,
    /// Confirmed delivered; kept for audit.
    Delivered,
    /// At least one delivery attempt failed; due again at `next_retry_time`.
    FailedRetrying,
}

impl OutboxStatus {
    pub fn as_i16(self) -> i16 {
        match self {
            OutboxStatus::Pending => 0,
            OutboxStatus::Delivered => 1,
            OutboxStatus::FailedRetrying => 2,
        }
    }

    pub fn from_i16(code: i16) -> Option<Self> {
        match code {
            0 => Some(OutboxStatus::Pending),
            1 => Some(OutboxStatus::Delivered),
            2 => Some(OutboxStatus::FailedRetrying),
            _ => None,
        }
    }
}

/// An outbox row to be inserted inside a business transaction.
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    pub message_id: String,
    pub exchange: String,
    pub routing_key: String,
    pub body: String,
    pub next_retry_time: DateTime<Utc>,
}

impl NewOutboxMessage {
    /// A row due immediately.
    pub fn new(
        message_id: impl Into<String>,
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            body: body.into(),
            next_retry_time: Utc::now(),
        }
    }

    /// A row the relay should not pick up before `deliver_after` has elapsed.
    pub fn delayed(mut self, deliver_after: Duration) -> Self {
        self.next_retry_time = Utc::now()
            + chrono::Duration::from_std(deliver_after).unwrap_or(chrono::Duration::zero());
        self
    }
}

/// A persisted outbox row as seen by the relay.
#[derive(Debug, Clone)]
pub struct OutboxRecord {
    pub id: i64,
    pub message_id: String,
    pub exchange: String,
    pub routing_key: String,
    pub body: String,
    pub status: OutboxStatus,
    pub try_count: u32,
    pub next_retry_time: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence seam for the outbox relay.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Claims up to `batch` undelivered rows that are due at `now`, pushing
    /// their `next_retry_time` forward by `lease` so a concurrent relay will
    /// not pick up the same rows. A crashed relay simply leaves its claimed
    /// rows to come due again after the lease expires.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        batch: usize,
        lease: Duration,
    ) -> Result<Vec<OutboxRecord>>;

    /// Marks a row as delivered.
    async fn mark_delivered(&self, id: i64) -> Result<()>;

    /// Records a failed attempt: bumps the try count and sets the next due
    /// time computed from the backoff ladder.
    async fn reschedule(&self, id: i64, try_count: u32, next_retry_time: DateTime<Utc>)
        -> Result<()>;

    /// Number of rows not yet delivered, for observability.
    async fn undelivered_count(&self) -> Result<u64>;
}
