//! Failed-message ledger: durable records of dead-lettered deliveries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Ledger row state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStatus {
    /// Recorded, awaiting operator action.
    Pending,
    /// Republished back into the pipeline.
    Requeued,
}

impl LedgerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerStatus::Pending => "pending",
            LedgerStatus::Requeued => "requeued",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(LedgerStatus::Pending),
            "requeued" => Some(LedgerStatus::Requeued),
            _ => None,
        }
    }
}

/// Result of recording a dead-lettered delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First sighting of this fingerprint.
    Inserted,
    /// Fingerprint already recorded; only `updated_at` was refreshed.
    Touched,
}

/// A dead-lettered delivery to record.
#[derive(Debug, Clone)]
pub struct NewFailedMessage {
    pub fingerprint: String,
    pub queue_name: String,
    pub exchange_name: String,
    pub routing_key: String,
    pub retry_count: u32,
    pub message_body: String,
    pub message_data: serde_json::Value,
    pub headers: serde_json::Value,
}

/// A persisted ledger row.
#[derive(Debug, Clone)]
pub struct FailedMessageRecord {
    pub id: i64,
    pub fingerprint: String,
    pub queue_name: String,
    pub exchange_name: String,
    pub routing_key: String,
    pub retry_count: u32,
    pub message_body: String,
    pub message_data: serde_json::Value,
    pub headers: serde_json::Value,
    pub status: LedgerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistence seam for the dead-letter intake and the replay tool.
#[async_trait]
pub trait FailedMessageLedger: Send + Sync {
    /// Records a dead-lettered delivery, deduplicating on fingerprint.
    async fn upsert(&self, message: NewFailedMessage) -> Result<UpsertOutcome>;

    /// Pending rows, oldest first. With `id` set, at most that single row.
    async fn list(&self, id: Option<i64>) -> Result<Vec<FailedMessageRecord>>;

    /// Removes a row after a successful replay.
    async fn delete(&self, id: i64) -> Result<()>;
}
