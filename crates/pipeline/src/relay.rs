//! Outbox relay: drains due outbox rows to the broker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use broker::Broker;
use broker::envelope::MessageEnvelope;
use store::{OutboxRecord, OutboxStore};

use crate::error::Result;

/// Delay before the next attempt, in seconds, indexed by how many attempts
/// have already failed. Clamped to the last rung beyond the ladder.
const BACKOFF_LADDER_SECS: [u64; 5] = [10, 30, 60, 300, 600];

/// Backoff delay after `try_count` failed attempts.
pub fn backoff_delay(try_count: u32) -> Duration {
    let secs = BACKOFF_LADDER_SECS
        .get(try_count as usize)
        .copied()
        .unwrap_or(600);
    Duration::from_secs(secs)
}

/// Delayed-exchange rows carry their delay in the payload. The header must
/// be rebuilt on every publish or the exchange routes them immediately.
fn delay_seconds(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("delay_seconds")?
        .as_u64()
}

/// Relay tuning knobs.
#[derive(Debug, Clone)]
pub struct OutboxRelayConfig {
    /// Rows claimed per poll.
    pub batch_size: usize,
    /// Sleep when a poll comes back under-full.
    pub idle_sleep: Duration,
    /// How long a claimed row stays invisible to other relays.
    pub claim_lease: Duration,
}

impl Default for OutboxRelayConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            idle_sleep: Duration::from_secs(1),
            claim_lease: Duration::from_secs(60),
        }
    }
}

/// Polls the outbox and republishes due rows.
///
/// Safe to run as multiple concurrent workers: rows are claimed (their due
/// time pushed forward by a lease) before any publish, so two relays never
/// hold the same row at once. A relay that dies mid-batch leaves its rows
/// to come due again when the lease expires, preserving at-least-once.
#[derive(Clone)]
pub struct OutboxRelay {
    outbox: Arc<dyn OutboxStore>,
    broker: Arc<dyn Broker>,
    config: OutboxRelayConfig,
}

impl OutboxRelay {
    pub fn new(outbox: Arc<dyn OutboxStore>, broker: Arc<dyn Broker>) -> Self {
        Self {
            outbox,
            broker,
            config: OutboxRelayConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OutboxRelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Claims and publishes one batch. Returns how many rows were claimed.
    pub async fn drain_once(&self) -> Result<usize> {
        let rows = self
            .outbox
            .claim_due(Utc::now(), self.config.batch_size, self.config.claim_lease)
            .await?;
        let claimed = rows.len();

        for row in rows {
            self.deliver(row).await?;
        }
        Ok(claimed)
    }

    /// Runs until the task is cancelled.
    pub async fn run(&self) -> Result<()> {
        tracing::info!(batch = self.config.batch_size, "outbox relay running");
        loop {
            let drained = match self.drain_once().await {
                Ok(drained) => drained,
                Err(err) => {
                    tracing::error!(error = %err, "outbox poll failed");
                    0
                }
            };
            if drained < self.config.batch_size {
                tokio::time::sleep(self.config.idle_sleep).await;
            }
        }
    }

    async fn deliver(&self, row: OutboxRecord) -> Result<()> {
        let mut envelope =
            MessageEnvelope::raw(row.body.clone().into_bytes()).with_message_id(row.message_id.clone());
        if let Some(delay) = delay_seconds(&row.body) {
            envelope = envelope.with_delay_ms(delay * 1_000);
        }

        match self
            .broker
            .publish(&row.exchange, &row.routing_key, envelope)
            .await
        {
            Ok(()) => {
                self.outbox.mark_delivered(row.id).await?;
                metrics::counter!("outbox_delivered_total").increment(1);
                tracing::debug!(id = row.id, message_id = %row.message_id, "outbox row delivered");
            }
            Err(err) => {
                let next_try = row.try_count + 1;
                let due = Utc::now()
                    + chrono::Duration::from_std(backoff_delay(row.try_count))
                        .unwrap_or(chrono::Duration::zero());
                self.outbox.reschedule(row.id, next_try, due).await?;
                metrics::counter!("outbox_retries_total").increment(1);
                tracing::warn!(
                    id = row.id,
                    message_id = %row.message_id,
                    try_count = next_try,
                    error = %err,
                    "outbox publish failed, rescheduled"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_derived_from_payload() {
        assert_eq!(
            delay_seconds(r#"{"order_id":1,"delay_seconds":1800}"#),
            Some(1800)
        );
        assert_eq!(delay_seconds(r#"{"order_id":1}"#), None);
        assert_eq!(delay_seconds("not json"), None);
    }

    #[test]
    fn test_backoff_ladder_and_clamp() {
        assert_eq!(backoff_delay(0), Duration::from_secs(10));
        assert_eq!(backoff_delay(1), Duration::from_secs(30));
        assert_eq!(backoff_delay(2), Duration::from_secs(60));
        assert_eq!(backoff_delay(3), Duration::from_secs(300));
        assert_eq!(backoff_delay(4), Duration::from_secs(600));
        assert_eq!(backoff_delay(5), Duration::from_secs(600));
        assert_eq!(backoff_delay(50), Duration::from_secs(600));
    }
}
