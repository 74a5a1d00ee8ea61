//! Replays ledgered dead letters back into the pipeline.

use std::sync::Arc;

use broker::Broker;
use broker::envelope::{MessageEnvelope, X_ORIGIN_DLX, X_REQUEUED};
use store::FailedMessageLedger;

use crate::error::Result;

/// What a replay pass accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub replayed: usize,
    pub failed: usize,
}

/// Republishes ledger rows to their recorded exchange and routing key.
pub struct Replayer {
    broker: Arc<dyn Broker>,
    ledger: Arc<dyn FailedMessageLedger>,
}

impl Replayer {
    pub fn new(broker: Arc<dyn Broker>, ledger: Arc<dyn FailedMessageLedger>) -> Self {
        Self { broker, ledger }
    }

    /// Replays one row by id, or every pending row when `id` is `None`.
    ///
    /// Each successful publish deletes its ledger row. The replayed copy
    /// starts with a fresh retry budget and carries marker headers so
    /// downstream handlers can recognize requeued traffic.
    pub async fn replay(&self, id: Option<i64>) -> Result<ReplaySummary> {
        let rows = self.ledger.list(id).await?;
        let mut summary = ReplaySummary::default();

        for row in rows {
            let envelope = MessageEnvelope::raw(row.message_body.clone().into_bytes())
                .with_retry_count(0)
                .with_header(X_REQUEUED, serde_json::Value::Bool(true))
                .with_header(
                    X_ORIGIN_DLX,
                    serde_json::Value::from(format!("{}.dlx", row.queue_name)),
                );

            match self
                .broker
                .publish(&row.exchange_name, &row.routing_key, envelope)
                .await
            {
                Ok(()) => {
                    self.ledger.delete(row.id).await?;
                    summary.replayed += 1;
                    metrics::counter!("dead_letters_replayed_total").increment(1);
                    tracing::info!(
                        id = row.id,
                        queue = %row.queue_name,
                        exchange = %row.exchange_name,
                        "dead letter replayed"
                    );
                }
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(id = row.id, error = %err, "replay publish failed, row kept");
                }
            }
        }

        tracing::info!(
            replayed = summary.replayed,
            failed = summary.failed,
            "replay pass finished"
        );
        Ok(summary)
    }
}
