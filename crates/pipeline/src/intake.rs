//! Dead-letter intake: drains the global DLQ into the failed-message ledger.

use std::sync::Arc;
use std::time::Duration;

use broker::Broker;
use broker::envelope::{
    Delivery, X_ORIGINAL_EXCHANGE, X_ORIGINAL_QUEUE, X_ORIGINAL_ROUTING_KEY,
};
use broker::topology::GLOBAL_DLQ;
use store::{FailedMessageLedger, NewFailedMessage, UpsertOutcome};

use crate::error::Result;
use crate::fingerprint::fingerprint;

/// What one intake poll did with the delivery it pulled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// The ledger accepted the write.
    Recorded(UpsertOutcome),
    /// The ledger write failed; the delivery was acked and dropped.
    RecordFailed,
}

/// Intake tuning knobs.
#[derive(Debug, Clone)]
pub struct DeadLetterIntakeConfig {
    pub idle_sleep: Duration,
}

impl Default for DeadLetterIntakeConfig {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_secs(1),
        }
    }
}

/// Consumes `global.dlq` and upserts each delivery into the ledger keyed by
/// fingerprint.
///
/// The source message is acknowledged no matter what the ledger write did;
/// the dead-letter queue must never stall behind a broken database.
pub struct DeadLetterIntake {
    broker: Arc<dyn Broker>,
    ledger: Arc<dyn FailedMessageLedger>,
    config: DeadLetterIntakeConfig,
}

impl DeadLetterIntake {
    pub fn new(broker: Arc<dyn Broker>, ledger: Arc<dyn FailedMessageLedger>) -> Self {
        Self {
            broker,
            ledger,
            config: DeadLetterIntakeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DeadLetterIntakeConfig) -> Self {
        self.config = config;
        self
    }

    /// Pulls and records at most one dead letter. `None` means the queue
    /// was empty.
    pub async fn poll_once(&self) -> Result<Option<IntakeOutcome>> {
        let Some(delivery) = self.broker.get(GLOBAL_DLQ).await? else {
            return Ok(None);
        };

        let outcome = match self.record(&delivery).await {
            Ok(outcome) => IntakeOutcome::Recorded(outcome),
            Err(err) => {
                metrics::counter!("dead_letters_dropped_total").increment(1);
                tracing::error!(error = %err, "failed to record dead letter, acking anyway");
                IntakeOutcome::RecordFailed
            }
        };
        self.broker.ack(&delivery).await?;
        Ok(Some(outcome))
    }

    /// Runs until the task is cancelled.
    pub async fn run(&self) -> Result<()> {
        tracing::info!(queue = GLOBAL_DLQ, "dead-letter intake running");
        loop {
            if self.poll_once().await?.is_none() {
                tokio::time::sleep(self.config.idle_sleep).await;
            }
        }
    }

    async fn record(&self, delivery: &Delivery) -> Result<UpsertOutcome> {
        let queue_name = delivery.header_str(X_ORIGINAL_QUEUE).unwrap_or("unknown");
        let routing_key = delivery
            .header_str(X_ORIGINAL_ROUTING_KEY)
            .unwrap_or(&delivery.routing_key);
        let exchange_name = delivery
            .header_str(X_ORIGINAL_EXCHANGE)
            .unwrap_or(&delivery.exchange);
        let retry_count = delivery.retry_count();

        let message = NewFailedMessage {
            fingerprint: fingerprint(&delivery.body, queue_name, routing_key, retry_count),
            queue_name: queue_name.to_string(),
            exchange_name: exchange_name.to_string(),
            routing_key: routing_key.to_string(),
            retry_count,
            message_body: String::from_utf8_lossy(&delivery.body).into_owned(),
            message_data: delivery.decode_data(),
            headers: serde_json::to_value(&delivery.headers)?,
        };

        let outcome = self.ledger.upsert(message).await?;
        match outcome {
            UpsertOutcome::Inserted => {
                metrics::counter!("dead_letters_recorded_total").increment(1);
                tracing::warn!(queue = queue_name, retry_count, "dead letter recorded");
            }
            UpsertOutcome::Touched => {
                tracing::info!(queue = queue_name, "dead letter already recorded, touched");
            }
        }
        Ok(outcome)
    }
}
