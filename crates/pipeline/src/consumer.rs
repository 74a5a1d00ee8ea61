//! Generic consumer runtime with retry-queue and dead-letter routing.
//!
//! Every pulled message is acknowledged exactly once no matter what the
//! handler does. Failure handling happens by publishing new messages: a copy
//! to the retry queue while the budget lasts, then a copy to the per-queue
//! dead-letter queue. Negative acknowledgement is never used, so a broken
//! handler can never wedge a queue in a redelivery loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use broker::envelope::{
    Delivery, MessageEnvelope, X_ORIGINAL_EXCHANGE, X_ORIGINAL_QUEUE, X_ORIGINAL_ROUTING_KEY,
};
use broker::topology::{DLX_EXCHANGE, QueueSpec, declare_family};
use broker::Broker;

use crate::error::Result;

/// Terminal state of one processed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Handler succeeded.
    Acked,
    /// Handler failed with budget left; a copy is in the retry queue.
    RetryScheduled,
    /// Budget exhausted; a copy is in the per-queue dead-letter queue.
    DeadLettered,
}

/// One consumer family: the queues it owns and the handler for them.
#[async_trait]
pub trait QueueFamily: Send + Sync {
    /// Human-readable family name for logs.
    fn describe(&self) -> &'static str;

    /// The business queues this family consumes.
    fn queues(&self) -> Vec<QueueSpec>;

    /// Processes one decoded message. `Ok(false)` and `Err(_)` both count as
    /// failure and are routed through the retry/dead-letter policy.
    async fn handle(&self, data: serde_json::Value, queue: &QueueSpec) -> Result<bool>;
}

/// Runtime tuning knobs.
#[derive(Debug, Clone)]
pub struct ConsumerRuntimeConfig {
    /// Sleep between polls when every queue came up empty.
    pub idle_sleep: Duration,
}

impl Default for ConsumerRuntimeConfig {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_secs(1),
        }
    }
}

/// Drives one [`QueueFamily`] against the broker.
///
/// Consumption is pull-based and strictly sequential: one in-flight message
/// at a time per runtime, so a family's handler never races itself on the
/// same connection.
pub struct ConsumerRuntime {
    broker: Arc<dyn Broker>,
    family: Arc<dyn QueueFamily>,
    config: ConsumerRuntimeConfig,
}

impl ConsumerRuntime {
    pub fn new(broker: Arc<dyn Broker>, family: Arc<dyn QueueFamily>) -> Self {
        Self {
            broker,
            family,
            config: ConsumerRuntimeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ConsumerRuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Declares this family's topology. Must succeed before [`run`] is
    /// called; consuming against a misconfigured topology strands messages.
    ///
    /// [`run`]: ConsumerRuntime::run
    pub async fn declare_topology(&self) -> Result<()> {
        declare_family(self.broker.as_ref(), &self.family.queues()).await?;
        Ok(())
    }

    /// Consumes until the task is cancelled, sleeping briefly whenever every
    /// queue is empty.
    pub async fn run(&self) -> Result<()> {
        tracing::info!(family = self.family.describe(), "consumer running");
        loop {
            let mut handled = false;
            for spec in self.family.queues() {
                while let Some(outcome) = self.poll_once(&spec).await? {
                    handled = true;
                    tracing::debug!(queue = spec.name, ?outcome, "message processed");
                }
            }
            if !handled {
                tokio::time::sleep(self.config.idle_sleep).await;
            }
        }
    }

    /// Pulls and processes at most one message from one queue. `None` means
    /// the queue was empty.
    pub async fn poll_once(&self, spec: &QueueSpec) -> Result<Option<ProcessOutcome>> {
        let Some(delivery) = self.broker.get(spec.name).await? else {
            return Ok(None);
        };
        Ok(Some(self.process(spec, delivery).await?))
    }

    async fn process(&self, spec: &QueueSpec, delivery: Delivery) -> Result<ProcessOutcome> {
        let retry_count = delivery.retry_count();
        let data = delivery.decode_data();

        let succeeded = match self.family.handle(data, spec).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(queue = spec.name, retry_count, error = %err, "handler error");
                false
            }
        };

        let outcome = if succeeded {
            metrics::counter!("messages_processed_total", "queue" => spec.name).increment(1);
            ProcessOutcome::Acked
        } else if retry_count < spec.max_retries {
            self.schedule_retry(spec, &delivery, retry_count).await;
            ProcessOutcome::RetryScheduled
        } else {
            self.dead_letter(spec, &delivery, retry_count).await;
            ProcessOutcome::DeadLettered
        };

        // The original is acknowledged no matter what happened above; the
        // retry and dead-letter copies are already published (or their
        // failure logged) by now.
        self.broker.ack(&delivery).await?;
        Ok(outcome)
    }

    /// Publishes a copy to the retry queue with a bumped retry counter. The
    /// retry queue's TTL dead-letters it back onto the business queue, which
    /// is what turns a fixed TTL into delayed redelivery.
    async fn schedule_retry(&self, spec: &QueueSpec, delivery: &Delivery, retry_count: u32) {
        let envelope =
            MessageEnvelope::raw(delivery.body.clone()).with_retry_count(retry_count + 1);
        if let Err(err) = self
            .broker
            .publish(spec.exchange, &spec.retry_queue(), envelope)
            .await
        {
            tracing::error!(queue = spec.name, error = %err, "retry publish failed, message lost");
        } else {
            metrics::counter!("messages_retried_total", "queue" => spec.name).increment(1);
            tracing::info!(
                queue = spec.name,
                retry = retry_count + 1,
                budget = spec.max_retries,
                "retry scheduled"
            );
        }
    }

    /// Publishes a copy to the per-queue dead-letter queue, carrying the
    /// origin coordinates the intake service needs for fingerprinting and
    /// the replay tool needs for republishing.
    async fn dead_letter(&self, spec: &QueueSpec, delivery: &Delivery, retry_count: u32) {
        let envelope = MessageEnvelope::raw(delivery.body.clone())
            .with_retry_count(retry_count)
            .with_header(X_ORIGINAL_QUEUE, spec.name.into())
            .with_header(X_ORIGINAL_EXCHANGE, spec.exchange.into())
            .with_header(X_ORIGINAL_ROUTING_KEY, spec.routing_key.into());
        if let Err(err) = self
            .broker
            .publish(DLX_EXCHANGE, &spec.dlx_queue(), envelope)
            .await
        {
            tracing::error!(queue = spec.name, error = %err, "dead-letter publish failed, message lost");
        } else {
            metrics::counter!("messages_dead_lettered_total", "queue" => spec.name).increment(1);
            tracing::warn!(queue = spec.name, retry_count, "retry budget exhausted, dead-lettered");
        }
    }
}
