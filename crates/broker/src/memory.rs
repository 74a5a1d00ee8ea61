//! In-memory broker for tests.
//!
//! Models the routing behavior the pipeline depends on: topic bindings,
//! per-queue dead-letter arguments, retry-queue TTL expiry, and the delayed
//! exchange. Time-driven behavior (TTL expiry, delay release) is advanced
//! explicitly by the test via [`InMemoryBroker::expire_retry_queues`] and
//! [`InMemoryBroker::release_delayed`] so tests stay deterministic.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::envelope::{Delivery, MessageEnvelope};
use crate::error::{BrokerError, Result};
use crate::traits::{Broker, ExchangeKind, ExchangeSpec, QueueArgs};

#[derive(Debug, Clone)]
struct StoredMessage {
    exchange: String,
    routing_key: String,
    body: Vec<u8>,
    headers: std::collections::BTreeMap<String, serde_json::Value>,
}

#[derive(Debug)]
struct QueueState {
    args: QueueArgs,
    messages: VecDeque<StoredMessage>,
}

#[derive(Debug, Clone)]
struct Binding {
    queue: String,
    exchange: String,
    pattern: String,
}

#[derive(Debug, Default)]
struct BrokerState {
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, QueueState>,
    bindings: Vec<Binding>,
    delayed: Vec<StoredMessage>,
    fail_publishes: bool,
    published: u64,
    acked: u64,
    next_tag: u64,
}

/// In-memory [`Broker`] implementation for tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

/// Matches an AMQP topic pattern (`*` one word, `#` zero or more words).
fn topic_match(pattern: &str, key: &str) -> bool {
    fn matches(pat: &[&str], key: &[&str]) -> bool {
        match (pat.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pat[1..], key) || (!key.is_empty() && matches(pat, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pat[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pat[1..], &key[1..]),
            _ => false,
        }
    }
    let pat: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pat, &key)
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent publish fail, for failure-path tests.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.state.lock().unwrap().fail_publishes = fail;
    }

    /// Number of messages currently sitting in a queue.
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    /// Total acknowledged deliveries.
    pub fn acked_count(&self) -> u64 {
        self.state.lock().unwrap().acked
    }

    /// Total successful publishes.
    pub fn published_count(&self) -> u64 {
        self.state.lock().unwrap().published
    }

    /// Returns true when the queue has been declared.
    pub fn has_queue(&self, queue: &str) -> bool {
        self.state.lock().unwrap().queues.contains_key(queue)
    }

    /// Expires every message in every TTL queue, routing each through the
    /// queue's dead-letter arguments. This is the retry-queue redelivery
    /// path, advanced manually instead of by the clock.
    pub fn expire_retry_queues(&self) {
        let mut state = self.state.lock().unwrap();
        let ttl_queues: Vec<String> = state
            .queues
            .iter()
            .filter(|(_, q)| q.args.message_ttl_ms.is_some())
            .map(|(name, _)| name.clone())
            .collect();

        for name in ttl_queues {
            let (dl_exchange, dl_routing_key, expired) = {
                let queue = state.queues.get_mut(&name).unwrap();
                let dlx = queue.args.dead_letter_exchange.clone();
                let dlrk = queue.args.dead_letter_routing_key.clone();
                let expired: Vec<StoredMessage> = queue.messages.drain(..).collect();
                (dlx, dlrk, expired)
            };
            let (Some(exchange), Some(routing_key)) = (dl_exchange, dl_routing_key) else {
                continue;
            };
            for mut message in expired {
                message.exchange = exchange.clone();
                message.routing_key = routing_key.clone();
                Self::route(&mut state, message);
            }
        }
    }

    /// Releases every message held by delayed exchanges as if its delay
    /// elapsed.
    pub fn release_delayed(&self) {
        let mut state = self.state.lock().unwrap();
        let delayed: Vec<StoredMessage> = state.delayed.drain(..).collect();
        for message in delayed {
            Self::route(&mut state, message);
        }
    }

    fn route(state: &mut BrokerState, message: StoredMessage) {
        let targets: Vec<String> = state
            .bindings
            .iter()
            .filter(|b| b.exchange == message.exchange && topic_match(&b.pattern, &message.routing_key))
            .map(|b| b.queue.clone())
            .collect();
        for queue in targets {
            if let Some(q) = state.queues.get_mut(&queue) {
                q.messages.push_back(message.clone());
            }
        }
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .exchanges
            .insert(spec.name.clone(), spec.kind);
        Ok(())
    }

    async fn declare_queue(&self, name: &str, args: &QueueArgs) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.queues.entry(name.to_string()).or_insert(QueueState {
            args: args.clone(),
            messages: VecDeque::new(),
        });
        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::NotFound(format!("queue {queue}")));
        }
        let exists = state
            .bindings
            .iter()
            .any(|b| b.queue == queue && b.exchange == exchange && b.pattern == routing_key);
        if !exists {
            state.bindings.push(Binding {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                pattern: routing_key.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.queues.remove(name);
        state.bindings.retain(|b| b.queue != name);
        Ok(())
    }

    async fn delete_exchange(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.exchanges.remove(name);
        state.bindings.retain(|b| b.exchange != name);
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: MessageEnvelope,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_publishes {
            return Err(BrokerError::PublishFailed(
                "injected publish failure".to_string(),
            ));
        }
        let Some(kind) = state.exchanges.get(exchange).copied() else {
            return Err(BrokerError::NotFound(format!("exchange {exchange}")));
        };

        let message = StoredMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: envelope.body,
            headers: envelope.headers,
        };

        state.published += 1;
        if kind == ExchangeKind::DelayedMessage && message.headers.contains_key(crate::envelope::X_DELAY)
        {
            state.delayed.push(message);
        } else {
            Self::route(&mut state, message);
        }
        Ok(())
    }

    async fn get(&self, queue: &str) -> Result<Option<Delivery>> {
        let mut state = self.state.lock().unwrap();
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::NotFound(format!("queue {queue}")));
        }
        state.next_tag += 1;
        let tag = state.next_tag;
        let message = state.queues.get_mut(queue).unwrap().messages.pop_front();
        Ok(message.map(|m| Delivery {
            queue: queue.to_string(),
            exchange: m.exchange,
            routing_key: m.routing_key,
            body: m.body,
            headers: m.headers,
            delivery_tag: tag,
        }))
    }

    async fn ack(&self, _delivery: &Delivery) -> Result<()> {
        self.state.lock().unwrap().acked += 1;
        Ok(())
    }
}
