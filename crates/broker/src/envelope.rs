//! Message envelope and delivery types.

use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;

/// Header carrying the redelivery counter. Absent means zero.
pub const X_RETRY_COUNT: &str = "x-retry-count";
/// Header carrying the delay in milliseconds on delayed-message exchanges.
pub const X_DELAY: &str = "x-delay";
/// Marker header set on messages replayed from the failed-message ledger.
pub const X_REQUEUED: &str = "x-requeued";
/// Name of the dead-letter queue a replayed message was parked in.
pub const X_ORIGIN_DLX: &str = "x-origin-dlx";
/// Business queue a dead-lettered message originally came from.
pub const X_ORIGINAL_QUEUE: &str = "x-original-queue";
/// Business exchange a dead-lettered message was originally published to.
pub const X_ORIGINAL_EXCHANGE: &str = "x-original-exchange";
/// Routing key a dead-lettered message was originally published with.
pub const X_ORIGINAL_ROUTING_KEY: &str = "x-original-routing-key";

/// Content type applied to every published message.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// A message to publish: JSON body, headers, and a unique message id.
///
/// Messages are always published persistent with a JSON content type.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub message_id: String,
    pub body: Vec<u8>,
    pub headers: BTreeMap<String, serde_json::Value>,
}

impl MessageEnvelope {
    /// Builds an envelope by serializing the payload to JSON.
    pub fn json<T: Serialize>(payload: &T) -> Result<Self> {
        Ok(Self::raw(serde_json::to_vec(payload)?))
    }

    /// Builds an envelope from an already-encoded body.
    pub fn raw(body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            body: body.into(),
            headers: BTreeMap::new(),
        }
    }

    /// Replaces the generated message id.
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    /// Sets a single header.
    pub fn with_header(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// Sets the `x-retry-count` header.
    pub fn with_retry_count(self, count: u32) -> Self {
        self.with_header(X_RETRY_COUNT, serde_json::Value::from(count))
    }

    /// Sets the `x-delay` header, honored only by delayed-message exchanges.
    pub fn with_delay_ms(self, delay_ms: u64) -> Self {
        self.with_header(X_DELAY, serde_json::Value::from(delay_ms))
    }

    /// Returns the delay in milliseconds, if any.
    pub fn delay_ms(&self) -> Option<u64> {
        self.headers.get(X_DELAY).and_then(|v| v.as_u64())
    }
}

/// A message pulled from a queue, not yet acknowledged.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
    pub body: Vec<u8>,
    pub headers: BTreeMap<String, serde_json::Value>,
    pub delivery_tag: u64,
}

impl Delivery {
    /// Retry counter from the headers, defaulting to zero.
    pub fn retry_count(&self) -> u32 {
        self.headers
            .get(X_RETRY_COUNT)
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32
    }

    /// A string header, if present.
    pub fn header_str(&self, key: &str) -> Option<&str> {
        self.headers.get(key).and_then(|v| v.as_str())
    }

    /// Decodes the body as a JSON object; a malformed body yields an empty
    /// object rather than an error so poison bodies still flow through the
    /// retry/dead-letter machinery.
    pub fn decode_data(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
    }
}
