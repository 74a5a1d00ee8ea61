//! Dead-letter fingerprinting.

use sha2::{Digest, Sha256};

/// Deterministic hash over a dead-lettered delivery's identity: raw body,
/// origin queue, origin routing key, and the retry count at time of death.
/// The same dead message redelivered yields the same fingerprint, which is
/// what lets the ledger upsert instead of duplicating.
pub fn fingerprint(raw_body: &[u8], queue: &str, routing_key: &str, retry_count: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw_body);
    hasher.update(queue.as_bytes());
    hasher.update(routing_key.as_bytes());
    hasher.update(retry_count.to_be_bytes());
    hex::encode(hasher.finalize())
}
