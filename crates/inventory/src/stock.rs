//! Stock store seam.

use std::time::Duration;

use async_trait::async_trait;
use common::{OrderId, SkuId};

use crate::error::Result;

/// Cache key mirroring the authoritative stock of one SKU.
pub fn stock_key(sku_id: SkuId) -> String {
    format!("stock:sku:{sku_id}")
}

/// Mutual-exclusion key guarding reservations of one SKU.
pub fn reserve_lock_key(sku_id: SkuId) -> String {
    format!("reserve:lock:{sku_id}")
}

/// Idempotency marker for one order's deduct of one SKU. Held, never
/// released on success, so a redelivered deduct message is a no-op until
/// the marker expires.
pub fn deduct_lock_key(order_id: OrderId, sku_id: SkuId) -> String {
    format!("inventory_deduct_lock:{order_id}_{sku_id}")
}

/// Idempotency marker for one order's rollback of one SKU.
pub fn rollback_lock_key(order_id: OrderId, sku_id: SkuId) -> String {
    format!("inventory_rollback_lock:{order_id}_{sku_id}")
}

/// Atomic counter and lock primitives over a fast key-value store.
///
/// The store holds an integer mirror of the authoritative relational stock,
/// lazily seeded and expiring after `ttl` to bound staleness. All mutation
/// goes through [`check_and_decrement`](StockStore::check_and_decrement) or
/// [`increment`](StockStore::increment); there is deliberately no plain
/// `set`, which would reintroduce the read-then-write race.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Atomically: seed `key` with `seed` if absent, then decrement by
    /// `quantity` if the current value is sufficient. Returns `true` when
    /// the decrement was applied. Refreshes the key's expiry on success.
    async fn check_and_decrement(
        &self,
        key: &str,
        seed: i64,
        quantity: u32,
        ttl: Duration,
    ) -> Result<bool>;

    /// Plain atomic increment; the rollback path. Always safe to call.
    async fn increment(&self, key: &str, quantity: u32) -> Result<()>;

    /// Current counter value, if the key exists.
    async fn get(&self, key: &str) -> Result<Option<i64>>;

    /// Acquires a self-expiring mutual-exclusion token. Returns `false`
    /// when another holder has it.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Releases a lock early. Expiry handles crashed holders.
    async fn release_lock(&self, key: &str) -> Result<()>;
}
