//! In-memory stock store for tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::stock::StockStore;

#[derive(Debug, Default)]
struct StockState {
    counters: HashMap<String, i64>,
    locks: HashSet<String>,
}

/// In-memory [`StockStore`] with the same atomicity semantics as the Redis
/// script, minus expiry (TTLs are accepted and ignored).
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockStore {
    state: Arc<Mutex<StockState>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds a counter, bypassing the lazy seed path.
    pub fn set(&self, key: &str, value: i64) {
        self.state
            .lock()
            .unwrap()
            .counters
            .insert(key.to_string(), value);
    }

    /// Returns true while a lock token is held.
    pub fn is_locked(&self, key: &str) -> bool {
        self.state.lock().unwrap().locks.contains(key)
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn check_and_decrement(
        &self,
        key: &str,
        seed: i64,
        quantity: u32,
        _ttl: Duration,
    ) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let current = *state.counters.entry(key.to_string()).or_insert(seed);
        if current >= i64::from(quantity) {
            state
                .counters
                .insert(key.to_string(), current - i64::from(quantity));
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn increment(&self, key: &str, quantity: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        *state.counters.entry(key.to_string()).or_insert(0) += i64::from(quantity);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.state.lock().unwrap().counters.get(key).copied())
    }

    async fn acquire_lock(&self, key: &str, _ttl: Duration) -> Result<bool> {
        Ok(self.state.lock().unwrap().locks.insert(key.to_string()))
    }

    async fn release_lock(&self, key: &str) -> Result<()> {
        self.state.lock().unwrap().locks.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_seed_then_decrement() {
        let store = InMemoryStockStore::new();
        let applied = store
            .check_and_decrement("stock:sku:1", 10, 3, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(applied);
        assert_eq!(store.get("stock:sku:1").await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_existing_value_wins_over_seed() {
        let store = InMemoryStockStore::new();
        store.set("stock:sku:1", 2);
        // Seed of 10 must be ignored; 2 < 5 so the decrement is refused.
        let applied = store
            .check_and_decrement("stock:sku:1", 10, 5, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(!applied);
        assert_eq!(store.get("stock:sku:1").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let store = InMemoryStockStore::new();
        assert!(store.acquire_lock("l", Duration::from_secs(5)).await.unwrap());
        assert!(!store.acquire_lock("l", Duration::from_secs(5)).await.unwrap());
        store.release_lock("l").await.unwrap();
        assert!(store.acquire_lock("l", Duration::from_secs(5)).await.unwrap());
    }
}
