//! Inventory reservation engine.

use std::sync::Arc;
use std::time::Duration;

use common::SkuId;

use crate::error::{InventoryError, Result};
use crate::stock::{StockStore, reserve_lock_key, stock_key};

/// Outcome of a reservation attempt that reached the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationOutcome {
    /// Stock was sufficient and has been decremented.
    Reserved,
    /// Stock was insufficient; nothing was mutated.
    InsufficientStock,
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct ReservationEngineConfig {
    /// Expiry on the mirrored stock counters.
    pub stock_ttl: Duration,
    /// Expiry on the per-SKU reservation lock.
    pub lock_ttl: Duration,
}

impl Default for ReservationEngineConfig {
    fn default() -> Self {
        Self {
            stock_ttl: Duration::from_secs(86_400),
            lock_ttl: Duration::from_secs(5),
        }
    }
}

/// Atomic check-and-decrement over the mirrored stock counters.
///
/// A short-TTL per-SKU lock is held around the scripted decrement so the
/// seed/compare/decrement sequence cannot interleave with a competing
/// reservation from another process. The lock self-expires, so a crashed
/// holder cannot deadlock the SKU.
#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<dyn StockStore>,
    config: ReservationEngineConfig,
}

impl ReservationEngine {
    pub fn new(store: Arc<dyn StockStore>, config: ReservationEngineConfig) -> Self {
        Self { store, config }
    }

    /// Reserves `quantity` units of a SKU.
    ///
    /// `seed_stock` is the relational stock snapshot taken by the caller; it
    /// is only used when the mirror key does not exist yet. Errors from the
    /// store mean unknown outcome: the caller must not assume the decrement
    /// was rolled back.
    pub async fn reserve(
        &self,
        sku_id: SkuId,
        seed_stock: i64,
        quantity: u32,
    ) -> Result<ReservationOutcome> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity(i64::from(quantity)));
        }

        let lock_key = reserve_lock_key(sku_id);
        if !self.store.acquire_lock(&lock_key, self.config.lock_ttl).await? {
            return Err(InventoryError::LockBusy(lock_key));
        }

        let result = self
            .store
            .check_and_decrement(&stock_key(sku_id), seed_stock, quantity, self.config.stock_ttl)
            .await;
        self.store.release_lock(&lock_key).await?;

        match result? {
            true => {
                metrics::counter!("inventory_reservations_total").increment(1);
                tracing::debug!(%sku_id, quantity, "stock reserved");
                Ok(ReservationOutcome::Reserved)
            }
            false => {
                metrics::counter!("inventory_reservations_rejected_total").increment(1);
                Ok(ReservationOutcome::InsufficientStock)
            }
        }
    }

    /// Returns previously reserved units. Plain atomic increment; callers
    /// must call it at most once per successful reservation.
    pub async fn release(&self, sku_id: SkuId, quantity: u32) -> Result<()> {
        self.store.increment(&stock_key(sku_id), quantity).await?;
        tracing::debug!(%sku_id, quantity, "reservation released");
        Ok(())
    }

    /// Current mirrored value for a SKU, if seeded.
    pub async fn mirrored_stock(&self, sku_id: SkuId) -> Result<Option<i64>> {
        self.store.get(&stock_key(sku_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStockStore;

    fn engine() -> (ReservationEngine, Arc<InMemoryStockStore>) {
        let store = Arc::new(InMemoryStockStore::new());
        let engine = ReservationEngine::new(store.clone(), ReservationEngineConfig::default());
        (engine, store)
    }

    #[tokio::test]
    async fn test_reserve_seeds_and_decrements() {
        let (engine, _) = engine();
        let sku = SkuId::new(1);

        let outcome = engine.reserve(sku, 10, 4).await.unwrap();
        assert_eq!(outcome, ReservationOutcome::Reserved);
        assert_eq!(engine.mirrored_stock(sku).await.unwrap(), Some(6));
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_counter_untouched() {
        let (engine, _) = engine();
        let sku = SkuId::new(1);

        let outcome = engine.reserve(sku, 3, 5).await.unwrap();
        assert_eq!(outcome, ReservationOutcome::InsufficientStock);
        assert_eq!(engine.mirrored_stock(sku).await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let (engine, _) = engine();
        let result = engine.reserve(SkuId::new(1), 10, 0).await;
        assert!(matches!(result, Err(InventoryError::InvalidQuantity(0))));
    }

    #[tokio::test]
    async fn test_release_restores_stock() {
        let (engine, _) = engine();
        let sku = SkuId::new(1);

        engine.reserve(sku, 10, 4).await.unwrap();
        engine.release(sku, 4).await.unwrap();
        assert_eq!(engine.mirrored_stock(sku).await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_conservation_over_mixed_sequence() {
        let (engine, _) = engine();
        let sku = SkuId::new(7);
        let initial = 20;

        let mut outstanding: i64 = 0;
        for quantity in [5u32, 9, 9, 3] {
            if engine.reserve(sku, initial, quantity).await.unwrap()
                == ReservationOutcome::Reserved
            {
                outstanding += i64::from(quantity);
            }
        }
        engine.release(sku, 5).await.unwrap();
        outstanding -= 5;

        let mirrored = engine.mirrored_stock(sku).await.unwrap().unwrap();
        assert_eq!(mirrored, initial - outstanding);
        assert!(mirrored >= 0);
    }

    #[tokio::test]
    async fn test_lock_held_elsewhere_means_busy() {
        let (engine, store) = engine();
        let sku = SkuId::new(1);
        store
            .acquire_lock(&reserve_lock_key(sku), Duration::from_secs(5))
            .await
            .unwrap();

        let result = engine.reserve(sku, 10, 1).await;
        assert!(matches!(result, Err(InventoryError::LockBusy(_))));
    }

    #[tokio::test]
    async fn test_lock_released_after_reserve() {
        let (engine, store) = engine();
        let sku = SkuId::new(1);
        engine.reserve(sku, 10, 1).await.unwrap();
        assert!(!store.is_locked(&reserve_lock_key(sku)));
    }
}
