//! Reconciles the cache stock mirror back into the relational rows.

use std::sync::Arc;

use inventory::{StockStore, stock_key};
use store::OrderStore;

use crate::error::Result;

/// One-shot sweep copying each SKU's cache mirror into its relational stock
/// column. Run when the mirror and the rows have drifted, for example after
/// consumers fell behind during an incident.
pub struct StockSync {
    store: Arc<dyn OrderStore>,
    stock: Arc<dyn StockStore>,
}

impl StockSync {
    pub fn new(store: Arc<dyn OrderStore>, stock: Arc<dyn StockStore>) -> Self {
        Self { store, stock }
    }

    /// Returns how many rows were updated. SKUs with no mirror entry are
    /// left untouched.
    pub async fn sync_all(&self) -> Result<usize> {
        let mut synced = 0;
        for sku in self.store.list_skus().await? {
            let Some(mirrored) = self.stock.get(&stock_key(sku.id)).await? else {
                continue;
            };
            if mirrored == sku.stock {
                continue;
            }
            self.store.set_sku_stock(sku.id, mirrored).await?;
            tracing::info!(
                sku_id = %sku.id,
                from = sku.stock,
                to = mirrored,
                "stock row synced from cache mirror"
            );
            synced += 1;
        }
        Ok(synced)
    }
}
