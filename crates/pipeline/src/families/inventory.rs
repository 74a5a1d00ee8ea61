//! Inventory-side consumers: authoritative deduct and rollback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use broker::topology::{INVENTORY_DEDUCT, INVENTORY_ROLLBACK, QueueSpec};
use common::{OrderId, SkuId};
use domain::RollbackShape;
use inventory::{StockStore, deduct_lock_key, rollback_lock_key, stock_key};
use store::OrderStore;

use crate::consumer::QueueFamily;
use crate::error::Result;

/// How long processed-message markers live. Long enough to outlast any
/// redelivery cycle, short enough not to accumulate forever.
const MARKER_TTL: Duration = Duration::from_secs(86_400);

/// Consumes `inventory_deduct` and `inventory_rollback`.
///
/// The relational `stock` column is authoritative; the cache mirror was
/// already decremented at reservation time, so deduct only touches the
/// relational side while rollback restores both.
pub struct InventoryFamily {
    store: Arc<dyn OrderStore>,
    stock: Arc<dyn StockStore>,
}

impl InventoryFamily {
    pub fn new(store: Arc<dyn OrderStore>, stock: Arc<dyn StockStore>) -> Self {
        Self { store, stock }
    }

    async fn handle_deduct(&self, data: serde_json::Value) -> Result<bool> {
        let (Some(order_id), Some(sku_id), Some(quantity)) = (
            data.get("order_id").and_then(|v| v.as_i64()),
            data.get("sku_id").and_then(|v| v.as_i64()),
            data.get("quantity").and_then(|v| v.as_u64()),
        ) else {
            tracing::warn!("inventory_deduct event missing fields");
            return Ok(false);
        };
        if quantity == 0 || quantity > u64::from(u32::MAX) {
            tracing::warn!(order_id, sku_id, quantity, "inventory_deduct with bad quantity");
            return Ok(false);
        }
        let order_id = OrderId::new(order_id);
        let sku_id = SkuId::new(sku_id);
        let quantity = quantity as u32;

        // Redelivered deducts are absorbed by the marker, not by the
        // relational update, which would otherwise double-decrement.
        let marker = deduct_lock_key(order_id, sku_id);
        if !self.stock.acquire_lock(&marker, MARKER_TTL).await? {
            tracing::info!(%order_id, %sku_id, "deduct already applied, skipping");
            return Ok(true);
        }

        let applied = match self.store.deduct_sku_stock(sku_id, quantity).await {
            Ok(applied) => applied,
            Err(err) => {
                self.stock.release_lock(&marker).await?;
                return Err(err.into());
            }
        };
        if !applied {
            // Leave the marker released so a retry can run once the
            // relational stock is reconciled.
            self.stock.release_lock(&marker).await?;
            tracing::error!(%order_id, %sku_id, quantity, "relational stock insufficient for deduct");
            return Ok(false);
        }

        metrics::counter!("inventory_deducted_total").increment(1);
        tracing::info!(%order_id, %sku_id, quantity, "relational stock deducted");
        Ok(true)
    }

    async fn handle_rollback(&self, data: serde_json::Value) -> Result<bool> {
        let Some(order_id) = data
            .get("order_id")
            .and_then(|v| v.as_i64())
            .map(OrderId::new)
        else {
            tracing::warn!("inventory_rollback event without order_id");
            return Ok(false);
        };
        let Ok(shape) = serde_json::from_value::<RollbackShape>(data) else {
            tracing::warn!(%order_id, "inventory_rollback with unrecognized payload shape");
            return Ok(false);
        };

        for item in shape.canonical() {
            let marker = rollback_lock_key(order_id, item.sku_id);
            if !self.stock.acquire_lock(&marker, MARKER_TTL).await? {
                tracing::info!(%order_id, sku_id = %item.sku_id, "rollback already applied, skipping");
                continue;
            }

            let restore = async {
                self.store
                    .restore_sku_stock(item.sku_id, item.quantity)
                    .await?;
                self.stock
                    .increment(&stock_key(item.sku_id), item.quantity)
                    .await?;
                Result::Ok(())
            };
            if let Err(err) = restore.await {
                self.stock.release_lock(&marker).await?;
                return Err(err);
            }

            metrics::counter!("inventory_rolled_back_total").increment(1);
            tracing::info!(%order_id, sku_id = %item.sku_id, quantity = item.quantity, "stock restored");
        }
        Ok(true)
    }
}

#[async_trait]
impl QueueFamily for InventoryFamily {
    fn describe(&self) -> &'static str {
        "inventory-events"
    }

    fn queues(&self) -> Vec<QueueSpec> {
        vec![INVENTORY_DEDUCT, INVENTORY_ROLLBACK]
    }

    async fn handle(&self, data: serde_json::Value, queue: &QueueSpec) -> Result<bool> {
        match queue.name {
            "inventory_deduct" => self.handle_deduct(data).await,
            "inventory_rollback" => self.handle_rollback(data).await,
            other => {
                tracing::error!(queue = other, "no handler registered for queue");
                Ok(false)
            }
        }
    }
}
