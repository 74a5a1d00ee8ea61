//! Order, order-item, and SKU records plus the order store trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use common::{AddressId, GoodsId, OrderId, SkuId, UserId};
use domain::{Money, OrderStatus, PayStatus};

use crate::error::Result;
use crate::outbox::NewOutboxMessage;

/// A sellable SKU row.
#[derive(Debug, Clone)]
pub struct SkuRecord {
    pub id: SkuId,
    pub goods_id: GoodsId,
    pub goods_name: String,
    pub specs: serde_json::Value,
    pub price: Money,
    pub stock: i64,
}

/// Fields for a new order header.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_no: String,
    pub user_id: UserId,
    pub address_id: AddressId,
    pub total_amount: Money,
    pub pay_amount: Money,
    pub remark: String,
}

/// Fields for a new order line, snapshotted from the SKU at order time.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub goods_id: GoodsId,
    pub sku_id: SkuId,
    pub goods_name: String,
    pub sku_specs: serde_json::Value,
    pub price: Money,
    pub quantity: u32,
    pub total_price: Money,
}

/// A persisted order header.
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub id: OrderId,
    pub order_no: String,
    pub user_id: UserId,
    pub address_id: AddressId,
    pub total_amount: Money,
    pub pay_amount: Money,
    pub status: OrderStatus,
    pub pay_status: PayStatus,
    pub remark: String,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub pay_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A persisted order line.
#[derive(Debug, Clone)]
pub struct OrderItemRecord {
    pub id: i64,
    pub order_id: OrderId,
    pub goods_id: GoodsId,
    pub sku_id: SkuId,
    pub goods_name: String,
    pub sku_specs: serde_json::Value,
    pub price: Money,
    pub quantity: u32,
    pub total_price: Money,
}

/// Builds the outbox rows for an order once its id is known. The order id is
/// assigned inside the insert transaction, so callers hand the store a
/// factory instead of finished rows.
pub type OutboxFactory = Box<dyn FnOnce(OrderId) -> Vec<NewOutboxMessage> + Send>;

/// Persistence seam for orders and SKU stock.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts the order header, its items, and the outbox rows produced by
    /// `outbox` in a single transaction. Either everything commits or
    /// nothing does.
    async fn create_order(
        &self,
        order: NewOrder,
        items: Vec<NewOrderItem>,
        outbox: OutboxFactory,
    ) -> Result<OrderRecord>;

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>>;

    async fn get_order_by_no(&self, order_no: &str) -> Result<Option<OrderRecord>>;

    async fn items_for_order(&self, order_id: OrderId) -> Result<Vec<OrderItemRecord>>;

    /// Transitions a pending unpaid order to paid. Returns false when the
    /// order was already paid, cancelled, or does not exist, so duplicate
    /// and late payment callbacks are harmless.
    async fn mark_paid(&self, order_id: OrderId) -> Result<bool>;

    /// Cancels the order only if it is still pending and unpaid, returning
    /// its items so the caller can release reserved stock. `None` means the
    /// guard did not match and nothing was changed.
    async fn cancel_if_pending(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<Option<Vec<OrderItemRecord>>>;

    async fn get_sku(&self, sku_id: SkuId) -> Result<Option<SkuRecord>>;

    async fn get_skus(&self, sku_ids: &[SkuId]) -> Result<HashMap<SkuId, SkuRecord>>;

    /// Every SKU row, ordered by id, for the stock reconciliation sweep.
    async fn list_skus(&self) -> Result<Vec<SkuRecord>>;

    /// Decrements relational SKU stock, guarded so the row never goes
    /// negative. Returns false when stock was insufficient.
    async fn deduct_sku_stock(&self, sku_id: SkuId, quantity: u32) -> Result<bool>;

    /// Increments relational SKU stock.
    async fn restore_sku_stock(&self, sku_id: SkuId, quantity: u32) -> Result<()>;

    /// Overwrites relational SKU stock with an externally authoritative
    /// value, as the stock reconciliation sweep does.
    async fn set_sku_stock(&self, sku_id: SkuId, stock: i64) -> Result<()>;
}
