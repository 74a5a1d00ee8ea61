//! In-memory store for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use common::{OrderId, SkuId};
use domain::{OrderStatus, PayStatus};

use crate::error::{Result, StoreError};
use crate::ledger::{
    FailedMessageLedger, FailedMessageRecord, LedgerStatus, NewFailedMessage, UpsertOutcome,
};
use crate::orders::{
    NewOrder, NewOrderItem, OrderItemRecord, OrderRecord, OrderStore, OutboxFactory, SkuRecord,
};
use crate::outbox::{NewOutboxMessage, OutboxRecord, OutboxStatus, OutboxStore};

#[derive(Debug, Default)]
struct StoreState {
    skus: HashMap<SkuId, SkuRecord>,
    orders: Vec<OrderRecord>,
    items: Vec<OrderItemRecord>,
    outbox: Vec<OutboxRecord>,
    ledger: Vec<FailedMessageRecord>,
    next_order_id: i64,
    next_item_id: i64,
    next_outbox_id: i64,
    next_ledger_id: i64,
    fail_create_order: bool,
    fail_ledger_upsert: bool,
}

impl StoreState {
    fn new() -> Self {
        Self {
            next_order_id: 1,
            next_item_id: 1,
            next_outbox_id: 1,
            next_ledger_id: 1,
            ..Self::default()
        }
    }
}

/// In-memory implementation of every store trait, with failure injection
/// hooks for tests.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::new())),
        }
    }

    /// Seeds a SKU row.
    pub fn insert_sku(&self, sku: SkuRecord) {
        self.state.lock().unwrap().skus.insert(sku.id, sku);
    }

    /// When set, `create_order` fails before touching any state.
    pub fn set_fail_create_order(&self, fail: bool) {
        self.state.lock().unwrap().fail_create_order = fail;
    }

    /// When set, ledger upserts fail, for intake failure-path tests.
    pub fn set_fail_ledger_upsert(&self, fail: bool) {
        self.state.lock().unwrap().fail_ledger_upsert = fail;
    }

    /// Relational stock for a SKU, if present.
    pub fn sku_stock(&self, sku_id: SkuId) -> Option<i64> {
        self.state.lock().unwrap().skus.get(&sku_id).map(|s| s.stock)
    }

    pub fn order_count(&self) -> usize {
        self.state.lock().unwrap().orders.len()
    }

    /// Snapshot of all outbox rows, for assertions.
    pub fn outbox_rows(&self) -> Vec<OutboxRecord> {
        self.state.lock().unwrap().outbox.clone()
    }

    /// Snapshot of all ledger rows, for assertions.
    pub fn ledger_rows(&self) -> Vec<FailedMessageRecord> {
        self.state.lock().unwrap().ledger.clone()
    }

    /// Inserts an outbox row directly, bypassing `create_order`. Panics on a
    /// duplicate message id, mirroring the unique key on the real table.
    pub fn push_outbox(&self, row: NewOutboxMessage) -> i64 {
        let mut state = self.state.lock().unwrap();
        assert!(
            !state.outbox.iter().any(|r| r.message_id == row.message_id),
            "duplicate outbox message_id {}",
            row.message_id
        );
        let id = state.next_outbox_id;
        state.next_outbox_id += 1;
        state.outbox.push(OutboxRecord {
            id,
            message_id: row.message_id,
            exchange: row.exchange,
            routing_key: row.routing_key,
            body: row.body,
            status: OutboxStatus::Pending,
            try_count: 0,
            next_retry_time: row.next_retry_time,
            updated_at: Utc::now(),
        });
        id
    }

    /// Forces a row to be due at or before `at`, for driving the relay in
    /// tests without sleeping.
    pub fn set_outbox_due(&self, id: i64, at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.outbox.iter_mut().find(|r| r.id == id) {
            row.next_retry_time = at;
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn create_order(
        &self,
        order: NewOrder,
        items: Vec<NewOrderItem>,
        outbox: OutboxFactory,
    ) -> Result<OrderRecord> {
        let mut state = self.state.lock().unwrap();
        if state.fail_create_order {
            return Err(StoreError::NotFound("injected create_order failure".into()));
        }

        let order_id = OrderId::new(state.next_order_id);
        state.next_order_id += 1;

        // Nothing is committed yet, so a duplicate aborts cleanly, like the
        // unique key would roll back the real transaction.
        let outbox_rows = outbox(order_id);
        for row in &outbox_rows {
            if state.outbox.iter().any(|r| r.message_id == row.message_id) {
                return Err(StoreError::Conflict(format!(
                    "outbox message_id {}",
                    row.message_id
                )));
            }
        }

        let record = OrderRecord {
            id: order_id,
            order_no: order.order_no,
            user_id: order.user_id,
            address_id: order.address_id,
            total_amount: order.total_amount,
            pay_amount: order.pay_amount,
            status: OrderStatus::Pending,
            pay_status: PayStatus::Unpaid,
            remark: order.remark,
            cancel_reason: None,
            cancelled_at: None,
            pay_time: None,
            created_at: Utc::now(),
        };
        state.orders.push(record.clone());

        for item in items {
            let id = state.next_item_id;
            state.next_item_id += 1;
            state.items.push(OrderItemRecord {
                id,
                order_id,
                goods_id: item.goods_id,
                sku_id: item.sku_id,
                goods_name: item.goods_name,
                sku_specs: item.sku_specs,
                price: item.price,
                quantity: item.quantity,
                total_price: item.total_price,
            });
        }

        for row in outbox_rows {
            let id = state.next_outbox_id;
            state.next_outbox_id += 1;
            state.outbox.push(OutboxRecord {
                id,
                message_id: row.message_id,
                exchange: row.exchange,
                routing_key: row.routing_key,
                body: row.body,
                status: OutboxStatus::Pending,
                try_count: 0,
                next_retry_time: row.next_retry_time,
                updated_at: Utc::now(),
            });
        }

        Ok(record)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.orders.iter().find(|o| o.id == order_id).cloned())
    }

    async fn get_order_by_no(&self, order_no: &str) -> Result<Option<OrderRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state.orders.iter().find(|o| o.order_no == order_no).cloned())
    }

    async fn items_for_order(&self, order_id: OrderId) -> Result<Vec<OrderItemRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .items
            .iter()
            .filter(|i| i.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn mark_paid(&self, order_id: OrderId) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        match state.orders.iter_mut().find(|o| o.id == order_id) {
            Some(order)
                if order.status == OrderStatus::Pending
                    && order.pay_status == PayStatus::Unpaid =>
            {
                order.pay_status = PayStatus::Paid;
                order.status = OrderStatus::Paid;
                order.pay_time = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_if_pending(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<Option<Vec<OrderItemRecord>>> {
        let mut state = self.state.lock().unwrap();
        let matched = match state.orders.iter_mut().find(|o| o.id == order_id) {
            Some(order)
                if order.status == OrderStatus::Pending
                    && order.pay_status == PayStatus::Unpaid =>
            {
                order.status = OrderStatus::Cancelled;
                order.cancel_reason = Some(reason.to_string());
                order.cancelled_at = Some(Utc::now());
                true
            }
            _ => false,
        };
        if !matched {
            return Ok(None);
        }
        Ok(Some(
            state
                .items
                .iter()
                .filter(|i| i.order_id == order_id)
                .cloned()
                .collect(),
        ))
    }

    async fn get_sku(&self, sku_id: SkuId) -> Result<Option<SkuRecord>> {
        Ok(self.state.lock().unwrap().skus.get(&sku_id).cloned())
    }

    async fn list_skus(&self) -> Result<Vec<SkuRecord>> {
        let state = self.state.lock().unwrap();
        let mut skus: Vec<SkuRecord> = state.skus.values().cloned().collect();
        skus.sort_by_key(|s| s.id);
        Ok(skus)
    }

    async fn get_skus(&self, sku_ids: &[SkuId]) -> Result<HashMap<SkuId, SkuRecord>> {
        let state = self.state.lock().unwrap();
        Ok(sku_ids
            .iter()
            .filter_map(|id| state.skus.get(id).map(|s| (*id, s.clone())))
            .collect())
    }

    async fn deduct_sku_stock(&self, sku_id: SkuId, quantity: u32) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        match state.skus.get_mut(&sku_id) {
            Some(sku) if sku.stock >= i64::from(quantity) => {
                sku.stock -= i64::from(quantity);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn restore_sku_stock(&self, sku_id: SkuId, quantity: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let sku = state
            .skus
            .get_mut(&sku_id)
            .ok_or_else(|| StoreError::NotFound(format!("sku {sku_id}")))?;
        sku.stock += i64::from(quantity);
        Ok(())
    }

    async fn set_sku_stock(&self, sku_id: SkuId, stock: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let sku = state
            .skus
            .get_mut(&sku_id)
            .ok_or_else(|| StoreError::NotFound(format!("sku {sku_id}")))?;
        sku.stock = stock;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryStore {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        batch: usize,
        lease: Duration,
    ) -> Result<Vec<OutboxRecord>> {
        let mut state = self.state.lock().unwrap();
        let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero());
        let mut claimed = Vec::new();
        for row in state.outbox.iter_mut() {
            if claimed.len() >= batch {
                break;
            }
            if row.status != OutboxStatus::Delivered && row.next_retry_time <= now {
                row.next_retry_time = now + lease;
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_delivered(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .outbox
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("outbox row {id}")))?;
        row.status = OutboxStatus::Delivered;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn reschedule(
        &self,
        id: i64,
        try_count: u32,
        next_retry_time: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let row = state
            .outbox
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("outbox row {id}")))?;
        row.status = OutboxStatus::FailedRetrying;
        row.try_count = try_count;
        row.next_retry_time = next_retry_time;
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn undelivered_count(&self) -> Result<u64> {
        let state = self.state.lock().unwrap();
        Ok(state
            .outbox
            .iter()
            .filter(|r| r.status != OutboxStatus::Delivered)
            .count() as u64)
    }
}

#[async_trait]
impl FailedMessageLedger for InMemoryStore {
    async fn upsert(&self, message: NewFailedMessage) -> Result<UpsertOutcome> {
        let mut state = self.state.lock().unwrap();
        if state.fail_ledger_upsert {
            return Err(StoreError::NotFound("injected ledger failure".into()));
        }
        if let Some(row) = state
            .ledger
            .iter_mut()
            .find(|r| r.fingerprint == message.fingerprint)
        {
            row.updated_at = Utc::now();
            return Ok(UpsertOutcome::Touched);
        }
        let id = state.next_ledger_id;
        state.next_ledger_id += 1;
        let now = Utc::now();
        state.ledger.push(FailedMessageRecord {
            id,
            fingerprint: message.fingerprint,
            queue_name: message.queue_name,
            exchange_name: message.exchange_name,
            routing_key: message.routing_key,
            retry_count: message.retry_count,
            message_body: message.message_body,
            message_data: message.message_data,
            headers: message.headers,
            status: LedgerStatus::Pending,
            created_at: now,
            updated_at: now,
        });
        Ok(UpsertOutcome::Inserted)
    }

    async fn list(&self, id: Option<i64>) -> Result<Vec<FailedMessageRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .ledger
            .iter()
            .filter(|r| r.status == LedgerStatus::Pending)
            .filter(|r| id.map_or(true, |wanted| r.id == wanted))
            .cloned()
            .collect())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.ledger.retain(|r| r.id != id);
        Ok(())
    }
}
