//! PostgreSQL-backed store implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use common::{AddressId, GoodsId, OrderId, SkuId, UserId};
use domain::{Money, OrderStatus, PayStatus};

use crate::error::{Result, StoreError};
use crate::ledger::{
    FailedMessageLedger, FailedMessageRecord, LedgerStatus, NewFailedMessage, UpsertOutcome,
};
use crate::orders::{
    NewOrder, NewOrderItem, OrderItemRecord, OrderRecord, OrderStore, OutboxFactory, SkuRecord,
};
use crate::outbox::{OutboxRecord, OutboxStatus, OutboxStore};

/// PostgreSQL-backed implementation of every store trait.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_order(row: PgRow) -> Result<OrderRecord> {
        Ok(OrderRecord {
            id: OrderId::new(row.try_get("id")?),
            order_no: row.try_get("order_no")?,
            user_id: UserId::new(row.try_get("user_id")?),
            address_id: AddressId::new(row.try_get("address_id")?),
            total_amount: Money::from_cents(row.try_get("total_amount")?),
            pay_amount: Money::from_cents(row.try_get("pay_amount")?),
            status: OrderStatus::from_i16(row.try_get("status")?)?,
            pay_status: PayStatus::from_i16(row.try_get("pay_status")?)?,
            remark: row.try_get("remark")?,
            cancel_reason: row.try_get("cancel_reason")?,
            cancelled_at: row.try_get("cancelled_at")?,
            pay_time: row.try_get("pay_time")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_item(row: PgRow) -> Result<OrderItemRecord> {
        Ok(OrderItemRecord {
            id: row.try_get("id")?,
            order_id: OrderId::new(row.try_get("order_id")?),
            goods_id: GoodsId::new(row.try_get("goods_id")?),
            sku_id: SkuId::new(row.try_get("sku_id")?),
            goods_name: row.try_get("goods_name")?,
            sku_specs: row.try_get("sku_specs")?,
            price: Money::from_cents(row.try_get("price")?),
            quantity: row.try_get::<i32, _>("quantity")? as u32,
            total_price: Money::from_cents(row.try_get("total_price")?),
        })
    }

    fn row_to_sku(row: PgRow) -> Result<SkuRecord> {
        Ok(SkuRecord {
            id: SkuId::new(row.try_get("id")?),
            goods_id: GoodsId::new(row.try_get("goods_id")?),
            goods_name: row.try_get("goods_name")?,
            specs: row.try_get("specs")?,
            price: Money::from_cents(row.try_get("price")?),
            stock: row.try_get("stock")?,
        })
    }

    fn row_to_outbox(row: PgRow) -> Result<OutboxRecord> {
        let status_code: i16 = row.try_get("status")?;
        Ok(OutboxRecord {
            id: row.try_get("id")?,
            message_id: row.try_get("message_id")?,
            exchange: row.try_get("exchange")?,
            routing_key: row.try_get("routing_key")?,
            body: row.try_get("body")?,
            status: OutboxStatus::from_i16(status_code).ok_or_else(|| {
                StoreError::NotFound(format!("unknown outbox status {status_code}"))
            })?,
            try_count: row.try_get::<i32, _>("try_count")? as u32,
            next_retry_time: row.try_get("next_retry_time")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_failed(row: PgRow) -> Result<FailedMessageRecord> {
        let status: String = row.try_get("status")?;
        Ok(FailedMessageRecord {
            id: row.try_get("id")?,
            fingerprint: row.try_get("fingerprint")?,
            queue_name: row.try_get("queue_name")?,
            exchange_name: row.try_get("exchange_name")?,
            routing_key: row.try_get("routing_key")?,
            retry_count: row.try_get::<i32, _>("retry_count")? as u32,
            message_body: row.try_get("message_body")?,
            message_data: row.try_get("message_data")?,
            headers: row.try_get("headers")?,
            status: LedgerStatus::from_str(&status)
                .ok_or_else(|| StoreError::NotFound(format!("unknown ledger status {status}")))?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn create_order(
        &self,
        order: NewOrder,
        items: Vec<NewOrderItem>,
        outbox: OutboxFactory,
    ) -> Result<OrderRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO orders (order_no, user_id, address_id, total_amount, pay_amount, status, pay_status, remark)
            VALUES ($1, $2, $3, $4, $5, 0, 0, $6)
            RETURNING *
            "#,
        )
        .bind(&order.order_no)
        .bind(order.user_id.as_i64())
        .bind(order.address_id.as_i64())
        .bind(order.total_amount.as_cents())
        .bind(order.pay_amount.as_cents())
        .bind(&order.remark)
        .fetch_one(&mut *tx)
        .await?;
        let record = Self::row_to_order(row)?;

        for item in &items {
            sqlx::query(
                r#"
                INSERT INTO order_items (order_id, goods_id, sku_id, goods_name, sku_specs, price, quantity, total_price)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(record.id.as_i64())
            .bind(item.goods_id.as_i64())
            .bind(item.sku_id.as_i64())
            .bind(&item.goods_name)
            .bind(&item.sku_specs)
            .bind(item.price.as_cents())
            .bind(item.quantity as i32)
            .bind(item.total_price.as_cents())
            .execute(&mut *tx)
            .await?;
        }

        for message in outbox(record.id) {
            sqlx::query(
                r#"
                INSERT INTO local_messages (message_id, exchange, routing_key, body, status, try_count, next_retry_time)
                VALUES ($1, $2, $3, $4, 0, 0, $5)
                "#,
            )
            .bind(&message.message_id)
            .bind(&message.exchange)
            .bind(&message.routing_key)
            .bind(&message.body)
            .bind(message.next_retry_time)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(record)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<OrderRecord>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(order_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_order).transpose()
    }

    async fn get_order_by_no(&self, order_no: &str) -> Result<Option<OrderRecord>> {
        let row = sqlx::query("SELECT * FROM orders WHERE order_no = $1")
            .bind(order_no)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_order).transpose()
    }

    async fn items_for_order(&self, order_id: OrderId) -> Result<Vec<OrderItemRecord>> {
        let rows = sqlx::query("SELECT * FROM order_items WHERE order_id = $1 ORDER BY id")
            .bind(order_id.as_i64())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_item).collect()
    }

    async fn mark_paid(&self, order_id: OrderId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET pay_status = 1, status = 1, pay_time = now(), updated_at = now()
            WHERE id = $1 AND status = 0 AND pay_status = 0
            "#,
        )
        .bind(order_id.as_i64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_if_pending(
        &self,
        order_id: OrderId,
        reason: &str,
    ) -> Result<Option<Vec<OrderItemRecord>>> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 4, cancel_reason = $2, cancelled_at = now(), updated_at = now()
            WHERE id = $1 AND status = 0 AND pay_status = 0
            "#,
        )
        .bind(order_id.as_i64())
        .bind(reason)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let rows = sqlx::query("SELECT * FROM order_items WHERE order_id = $1 ORDER BY id")
            .bind(order_id.as_i64())
            .fetch_all(&mut *tx)
            .await?;
        tx.commit().await?;

        rows.into_iter().map(Self::row_to_item).collect::<Result<Vec<_>>>().map(Some)
    }

    async fn get_sku(&self, sku_id: SkuId) -> Result<Option<SkuRecord>> {
        let row = sqlx::query("SELECT * FROM goods_skus WHERE id = $1")
            .bind(sku_id.as_i64())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_sku).transpose()
    }

    async fn get_skus(&self, sku_ids: &[SkuId]) -> Result<HashMap<SkuId, SkuRecord>> {
        let ids: Vec<i64> = sku_ids.iter().map(|id| id.as_i64()).collect();
        let rows = sqlx::query("SELECT * FROM goods_skus WHERE id = ANY($1)")
            .bind(&ids)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|row| Self::row_to_sku(row).map(|sku| (sku.id, sku)))
            .collect()
    }

    async fn list_skus(&self) -> Result<Vec<SkuRecord>> {
        let rows = sqlx::query("SELECT * FROM goods_skus ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_sku).collect()
    }

    async fn deduct_sku_stock(&self, sku_id: SkuId, quantity: u32) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE goods_skus
            SET stock = stock - $2, updated_at = now()
            WHERE id = $1 AND stock >= $2
            "#,
        )
        .bind(sku_id.as_i64())
        .bind(i64::from(quantity))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn restore_sku_stock(&self, sku_id: SkuId, quantity: u32) -> Result<()> {
        let result = sqlx::query(
            "UPDATE goods_skus SET stock = stock + $2, updated_at = now() WHERE id = $1",
        )
        .bind(sku_id.as_i64())
        .bind(i64::from(quantity))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("sku {sku_id}")));
        }
        Ok(())
    }

    async fn set_sku_stock(&self, sku_id: SkuId, stock: i64) -> Result<()> {
        let result =
            sqlx::query("UPDATE goods_skus SET stock = $2, updated_at = now() WHERE id = $1")
                .bind(sku_id.as_i64())
                .bind(stock)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("sku {sku_id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresStore {
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        batch: usize,
        lease: Duration,
    ) -> Result<Vec<OutboxRecord>> {
        let lease_until =
            now + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::zero());

        // SKIP LOCKED keeps concurrent relays from claiming the same rows;
        // the pushed-forward due time keeps them claimed after commit.
        let rows = sqlx::query(
            r#"
            UPDATE local_messages
            SET next_retry_time = $1
            WHERE id IN (
                SELECT id FROM local_messages
                WHERE status IN (0, 2) AND next_retry_time <= $2
                ORDER BY id
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(lease_until)
        .bind(now)
        .bind(batch as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_delivered(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE local_messages SET status = 1, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reschedule(
        &self,
        id: i64,
        try_count: u32,
        next_retry_time: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE local_messages
            SET status = 2, try_count = $2, next_retry_time = $3, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(try_count as i32)
        .bind(next_retry_time)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn undelivered_count(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM local_messages WHERE status <> 1")
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl FailedMessageLedger for PostgresStore {
    async fn upsert(&self, message: NewFailedMessage) -> Result<UpsertOutcome> {
        // xmax = 0 only for freshly inserted rows.
        let row = sqlx::query(
            r#"
            INSERT INTO failed_messages
                (fingerprint, queue_name, exchange_name, routing_key, retry_count,
                 message_body, message_data, headers, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
            ON CONFLICT (fingerprint) DO UPDATE SET updated_at = now()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(&message.fingerprint)
        .bind(&message.queue_name)
        .bind(&message.exchange_name)
        .bind(&message.routing_key)
        .bind(message.retry_count as i32)
        .bind(&message.message_body)
        .bind(&message.message_data)
        .bind(&message.headers)
        .fetch_one(&self.pool)
        .await?;

        if row.try_get::<bool, _>("inserted")? {
            Ok(UpsertOutcome::Inserted)
        } else {
            Ok(UpsertOutcome::Touched)
        }
    }

    async fn list(&self, id: Option<i64>) -> Result<Vec<FailedMessageRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM failed_messages
            WHERE status = 'pending' AND ($1::bigint IS NULL OR id = $1)
            ORDER BY id
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::row_to_failed).collect()
    }

    async fn delete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM failed_messages WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
