//! Order creation, payment, and cancellation orchestration.

use std::sync::Arc;
use std::time::Duration;

use common::{AddressId, OrderId, SkuId, UserId};
use domain::{
    InventoryDeduct, InventoryRollback, Money, OrderCreated, OrderTimeout, RollbackItem,
    generate_order_no,
};
use inventory::{ReservationEngine, ReservationOutcome};
use store::{NewOrder, NewOrderItem, OrderStore, SkuRecord};

use crate::error::{PipelineError, Result};
use crate::publisher::{EventPublisher, outbox_rows_for_order};

/// How created-order events reach the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Reserve in cache, publish directly. No outbox safety net: a publish
    /// failure fails the order and releases the reservations.
    CacheOnly,
    /// No cache reservation; events ride the outbox only.
    OutboxOnly,
    /// Reserve in cache, write outbox rows, and best-effort publish
    /// directly. Publish failures are absorbed by the outbox.
    Dual,
}

impl DeliveryMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cache-only" | "cache_only" => Some(DeliveryMode::CacheOnly),
            "outbox-only" | "outbox_only" => Some(DeliveryMode::OutboxOnly),
            "dual" => Some(DeliveryMode::Dual),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryMode::CacheOnly => "cache-only",
            DeliveryMode::OutboxOnly => "outbox-only",
            DeliveryMode::Dual => "dual",
        }
    }

    fn uses_cache(self) -> bool {
        matches!(self, DeliveryMode::CacheOnly | DeliveryMode::Dual)
    }

    fn uses_outbox(self) -> bool {
        matches!(self, DeliveryMode::OutboxOnly | DeliveryMode::Dual)
    }

    fn publishes_directly(self) -> bool {
        matches!(self, DeliveryMode::CacheOnly | DeliveryMode::Dual)
    }
}

/// One requested order line.
#[derive(Debug, Clone)]
pub struct OrderDraftItem {
    pub sku_id: SkuId,
    pub quantity: u32,
}

/// Input to [`OrderOrchestrator::create_order`].
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub user_id: UserId,
    pub address_id: AddressId,
    pub items: Vec<OrderDraftItem>,
    pub remark: String,
    pub mode: DeliveryMode,
}

/// What the caller gets back on success.
#[derive(Debug, Clone)]
pub struct OrderReceipt {
    pub order_id: OrderId,
    pub order_no: String,
    pub total_amount: Money,
    pub mode: DeliveryMode,
}

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Payment window; the timeout event fires after this long.
    pub timeout_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            timeout_delay: Duration::from_secs(1_800),
        }
    }
}

/// Composes the reservation engine, the relational transaction, and event
/// publication into the three delivery strategies.
#[derive(Clone)]
pub struct OrderOrchestrator {
    store: Arc<dyn OrderStore>,
    reservations: ReservationEngine,
    publisher: EventPublisher,
    config: OrchestratorConfig,
}

impl OrderOrchestrator {
    pub fn new(
        store: Arc<dyn OrderStore>,
        reservations: ReservationEngine,
        publisher: EventPublisher,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            reservations,
            publisher,
            config,
        }
    }

    /// Creates an order.
    ///
    /// Reservations are sequential per item; the first failure releases
    /// every earlier reservation of this call before erroring, so the
    /// reservation layer is all-or-nothing even without a multi-key
    /// transaction. The relational insert is a single transaction covering
    /// the order header, its items, and (for outbox modes) the outbox rows.
    pub async fn create_order(&self, request: CreateOrderRequest) -> Result<OrderReceipt> {
        self.validate(&request)?;

        let sku_ids: Vec<SkuId> = request.items.iter().map(|i| i.sku_id).collect();
        let skus = self.store.get_skus(&sku_ids).await?;
        for item in &request.items {
            if !skus.contains_key(&item.sku_id) {
                return Err(PipelineError::Validation(format!(
                    "sku {} not found",
                    item.sku_id
                )));
            }
        }

        if request.mode.uses_cache() {
            self.reserve_all(&request.items, &skus).await?;
        }

        let order_no = generate_order_no();
        let total_amount: Money = request
            .items
            .iter()
            .map(|item| skus[&item.sku_id].price.times(item.quantity))
            .sum();

        let new_order = NewOrder {
            order_no: order_no.clone(),
            user_id: request.user_id,
            address_id: request.address_id,
            total_amount,
            pay_amount: total_amount,
            remark: request.remark.clone(),
        };
        let new_items: Vec<NewOrderItem> = request
            .items
            .iter()
            .map(|item| {
                let sku = &skus[&item.sku_id];
                NewOrderItem {
                    goods_id: sku.goods_id,
                    sku_id: sku.id,
                    goods_name: sku.goods_name.clone(),
                    sku_specs: sku.specs.clone(),
                    price: sku.price,
                    quantity: item.quantity,
                    total_price: sku.price.times(item.quantity),
                }
            })
            .collect();

        let outbox_items: Vec<(SkuId, u32)> = request
            .items
            .iter()
            .map(|i| (i.sku_id, i.quantity))
            .collect();
        let timeout_delay = self.config.timeout_delay;
        let wants_outbox = request.mode.uses_outbox();

        let created = self
            .store
            .create_order(
                new_order,
                new_items,
                Box::new(move |order_id| {
                    if wants_outbox {
                        outbox_rows_for_order(order_id, &outbox_items, timeout_delay)
                            .unwrap_or_default()
                    } else {
                        Vec::new()
                    }
                }),
            )
            .await;

        let order = match created {
            Ok(order) => order,
            Err(err) => {
                if request.mode.uses_cache() {
                    self.release_all(&request.items).await;
                }
                return Err(err.into());
            }
        };

        if request.mode.publishes_directly() {
            if let Err(err) = self.publish_creation_events(order.id, &request.items).await {
                match request.mode {
                    // No outbox to fall back on: undo the reservations and
                    // surface the failure to the caller.
                    DeliveryMode::CacheOnly => {
                        tracing::error!(order_id = %order.id, error = %err, "publication failed, rolling back reservations");
                        self.release_all(&request.items).await;
                        return Err(PipelineError::PublicationFailed(err.to_string()));
                    }
                    // Outbox rows already guarantee eventual delivery.
                    _ => {
                        tracing::warn!(order_id = %order.id, error = %err, "direct publication failed, outbox will deliver");
                    }
                }
            }
        }

        metrics::counter!("orders_created_total", "mode" => request.mode.as_str()).increment(1);
        tracing::info!(
            order_id = %order.id,
            order_no = %order.order_no,
            mode = request.mode.as_str(),
            total = %total_amount,
            "order created"
        );

        Ok(OrderReceipt {
            order_id: order.id,
            order_no: order.order_no,
            total_amount,
            mode: request.mode,
        })
    }

    /// Marks an order paid. Returns false when it was already paid or does
    /// not exist; concurrent payment callbacks race on the conditional
    /// update, not on application state.
    pub async fn pay_order(&self, order_id: OrderId) -> Result<bool> {
        let paid = self.store.mark_paid(order_id).await?;
        if paid {
            metrics::counter!("orders_paid_total").increment(1);
            tracing::info!(%order_id, "order paid");
        } else {
            tracing::debug!(%order_id, "payment ignored, order not payable");
        }
        Ok(paid)
    }

    /// Payment callback entry point keyed by order number.
    pub async fn pay_order_by_no(&self, order_no: &str) -> Result<bool> {
        match self.store.get_order_by_no(order_no).await? {
            Some(order) => self.pay_order(order.id).await,
            None => Ok(false),
        }
    }

    /// Manual cancellation keyed by order number. The order must belong to
    /// `user_id`; anything else is reported as not-cancelled.
    pub async fn cancel_order_by_no(
        &self,
        order_no: &str,
        user_id: UserId,
        reason: &str,
    ) -> Result<bool> {
        match self.store.get_order_by_no(order_no).await? {
            Some(order) if order.user_id == user_id => self.cancel_order(order.id, reason).await,
            Some(_) => {
                tracing::warn!(order_no, %user_id, "cancel refused, order owned by another user");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Cancels a still-pending unpaid order and emits one inventory-rollback
    /// event per item. Returns false when the order was not cancellable,
    /// which makes repeated timeout deliveries harmless.
    pub async fn cancel_order(&self, order_id: OrderId, reason: &str) -> Result<bool> {
        let Some(items) = self.store.cancel_if_pending(order_id, reason).await? else {
            tracing::debug!(%order_id, "cancel skipped, order not pending");
            return Ok(false);
        };

        // The cancellation is already committed; a failed publish is logged
        // and the remaining items still get their events.
        for item in &items {
            let event = InventoryRollback::new(
                order_id,
                vec![RollbackItem {
                    sku_id: item.sku_id,
                    quantity: item.quantity,
                }],
            );
            if let Err(err) = self.publisher.publish_inventory_rollback(&event).await {
                tracing::error!(
                    %order_id,
                    sku_id = %item.sku_id,
                    error = %err,
                    "rollback event publish failed"
                );
            }
        }

        metrics::counter!("orders_cancelled_total").increment(1);
        tracing::info!(%order_id, reason, items = items.len(), "order cancelled");
        Ok(true)
    }

    fn validate(&self, request: &CreateOrderRequest) -> Result<()> {
        if request.user_id.as_i64() <= 0 {
            return Err(PipelineError::Validation("missing user id".into()));
        }
        if request.address_id.as_i64() <= 0 {
            return Err(PipelineError::Validation("missing address id".into()));
        }
        if request.items.is_empty() {
            return Err(PipelineError::Validation("empty item list".into()));
        }
        for item in &request.items {
            if item.quantity == 0 {
                return Err(PipelineError::Validation(format!(
                    "non-positive quantity for sku {}",
                    item.sku_id
                )));
            }
        }
        Ok(())
    }

    /// Reserves every item in order; on the first failure, releases the
    /// earlier reservations in reverse before erroring.
    async fn reserve_all(
        &self,
        items: &[OrderDraftItem],
        skus: &std::collections::HashMap<SkuId, SkuRecord>,
    ) -> Result<()> {
        let mut reserved: Vec<&OrderDraftItem> = Vec::with_capacity(items.len());
        for item in items {
            let seed = skus[&item.sku_id].stock;
            let outcome = match self
                .reservations
                .reserve(item.sku_id, seed, item.quantity)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    self.compensate(&reserved).await;
                    return Err(err.into());
                }
            };
            match outcome {
                ReservationOutcome::Reserved => reserved.push(item),
                ReservationOutcome::InsufficientStock => {
                    self.compensate(&reserved).await;
                    return Err(PipelineError::InsufficientStock {
                        sku_id: item.sku_id,
                    });
                }
            }
        }
        Ok(())
    }

    async fn compensate(&self, reserved: &[&OrderDraftItem]) {
        for item in reserved.iter().rev() {
            if let Err(err) = self.reservations.release(item.sku_id, item.quantity).await {
                tracing::error!(sku_id = %item.sku_id, error = %err, "compensating release failed");
            }
        }
    }

    async fn release_all(&self, items: &[OrderDraftItem]) {
        for item in items.iter().rev() {
            if let Err(err) = self.reservations.release(item.sku_id, item.quantity).await {
                tracing::error!(sku_id = %item.sku_id, error = %err, "reservation rollback failed");
            }
        }
    }

    async fn publish_creation_events(
        &self,
        order_id: OrderId,
        items: &[OrderDraftItem],
    ) -> Result<()> {
        self.publisher
            .publish_order_created(&OrderCreated::new(order_id))
            .await?;
        for item in items {
            self.publisher
                .publish_inventory_deduct(&InventoryDeduct::new(
                    order_id,
                    item.sku_id,
                    item.quantity,
                ))
                .await?;
        }
        self.publisher
            .publish_order_timeout(&OrderTimeout::new(
                order_id,
                self.config.timeout_delay.as_secs(),
            ))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_mode_parse() {
        assert_eq!(DeliveryMode::parse("dual"), Some(DeliveryMode::Dual));
        assert_eq!(
            DeliveryMode::parse("cache-only"),
            Some(DeliveryMode::CacheOnly)
        );
        assert_eq!(
            DeliveryMode::parse("outbox_only"),
            Some(DeliveryMode::OutboxOnly)
        );
        assert_eq!(DeliveryMode::parse("direct"), None);
    }

    #[test]
    fn test_mode_capabilities() {
        assert!(DeliveryMode::CacheOnly.uses_cache());
        assert!(!DeliveryMode::CacheOnly.uses_outbox());
        assert!(DeliveryMode::OutboxOnly.uses_outbox());
        assert!(!DeliveryMode::OutboxOnly.publishes_directly());
        assert!(DeliveryMode::Dual.uses_cache());
        assert!(DeliveryMode::Dual.uses_outbox());
        assert!(DeliveryMode::Dual.publishes_directly());
    }
}
