//! End-to-end pipeline tests over the in-memory broker and stores.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use broker::Broker;
use broker::envelope::{MessageEnvelope, X_ORIGINAL_EXCHANGE, X_ORIGINAL_QUEUE, X_ORIGINAL_ROUTING_KEY, X_REQUEUED};
use broker::memory::InMemoryBroker;
use broker::topology::{
    self, DLX_EXCHANGE, GLOBAL_DLQ, INVENTORY_DEDUCT, INVENTORY_ROLLBACK, ORDER_CREATED,
    ORDER_EVENTS_EXCHANGE, ORDER_TIMEOUT, QueueSpec,
};
use common::{AddressId, GoodsId, SkuId, UserId};
use domain::{Money, OrderStatus};
use inventory::{InMemoryStockStore, ReservationEngine, ReservationEngineConfig, StockStore, stock_key};
use pipeline::{
    ConsumerRuntime, CreateOrderRequest, DeadLetterIntake, DeliveryMode, EventPublisher,
    IntakeOutcome, InventoryFamily, OrderDraftItem, OrderEventsFamily, OrderOrchestrator,
    OrchestratorConfig, OutboxRelay, PipelineError, ProcessOutcome, QueueFamily, Replayer, Result,
    StockSync,
};
use store::{
    FailedMessageLedger, InMemoryStore, NewOutboxMessage, OrderStore, OutboxStatus, UpsertOutcome,
};

struct Fixture {
    broker: Arc<InMemoryBroker>,
    store: Arc<InMemoryStore>,
    stock: Arc<InMemoryStockStore>,
    orchestrator: OrderOrchestrator,
}

async fn fixture() -> Fixture {
    let broker = Arc::new(InMemoryBroker::new());
    let store = Arc::new(InMemoryStore::new());
    let stock = Arc::new(InMemoryStockStore::new());

    topology::declare_all(broker.as_ref(), false).await.unwrap();

    let engine = ReservationEngine::new(stock.clone(), ReservationEngineConfig::default());
    let publisher = EventPublisher::new(broker.clone());
    let orchestrator = OrderOrchestrator::new(
        store.clone(),
        engine,
        publisher,
        OrchestratorConfig::default(),
    );

    store.insert_sku(store::SkuRecord {
        id: SkuId::new(1),
        goods_id: GoodsId::new(101),
        goods_name: "keyboard".into(),
        specs: serde_json::json!({"layout": "ansi"}),
        price: Money::from_cents(4_500),
        stock: 10,
    });
    store.insert_sku(store::SkuRecord {
        id: SkuId::new(2),
        goods_id: GoodsId::new(102),
        goods_name: "mouse".into(),
        specs: serde_json::json!({}),
        price: Money::from_cents(2_000),
        stock: 5,
    });

    Fixture {
        broker,
        store,
        stock,
        orchestrator,
    }
}

fn request(mode: DeliveryMode, items: Vec<(i64, u32)>) -> CreateOrderRequest {
    CreateOrderRequest {
        user_id: UserId::new(7),
        address_id: AddressId::new(3),
        items: items
            .into_iter()
            .map(|(sku, quantity)| OrderDraftItem {
                sku_id: SkuId::new(sku),
                quantity,
            })
            .collect(),
        remark: String::new(),
        mode,
    }
}

async fn mirrored(stock: &InMemoryStockStore, sku: i64) -> Option<i64> {
    stock.get(&stock_key(SkuId::new(sku))).await.unwrap()
}

#[tokio::test]
async fn test_dual_order_persists_rows_and_publishes_events() {
    let fx = fixture().await;

    let receipt = fx
        .orchestrator
        .create_order(request(DeliveryMode::Dual, vec![(1, 2), (2, 1)]))
        .await
        .unwrap();

    // 2 * 45.00 + 1 * 20.00
    assert_eq!(receipt.total_amount, Money::from_cents(11_000));
    assert_eq!(receipt.order_no.len(), 24);

    let order = fx.store.get_order(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_amount, Money::from_cents(11_000));
    assert_eq!(
        fx.store.items_for_order(receipt.order_id).await.unwrap().len(),
        2
    );

    // Outbox: creation + one deduct per item + delayed timeout.
    let outbox = fx.store.outbox_rows();
    assert_eq!(outbox.len(), 4);
    assert!(outbox.iter().all(|r| r.status == OutboxStatus::Pending));

    // Direct copies are already on the broker; the timeout is held by the
    // delayed exchange until its delay elapses.
    assert_eq!(fx.broker.queue_depth("order_created"), 1);
    assert_eq!(fx.broker.queue_depth("inventory_deduct"), 2);
    assert_eq!(fx.broker.queue_depth("order_timeout"), 0);
    fx.broker.release_delayed();
    assert_eq!(fx.broker.queue_depth("order_timeout"), 1);

    // Cache mirrors were decremented at reservation time.
    assert_eq!(mirrored(&fx.stock, 1).await, Some(8));
    assert_eq!(mirrored(&fx.stock, 2).await, Some(4));
}

#[tokio::test]
async fn test_insufficient_stock_releases_earlier_reservations() {
    let fx = fixture().await;

    let result = fx
        .orchestrator
        .create_order(request(DeliveryMode::Dual, vec![(1, 2), (2, 9)]))
        .await;

    match result {
        Err(PipelineError::InsufficientStock { sku_id }) => {
            assert_eq!(sku_id, SkuId::new(2));
        }
        other => panic!("expected insufficient stock, got {other:?}"),
    }

    // Item 1's reservation was compensated; no order row exists.
    assert_eq!(mirrored(&fx.stock, 1).await, Some(10));
    assert_eq!(fx.store.order_count(), 0);
    assert!(fx.store.outbox_rows().is_empty());
    assert_eq!(fx.broker.queue_depth("order_created"), 0);
}

#[tokio::test]
async fn test_validation_rejects_before_any_side_effect() {
    let fx = fixture().await;

    for bad in [
        request(DeliveryMode::Dual, vec![]),
        request(DeliveryMode::Dual, vec![(1, 0)]),
        request(DeliveryMode::Dual, vec![(999, 1)]),
    ] {
        let result = fx.orchestrator.create_order(bad).await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    assert_eq!(fx.store.order_count(), 0);
    assert_eq!(fx.broker.published_count(), 0);
    assert_eq!(mirrored(&fx.stock, 1).await, None);
}

#[tokio::test]
async fn test_cache_only_publish_failure_rolls_back_reservations() {
    let fx = fixture().await;
    fx.broker.set_fail_publishes(true);

    let result = fx
        .orchestrator
        .create_order(request(DeliveryMode::CacheOnly, vec![(1, 3)]))
        .await;

    assert!(matches!(result, Err(PipelineError::PublicationFailed(_))));
    // The synthetic failure released the reservation.
    assert_eq!(mirrored(&fx.stock, 1).await, Some(10));
    assert!(fx.store.outbox_rows().is_empty());
}

#[tokio::test]
async fn test_dual_swallows_publish_failure_because_outbox_covers_it() {
    let fx = fixture().await;
    fx.broker.set_fail_publishes(true);

    let receipt = fx
        .orchestrator
        .create_order(request(DeliveryMode::Dual, vec![(1, 1)]))
        .await
        .unwrap();

    // Reservation stands, outbox rows exist, nothing reached the broker yet.
    assert_eq!(mirrored(&fx.stock, 1).await, Some(9));
    assert_eq!(fx.store.outbox_rows().len(), 3);
    assert_eq!(fx.broker.queue_depth("order_created"), 0);

    // Once the broker recovers, the relay delivers what the direct path lost.
    fx.broker.set_fail_publishes(false);
    let relay = OutboxRelay::new(fx.store.clone(), fx.broker.clone());
    for row in fx.store.outbox_rows() {
        fx.store.set_outbox_due(row.id, chrono::Utc::now());
    }
    relay.drain_once().await.unwrap();
    assert_eq!(fx.broker.queue_depth("order_created"), 1);
    assert!(fx
        .store
        .outbox_rows()
        .iter()
        .all(|r| r.status == OutboxStatus::Delivered));

    let _ = receipt;
}

#[tokio::test]
async fn test_outbox_only_mode_skips_cache_and_direct_publish() {
    let fx = fixture().await;

    fx.orchestrator
        .create_order(request(DeliveryMode::OutboxOnly, vec![(1, 2)]))
        .await
        .unwrap();

    assert_eq!(mirrored(&fx.stock, 1).await, None);
    assert_eq!(fx.broker.published_count(), 0);
    assert_eq!(fx.store.outbox_rows().len(), 3);
}

#[tokio::test]
async fn test_timeout_cancels_order_and_restores_stock_idempotently() {
    let fx = fixture().await;

    let receipt = fx
        .orchestrator
        .create_order(request(DeliveryMode::Dual, vec![(1, 2), (2, 1)]))
        .await
        .unwrap();

    let orders = ConsumerRuntime::new(
        fx.broker.clone(),
        Arc::new(OrderEventsFamily::new(fx.orchestrator.clone())),
    );
    let inventory = ConsumerRuntime::new(
        fx.broker.clone(),
        Arc::new(InventoryFamily::new(fx.store.clone(), fx.stock.clone())),
    );

    // Apply the authoritative deducts first.
    assert_eq!(
        inventory.poll_once(&INVENTORY_DEDUCT).await.unwrap(),
        Some(ProcessOutcome::Acked)
    );
    assert_eq!(
        inventory.poll_once(&INVENTORY_DEDUCT).await.unwrap(),
        Some(ProcessOutcome::Acked)
    );
    assert_eq!(fx.store.sku_stock(SkuId::new(1)), Some(8));
    assert_eq!(fx.store.sku_stock(SkuId::new(2)), Some(4));

    // The payment window elapses and the timeout fires.
    fx.broker.release_delayed();
    assert_eq!(
        orders.poll_once(&ORDER_TIMEOUT).await.unwrap(),
        Some(ProcessOutcome::Acked)
    );

    let order = fx.store.get_order(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.cancel_reason.as_deref(), Some("payment timeout"));

    // One rollback event per item.
    assert_eq!(fx.broker.queue_depth("inventory_rollback"), 2);
    while inventory
        .poll_once(&INVENTORY_ROLLBACK)
        .await
        .unwrap()
        .is_some()
    {}

    // Both relational and mirrored stock are back to their initial values.
    assert_eq!(fx.store.sku_stock(SkuId::new(1)), Some(10));
    assert_eq!(fx.store.sku_stock(SkuId::new(2)), Some(5));
    assert_eq!(mirrored(&fx.stock, 1).await, Some(10));
    assert_eq!(mirrored(&fx.stock, 2).await, Some(5));

    // A redelivered timeout no longer matches the conditional update.
    let timeout = domain::OrderTimeout::new(receipt.order_id, 0);
    fx.broker
        .publish(
            topology::ORDER_TIMEOUT_EXCHANGE,
            "order.timeout",
            MessageEnvelope::json(&timeout).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        orders.poll_once(&ORDER_TIMEOUT).await.unwrap(),
        Some(ProcessOutcome::Acked)
    );
    assert_eq!(fx.broker.queue_depth("inventory_rollback"), 0);
    assert_eq!(mirrored(&fx.stock, 1).await, Some(10));
}

#[tokio::test]
async fn test_paid_order_survives_timeout() {
    let fx = fixture().await;

    let receipt = fx
        .orchestrator
        .create_order(request(DeliveryMode::Dual, vec![(1, 1)]))
        .await
        .unwrap();
    assert!(fx.orchestrator.pay_order(receipt.order_id).await.unwrap());

    let orders = ConsumerRuntime::new(
        fx.broker.clone(),
        Arc::new(OrderEventsFamily::new(fx.orchestrator.clone())),
    );
    fx.broker.release_delayed();
    assert_eq!(
        orders.poll_once(&ORDER_TIMEOUT).await.unwrap(),
        Some(ProcessOutcome::Acked)
    );

    let order = fx.store.get_order(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(fx.broker.queue_depth("inventory_rollback"), 0);
}

#[tokio::test]
async fn test_duplicate_deduct_delivery_is_absorbed_by_marker() {
    let fx = fixture().await;
    let inventory = ConsumerRuntime::new(
        fx.broker.clone(),
        Arc::new(InventoryFamily::new(fx.store.clone(), fx.stock.clone())),
    );

    let deduct = domain::InventoryDeduct::new(common::OrderId::new(42), SkuId::new(1), 3);
    for _ in 0..2 {
        fx.broker
            .publish(
                topology::INVENTORY_EVENTS_EXCHANGE,
                "inventory.deduct",
                MessageEnvelope::json(&deduct).unwrap(),
            )
            .await
            .unwrap();
    }

    assert_eq!(
        inventory.poll_once(&INVENTORY_DEDUCT).await.unwrap(),
        Some(ProcessOutcome::Acked)
    );
    assert_eq!(
        inventory.poll_once(&INVENTORY_DEDUCT).await.unwrap(),
        Some(ProcessOutcome::Acked)
    );
    // Deducted once, not twice.
    assert_eq!(fx.store.sku_stock(SkuId::new(1)), Some(7));
}

#[tokio::test]
async fn test_order_no_entry_points() {
    let fx = fixture().await;

    let receipt = fx
        .orchestrator
        .create_order(request(DeliveryMode::Dual, vec![(1, 1)]))
        .await
        .unwrap();

    // Cancellation is refused for another user's order.
    assert!(!fx
        .orchestrator
        .cancel_order_by_no(&receipt.order_no, UserId::new(999), "changed my mind")
        .await
        .unwrap());
    assert!(fx
        .orchestrator
        .cancel_order_by_no(&receipt.order_no, UserId::new(7), "changed my mind")
        .await
        .unwrap());
    assert_eq!(fx.broker.queue_depth("inventory_rollback"), 1);

    // A cancelled order is no longer payable; unknown numbers are harmless.
    assert!(!fx.orchestrator.pay_order_by_no(&receipt.order_no).await.unwrap());
    assert!(!fx.orchestrator.pay_order_by_no("nope").await.unwrap());
}

struct AlwaysFails;

#[async_trait]
impl QueueFamily for AlwaysFails {
    fn describe(&self) -> &'static str {
        "always-fails"
    }

    fn queues(&self) -> Vec<QueueSpec> {
        vec![ORDER_CREATED]
    }

    async fn handle(&self, _data: serde_json::Value, _queue: &QueueSpec) -> Result<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_retry_budget_then_dead_letter_then_ledger() {
    let fx = fixture().await;
    let runtime = ConsumerRuntime::new(fx.broker.clone(), Arc::new(AlwaysFails));

    fx.broker
        .publish(
            ORDER_EVENTS_EXCHANGE,
            "order.created",
            MessageEnvelope::raw(r#"{"order_id":1}"#),
        )
        .await
        .unwrap();

    // Budget is 3: the first failure plus each TTL redelivery schedules a
    // retry, the fourth failure dead-letters.
    for _ in 0..ORDER_CREATED.max_retries {
        assert_eq!(
            runtime.poll_once(&ORDER_CREATED).await.unwrap(),
            Some(ProcessOutcome::RetryScheduled)
        );
        assert_eq!(fx.broker.queue_depth("order_created.retry"), 1);
        fx.broker.expire_retry_queues();
        assert_eq!(fx.broker.queue_depth("order_created"), 1);
    }
    assert_eq!(
        runtime.poll_once(&ORDER_CREATED).await.unwrap(),
        Some(ProcessOutcome::DeadLettered)
    );

    assert_eq!(fx.broker.queue_depth("order_created.dlx"), 1);
    assert_eq!(fx.broker.queue_depth(GLOBAL_DLQ), 1);

    // Every pulled message was acked exactly once.
    assert_eq!(fx.broker.acked_count(), u64::from(ORDER_CREATED.max_retries) + 1);

    let intake = DeadLetterIntake::new(fx.broker.clone(), fx.store.clone());
    assert_eq!(
        intake.poll_once().await.unwrap(),
        Some(IntakeOutcome::Recorded(UpsertOutcome::Inserted))
    );

    let rows = fx.store.ledger_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].queue_name, "order_created");
    assert_eq!(rows[0].retry_count, ORDER_CREATED.max_retries);
    assert_eq!(rows[0].exchange_name, ORDER_EVENTS_EXCHANGE);
    assert_eq!(rows[0].routing_key, "order.created");
    assert_eq!(rows[0].message_data["order_id"], 1);
}

#[tokio::test]
async fn test_intake_acks_even_when_ledger_write_fails() {
    let fx = fixture().await;
    let intake = DeadLetterIntake::new(fx.broker.clone(), fx.store.clone());

    fx.broker
        .publish(DLX_EXCHANGE, "order_created.dlx", MessageEnvelope::raw("{}"))
        .await
        .unwrap();
    fx.store.set_fail_ledger_upsert(true);

    // The write failure is visible to the caller, and the DLQ still drains.
    assert_eq!(
        intake.poll_once().await.unwrap(),
        Some(IntakeOutcome::RecordFailed)
    );
    assert_eq!(fx.broker.queue_depth(GLOBAL_DLQ), 0);
    assert!(fx.store.ledger_rows().is_empty());
}

#[tokio::test]
async fn test_intake_dedupes_identical_dead_letters() {
    let fx = fixture().await;
    let intake = DeadLetterIntake::new(fx.broker.clone(), fx.store.clone());

    for _ in 0..2 {
        fx.broker
            .publish(
                DLX_EXCHANGE,
                "order_created.dlx",
                MessageEnvelope::raw(r#"{"order_id":1}"#)
                    .with_retry_count(3)
                    .with_header(X_ORIGINAL_QUEUE, "order_created".into())
                    .with_header(X_ORIGINAL_EXCHANGE, ORDER_EVENTS_EXCHANGE.into())
                    .with_header(X_ORIGINAL_ROUTING_KEY, "order.created".into()),
            )
            .await
            .unwrap();
    }

    assert_eq!(
        intake.poll_once().await.unwrap(),
        Some(IntakeOutcome::Recorded(UpsertOutcome::Inserted))
    );
    assert_eq!(
        intake.poll_once().await.unwrap(),
        Some(IntakeOutcome::Recorded(UpsertOutcome::Touched))
    );
    assert_eq!(fx.store.ledger_rows().len(), 1);
    // The global DLQ itself is drained either way.
    assert_eq!(fx.broker.queue_depth(GLOBAL_DLQ), 0);
}

#[tokio::test]
async fn test_relay_walks_backoff_ladder_on_failure() {
    let fx = fixture().await;
    let relay = OutboxRelay::new(fx.store.clone(), fx.broker.clone());

    let id = fx.store.push_outbox(NewOutboxMessage::new(
        "m1",
        ORDER_EVENTS_EXCHANGE,
        "order.created",
        r#"{"order_id":1}"#,
    ));

    fx.broker.set_fail_publishes(true);
    fx.store.set_outbox_due(id, chrono::Utc::now());
    relay.drain_once().await.unwrap();

    let row = &fx.store.outbox_rows()[0];
    assert_eq!(row.status, OutboxStatus::FailedRetrying);
    assert_eq!(row.try_count, 1);
    // First rung of the ladder: ~10s out.
    let delta = row.next_retry_time - chrono::Utc::now();
    assert!(delta > chrono::Duration::seconds(5) && delta <= chrono::Duration::seconds(10));

    // Recovered broker: the rescheduled row is claimed once due and delivered.
    fx.broker.set_fail_publishes(false);
    fx.store.set_outbox_due(id, chrono::Utc::now());
    relay.drain_once().await.unwrap();
    assert_eq!(fx.store.outbox_rows()[0].status, OutboxStatus::Delivered);
    assert_eq!(fx.broker.queue_depth("order_created"), 1);
}

#[tokio::test]
async fn test_relayed_timeout_row_keeps_its_delay() {
    let fx = fixture().await;

    let receipt = fx
        .orchestrator
        .create_order(request(DeliveryMode::OutboxOnly, vec![(1, 1)]))
        .await
        .unwrap();

    let relay = OutboxRelay::new(fx.store.clone(), fx.broker.clone());
    for row in fx.store.outbox_rows() {
        fx.store.set_outbox_due(row.id, chrono::Utc::now());
    }
    relay.drain_once().await.unwrap();

    // The relayed timeout copy is held by the delayed exchange. Routing it
    // straight to the queue would cancel the order long before the payment
    // window closes.
    assert_eq!(fx.broker.queue_depth("order_created"), 1);
    assert_eq!(fx.broker.queue_depth("order_timeout"), 0);

    let orders = ConsumerRuntime::new(
        fx.broker.clone(),
        Arc::new(OrderEventsFamily::new(fx.orchestrator.clone())),
    );
    assert_eq!(orders.poll_once(&ORDER_TIMEOUT).await.unwrap(), None);
    let order = fx.store.get_order(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);

    fx.broker.release_delayed();
    assert_eq!(fx.broker.queue_depth("order_timeout"), 1);
}

#[tokio::test]
async fn test_cancel_commits_even_when_rollback_publish_fails() {
    let fx = fixture().await;

    let receipt = fx
        .orchestrator
        .create_order(request(DeliveryMode::Dual, vec![(1, 1)]))
        .await
        .unwrap();

    fx.broker.set_fail_publishes(true);
    assert!(fx
        .orchestrator
        .cancel_order(receipt.order_id, "manual")
        .await
        .unwrap());

    let order = fx.store.get_order(receipt.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(fx.broker.queue_depth("inventory_rollback"), 0);
}

#[tokio::test]
async fn test_stock_sync_copies_mirror_into_rows() {
    let fx = fixture().await;

    // Reservation decrements the mirror for sku 1; the row keeps its old
    // value until the deduct consumer runs. Sku 2 has no mirror entry.
    fx.orchestrator
        .create_order(request(DeliveryMode::Dual, vec![(1, 3)]))
        .await
        .unwrap();
    assert_eq!(mirrored(&fx.stock, 1).await, Some(7));
    assert_eq!(fx.store.sku_stock(SkuId::new(1)), Some(10));

    let sync = StockSync::new(fx.store.clone(), fx.stock.clone());
    assert_eq!(sync.sync_all().await.unwrap(), 1);
    assert_eq!(fx.store.sku_stock(SkuId::new(1)), Some(7));
    assert_eq!(fx.store.sku_stock(SkuId::new(2)), Some(5));

    // A second sweep finds nothing out of line.
    assert_eq!(sync.sync_all().await.unwrap(), 0);
}

#[tokio::test]
async fn test_two_relays_never_double_publish() {
    let fx = fixture().await;
    let relay_a = OutboxRelay::new(fx.store.clone(), fx.broker.clone());
    let relay_b = OutboxRelay::new(fx.store.clone(), fx.broker.clone());

    let id = fx.store.push_outbox(NewOutboxMessage::new(
        "m1",
        ORDER_EVENTS_EXCHANGE,
        "order.created",
        "{}",
    ));
    fx.store.set_outbox_due(id, chrono::Utc::now());

    // The first relay claims the row; the second finds nothing due.
    assert_eq!(relay_a.drain_once().await.unwrap(), 1);
    assert_eq!(relay_b.drain_once().await.unwrap(), 0);
    assert_eq!(fx.broker.queue_depth("order_created"), 1);
}

#[tokio::test]
async fn test_replay_republishes_and_deletes_ledger_row() {
    let fx = fixture().await;

    fx.store
        .upsert(store::NewFailedMessage {
            fingerprint: "fp".into(),
            queue_name: "order_created".into(),
            exchange_name: ORDER_EVENTS_EXCHANGE.into(),
            routing_key: "order.created".into(),
            retry_count: 3,
            message_body: r#"{"order_id":1}"#.into(),
            message_data: serde_json::json!({"order_id": 1}),
            headers: serde_json::json!({}),
        })
        .await
        .unwrap();

    let replayer = Replayer::new(fx.broker.clone(), fx.store.clone());
    let summary = replayer.replay(None).await.unwrap();
    assert_eq!(summary.replayed, 1);
    assert_eq!(summary.failed, 0);
    assert!(fx.store.ledger_rows().is_empty());

    let delivery = fx.broker.get("order_created").await.unwrap().unwrap();
    assert_eq!(delivery.headers[X_REQUEUED], serde_json::Value::Bool(true));
    // The replayed copy starts with a fresh retry budget.
    assert_eq!(delivery.retry_count(), 0);
}

#[tokio::test]
async fn test_replay_keeps_row_when_publish_fails() {
    let fx = fixture().await;
    fx.store
        .upsert(store::NewFailedMessage {
            fingerprint: "fp".into(),
            queue_name: "order_created".into(),
            exchange_name: ORDER_EVENTS_EXCHANGE.into(),
            routing_key: "order.created".into(),
            retry_count: 3,
            message_body: "{}".into(),
            message_data: serde_json::json!({}),
            headers: serde_json::json!({}),
        })
        .await
        .unwrap();

    fx.broker.set_fail_publishes(true);
    let replayer = Replayer::new(fx.broker.clone(), fx.store.clone());
    let summary = replayer.replay(None).await.unwrap();
    assert_eq!(summary.replayed, 0);
    assert_eq!(summary.failed, 1);
    assert_eq!(fx.store.ledger_rows().len(), 1);
}
