//! The reliable-messaging pipeline: order creation with inventory
//! reservation, the consumer runtime with retry/dead-letter routing, the
//! outbox relay, and the dead-letter intake plus replay tooling.

pub mod consumer;
pub mod error;
pub mod families;
pub mod fingerprint;
pub mod intake;
pub mod orchestrator;
pub mod publisher;
pub mod relay;
pub mod replay;
pub mod stock_sync;

pub use consumer::{ConsumerRuntime, ConsumerRuntimeConfig, ProcessOutcome, QueueFamily};
pub use error::{PipelineError, Result};
pub use families::{InventoryFamily, OrderEventsFamily};
pub use fingerprint::fingerprint;
pub use intake::{DeadLetterIntake, DeadLetterIntakeConfig, IntakeOutcome};
pub use orchestrator::{
    CreateOrderRequest, DeliveryMode, OrderDraftItem, OrderOrchestrator, OrchestratorConfig,
    OrderReceipt,
};
pub use publisher::EventPublisher;
pub use relay::{OutboxRelay, OutboxRelayConfig, backoff_delay};
pub use replay::{ReplaySummary, Replayer};
pub use stock_sync::StockSync;
