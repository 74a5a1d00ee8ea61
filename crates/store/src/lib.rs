pub mod error;
pub mod ledger;
pub mod memory;
pub mod orders;
pub mod outbox;
pub mod postgres;

pub use error::{Result, StoreError};
pub use ledger::{FailedMessageLedger, FailedMessageRecord, LedgerStatus, NewFailedMessage, UpsertOutcome};
pub use memory::InMemoryStore;
pub use orders::{
    NewOrder, NewOrderItem, OrderItemRecord, OrderRecord, OrderStore, OutboxFactory, SkuRecord,
};
pub use outbox::{NewOutboxMessage, OutboxRecord, OutboxStatus, OutboxStore};
pub use postgres::PostgresStore;
