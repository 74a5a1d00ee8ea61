pub mod error;
pub mod memory;
pub mod redis_store;
pub mod reservation;
pub mod stock;

pub use error::{InventoryError, Result};
pub use memory::InMemoryStockStore;
pub use redis_store::RedisStockStore;
pub use reservation::{ReservationEngine, ReservationEngineConfig, ReservationOutcome};
pub use stock::{StockStore, deduct_lock_key, reserve_lock_key, rollback_lock_key, stock_key};
