//! Inventory error types.

use thiserror::Error;

/// Errors from the stock store and reservation engine.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The underlying key-value store is unreachable or failed.
    ///
    /// Callers must treat this as unknown outcome: the reservation may or
    /// may not have been applied, and no rollback can be assumed.
    #[error("stock store error: {0}")]
    Store(#[from] redis::RedisError),

    /// Requested quantity was zero or negative.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(i64),

    /// The per-SKU reservation lock is held by another caller.
    #[error("reservation lock busy for key {0}")]
    LockBusy(String),
}

/// Convenience type alias for inventory results.
pub type Result<T> = std::result::Result<T, InventoryError>;
