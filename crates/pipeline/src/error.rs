//! Pipeline error types.

use common::SkuId;
use thiserror::Error;

/// Errors surfaced by the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Broker error.
    #[error(transparent)]
    Broker(#[from] broker::BrokerError),

    /// Relational store error.
    #[error(transparent)]
    Store(#[from] store::StoreError),

    /// Inventory store error.
    #[error(transparent)]
    Inventory(#[from] inventory::InventoryError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Bad input, rejected before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Stock shortage; earlier reservations in the same call were released.
    #[error("insufficient stock for sku {sku_id}")]
    InsufficientStock { sku_id: SkuId },

    /// Direct publication failed on a path with no outbox safety net.
    #[error("event publication failed: {0}")]
    PublicationFailed(String),
}

/// Convenience type alias for pipeline results.
pub type Result<T> = std::result::Result<T, PipelineError>;
