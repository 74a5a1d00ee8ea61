//! Store error types.

use thiserror::Error;

/// Errors that can occur in the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored status code could not be decoded.
    #[error(transparent)]
    Status(#[from] domain::StatusError),

    /// Referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A unique key already exists.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
