//! Broker error types.

use thiserror::Error;

/// Errors that can occur talking to the message broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Underlying AMQP transport failure.
    #[error("AMQP transport error: {0}")]
    Transport(#[from] lapin::Error),

    /// Payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The named exchange or queue has not been declared.
    #[error("Unknown broker object: {0}")]
    NotFound(String),

    /// The broker refused or dropped a publish.
    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

/// Convenience type alias for broker results.
pub type Result<T> = std::result::Result<T, BrokerError>;
