//! Error types for the storage layer

use bioflow_core::domain::partition::PartitionKey;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the registry and ledger backends
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database query failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored metadata could not be encoded or decoded
    #[error("metadata serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A key was rejected as a duplicate despite idempotent registration.
    /// Indicates a bug in the storage backend.
    #[error("registration conflict for key '{key}' in dimension '{dimension}'")]
    RegistrationConflict {
        dimension: String,
        key: PartitionKey,
    },

    /// An in-memory store lock was poisoned by a panicking writer
    #[error("store lock poisoned: {0}")]
    LockPoisoned(String),
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        StoreError::LockPoisoned(err.to_string())
    }
}
