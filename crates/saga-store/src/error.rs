use common::{OrderId, SagaId};
use thiserror::Error;

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No saga with this id exists, or an update matched zero rows.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// A saga with this id already exists.
    #[error("Saga already exists: {0}")]
    Duplicate(SagaId),

    /// A saga has already been started for this order.
    #[error("A saga already exists for order {0}")]
    DuplicateOrder(OrderId),

    /// The stored version moved on since the saga was read.
    #[error("Version conflict for saga {saga_id}: expected version {expected}, found {actual}")]
    VersionConflict {
        saga_id: SagaId,
        expected: i64,
        actual: i64,
    },

    /// A stored row carries a step name this build does not know.
    #[error("Invalid stored saga step: {0}")]
    InvalidStep(String),

    /// The backing store cannot be reached.
    #[error("Saga store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Returns true for the conflicts the caller resolves by re-reading.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
