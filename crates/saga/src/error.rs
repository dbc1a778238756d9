//! Saga error types.

use std::time::Duration;

use bus::BusError;
use common::{OrderId, SagaId};
use contracts::{ContractError, EventType};
use saga_store::{InvalidTransition, StoreError};
use thiserror::Error;

/// Errors that can occur while handling a saga message.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The message could not be decoded. Never retried.
    #[error("Poison message: {0}")]
    Contract(#[from] ContractError),

    /// A reply referenced a saga that does not exist.
    #[error("Saga not found: {0}")]
    SagaNotFound(SagaId),

    /// A saga was already started for this order.
    #[error("A saga already exists for order {0}")]
    DuplicateSaga(OrderId),

    /// A reply's order id does not belong to the saga it names.
    #[error("Saga {saga_id} belongs to order {expected}, message names order {actual}")]
    OrderMismatch {
        saga_id: SagaId,
        expected: OrderId,
        actual: OrderId,
    },

    /// A reply arrived without the saga id it must carry.
    #[error("{0} carries no saga id")]
    MissingSagaId(EventType),

    /// Concurrent handlers kept moving the saga underneath this one.
    #[error("Gave up on saga {saga_id} after {attempts} version conflicts")]
    ConcurrencyExhausted { saga_id: SagaId, attempts: u32 },

    /// The transition table produced a move the step graph rejects.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    /// The saga store failed.
    #[error("Saga store error: {0}")]
    Store(StoreError),

    /// State was persisted but the follow-up command was not published.
    #[error("Failed to publish {event_type}: {source}")]
    Publish {
        event_type: EventType,
        source: BusError,
    },

    /// A bus operation other than publishing failed.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// The handler did not finish within its processing deadline.
    #[error("Handler exceeded its {0:?} deadline")]
    DeadlineExceeded(Duration),
}

impl From<StoreError> for SagaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(saga_id) => SagaError::SagaNotFound(saga_id),
            StoreError::DuplicateOrder(order_id) => SagaError::DuplicateSaga(order_id),
            other => SagaError::Store(other),
        }
    }
}

impl SagaError {
    /// Classifies the error for logs and metric labels.
    pub fn category(&self) -> &'static str {
        match self {
            SagaError::Contract(_)
            | SagaError::OrderMismatch { .. }
            | SagaError::MissingSagaId(_)
            | SagaError::InvalidTransition(_) => "poison",
            SagaError::SagaNotFound(_) => "not_found",
            SagaError::DuplicateSaga(_) | SagaError::Store(StoreError::Duplicate(_)) => {
                "duplicate_saga"
            }
            SagaError::ConcurrencyExhausted { .. }
            | SagaError::Store(StoreError::VersionConflict { .. }) => "concurrency",
            SagaError::Store(_) => "storage",
            SagaError::Publish { .. } => "publish",
            SagaError::Bus(BusError::Contract(_)) => "poison",
            SagaError::Bus(_) => "transient_bus",
            SagaError::DeadlineExceeded(_) => "timeout",
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
