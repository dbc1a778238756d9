use thiserror::Error;

use crate::event_type::EventType;

/// Errors raised while encoding or decoding bus messages.
///
/// Every decoding variant marks a poison message: redelivering it cannot
/// succeed, so consumers drop it after logging.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("Missing Event-Type header")]
    MissingEventType,

    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The tag is known but names an outbound message the orchestrator never consumes.
    #[error("Event type {0} is not consumed by the orchestrator")]
    NotInbound(EventType),

    #[error("Unexpected event type: expected {expected}, found {actual}")]
    UnexpectedEventType {
        expected: EventType,
        actual: EventType,
    },

    #[error("Malformed {event_type} payload: {source}")]
    Malformed {
        event_type: EventType,
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Incomplete envelope: {0} is required")]
    Incomplete(&'static str),
}

impl ContractError {
    /// Returns true if the error describes a message that can never be processed.
    pub fn is_poison(&self) -> bool {
        !matches!(
            self,
            ContractError::Serialization(_) | ContractError::Incomplete(_)
        )
    }
}

/// Result type for contract operations.
pub type Result<T> = std::result::Result<T, ContractError>;
