use contracts::ContractError;
use thiserror::Error;

/// Errors that can occur during bus operations.
#[derive(Debug, Error)]
pub enum BusError {
    /// No message arrived within the poll timeout. Callers poll again.
    #[error("Receive timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// A receive failed for a reason other than a timeout.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The subscription's source is gone; no further messages will arrive.
    #[error("Subscription closed")]
    Closed,

    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),
}

impl BusError {
    /// Returns true for the recoverable read timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BusError::Timeout)
    }

    /// Returns true if the dispatch loop can never receive again.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BusError::Closed)
    }
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
