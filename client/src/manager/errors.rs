use crate::config::ConnectionStringError;
use std::fmt;

/// Errors surfaced by producers, consumers and the entity client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// A disposition or lock renewal was attempted under a receive mode
    /// that does not support it. Raised locally, before any broker call.
    ModeViolation,

    /// Configuration errors (missing or malformed connection parameters)
    ConfigurationError(String),

    /// The broker was unreachable or rejected the request
    TransportFailure(String),

    /// The lock token is unknown, already settled or expired
    LockLost(String),

    /// Message operation errors
    MessageSendFailed(String),
    MessageReceiveFailed(String),
    MessageSettleFailed(String),

    /// Operations attempted after disposal
    ConsumerDisposed,
    ProducerDisposed,

    /// Timeout errors
    OperationTimeout(String),

    /// Generic errors
    InternalError(String),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Exact text is part of the observable contract.
            BusError::ModeViolation => {
                write!(f, "The operation is only supported in 'PeekLock' receive mode.")
            }
            BusError::ConfigurationError(msg) => write!(f, "Configuration error: {msg}"),
            BusError::TransportFailure(msg) => write!(f, "Transport failure: {msg}"),
            BusError::LockLost(msg) => write!(f, "Lock lost: {msg}"),
            BusError::MessageSendFailed(msg) => write!(f, "Message send failed: {msg}"),
            BusError::MessageReceiveFailed(msg) => {
                write!(f, "Message receive failed: {msg}")
            }
            BusError::MessageSettleFailed(msg) => {
                write!(f, "Message settle failed: {msg}")
            }
            BusError::ConsumerDisposed => write!(f, "Consumer already disposed"),
            BusError::ProducerDisposed => write!(f, "Producer already disposed"),
            BusError::OperationTimeout(msg) => write!(f, "Operation timeout: {msg}"),
            BusError::InternalError(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for BusError {}

impl From<ConnectionStringError> for BusError {
    fn from(err: ConnectionStringError) -> Self {
        BusError::ConfigurationError(err.to_string())
    }
}

impl From<serde_json::Error> for BusError {
    fn from(err: serde_json::Error) -> Self {
        BusError::InternalError(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for BusError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        BusError::OperationTimeout(err.to_string())
    }
}

// Result type alias for convenience
pub type BusResult<T> = Result<T, BusError>;
