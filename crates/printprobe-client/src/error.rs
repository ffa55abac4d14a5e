//! Client error types.
//!
//! Transport errors never reach callers of `send_command` as-is; they are
//! mapped onto this taxonomy at the lowest layer.

use printprobe_core::transport::TransportError;

/// Resilient client errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClientError {
    /// The transport could not be established.
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// Breaker engaged; connecting is refused until the cooldown elapses.
    #[error("Circuit open, retry in {remaining_ms}ms")]
    CircuitOpen { remaining_ms: u64 },

    /// Command id absent from the loaded catalog.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// No response before the deadline.
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// Response could not be parsed.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Explicit negative indicator or insufficient structural match.
    #[error("Command failed: {0}")]
    Failure(String),

    /// Not connected and reconnecting was not possible.
    #[error("Not connected")]
    NotConnected,

    /// Malformed or inconsistent catalog.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Operation interrupted by a cancellation request.
    #[error("Operation cancelled")]
    Cancelled,
}

impl ClientError {
    /// Programmer errors fail fast instead of becoming a typed outcome.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::UnknownCommand(_) | ClientError::Catalog(_) | ClientError::Cancelled
        )
    }
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout(ms) => ClientError::Timeout(ms),
            TransportError::NotConnected | TransportError::Closed => ClientError::NotConnected,
            TransportError::ConnectionFailed(reason) => ClientError::ConnectionFailure(reason),
            other => ClientError::Failure(other.to_string()),
        }
    }
}

impl From<printprobe_core::Error> for ClientError {
    fn from(e: printprobe_core::Error) -> Self {
        match e {
            printprobe_core::Error::Transport(t) => t.into(),
            printprobe_core::Error::Cancelled => ClientError::Cancelled,
            other => ClientError::Catalog(other.to_string()),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_mapping() {
        assert_eq!(
            ClientError::from(TransportError::Timeout(1500)),
            ClientError::Timeout(1500)
        );
        assert_eq!(ClientError::from(TransportError::Closed), ClientError::NotConnected);
        assert!(matches!(
            ClientError::from(TransportError::SendFailed("broken pipe".into())),
            ClientError::Failure(_)
        ));
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(ClientError::UnknownCommand("x".into()).is_fatal());
        assert!(!ClientError::Timeout(10).is_fatal());
        assert_eq!(
            ClientError::CircuitOpen { remaining_ms: 500 }.to_string(),
            "Circuit open, retry in 500ms"
        );
    }
}
