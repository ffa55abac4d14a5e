//! Unified error handling for PrintProbe.
//!
//! Library crates return these errors for configuration, persistence and
//! catalog problems. Transport failures have their own [`TransportError`]
//! and are converted at the boundary of each component.

use crate::transport::TransportError;

/// Unified error type for PrintProbe.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog content is malformed or inconsistent.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Transport-level failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Filesystem errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation interrupted by a cancellation request.
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

/// Convenience macros for creating errors.
#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! catalog_err {
    ($msg:expr) => {
        $crate::error::Error::Catalog($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Catalog(format!($fmt, $($arg)*))
    };
}
