//! Core types for PrintProbe.
//!
//! This crate holds the vocabulary shared by discovery and the resilient
//! client: payloads and shapes, captured messages and the message log, the
//! transport boundary, response classification and the command catalog.

pub mod cancel;
pub mod catalog;
pub mod classifier;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod message;
pub mod message_log;
pub mod payload;
pub mod persist;
pub mod transport;

pub use cancel::CancelToken;
pub use catalog::{CatalogEntry, CommandCatalog, CommandCategory, LatencyStats};
pub use classifier::{Classification, IndicatorClassifier, Indicators, ResponseClassifier};
pub use config::ProbeConfig;
pub use diagnostics::{Diagnostic, DiagnosticLevel, DiagnosticsSink, MemorySink, SharedSink, TracingSink};
pub use error::{Error, Result};
pub use message::{CapturedMessage, Direction, MessageTimestamp};
pub use message_log::MessageLog;
pub use payload::{CommandShape, Payload};
pub use transport::{Transport, TransportError};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-exports commonly used types.
pub mod prelude {
    // Configuration
    pub use crate::config::{ClientConfig, DeviceConfig, DiscoveryConfig, ProbeConfig, env_vars};

    // Error handling
    pub use crate::error::{Error, Result};

    // Messages
    pub use crate::message::{CapturedMessage, Direction, MessageTimestamp};
    pub use crate::message_log::MessageLog;
    pub use crate::payload::{CommandShape, Payload};

    // Classification and catalog
    pub use crate::catalog::{CatalogEntry, CommandCatalog, CommandCategory, LatencyStats};
    pub use crate::classifier::{
        Classification, IndicatorClassifier, Indicators, ResponseClassifier,
    };

    // Transport
    pub use crate::transport::{
        ScriptedReply, ScriptedTransport, Transport, TransportError, WebSocketTransport,
    };

    // Runtime plumbing
    pub use crate::cancel::CancelToken;
    pub use crate::diagnostics::{Diagnostic, DiagnosticsSink, SharedSink};
}
