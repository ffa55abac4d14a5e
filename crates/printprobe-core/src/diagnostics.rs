//! Injectable diagnostics sink.
//!
//! Components report notable events (phase transitions, probe failures,
//! breaker transitions, retries) through a [`DiagnosticsSink`] handed to
//! them at construction. [`TracingSink`] forwards to `tracing`;
//! [`MemorySink`] keeps everything in memory for assertions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single diagnostic event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    /// Emitting component, e.g. `discovery` or `client`.
    pub component: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl Diagnostic {
    pub fn new(level: DiagnosticLevel, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            component: component.into(),
            message: message.into(),
            at: Utc::now(),
        }
    }

    pub fn debug(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Debug, component, message)
    }

    pub fn info(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Info, component, message)
    }

    pub fn warn(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Warn, component, message)
    }

    pub fn error(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Error, component, message)
    }
}

/// Receiver of diagnostics.
pub trait DiagnosticsSink: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Shared sink handle.
pub type SharedSink = Arc<dyn DiagnosticsSink>;

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn emit(&self, d: Diagnostic) {
        match d.level {
            DiagnosticLevel::Debug => tracing::debug!(component = %d.component, "{}", d.message),
            DiagnosticLevel::Info => tracing::info!(component = %d.component, "{}", d.message),
            DiagnosticLevel::Warn => tracing::warn!(component = %d.component, "{}", d.message),
            DiagnosticLevel::Error => tracing::error!(component = %d.component, "{}", d.message),
        }
    }
}

/// Default sink used when none is injected.
pub fn tracing_sink() -> SharedSink {
    Arc::new(TracingSink)
}

/// Records diagnostics in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    pub fn count(&self, level: DiagnosticLevel) -> usize {
        self.entries.lock().iter().filter(|d| d.level == level).count()
    }

    /// Whether any diagnostic message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries.lock().iter().any(|d| d.message.contains(needle))
    }
}

impl DiagnosticsSink for MemorySink {
    fn emit(&self, diagnostic: Diagnostic) {
        self.entries.lock().push(diagnostic);
    }
}
