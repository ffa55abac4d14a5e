//! Resilient device client for PrintProbe.
//!
//! Sends commands from a discovered catalog over one connection with a
//! circuit breaker for connection failures and exponential backoff for
//! timeouts, and derives printer status from status-class commands.

pub mod breaker;
pub mod client;
pub mod error;
pub mod retry;
pub mod status;
pub mod validation;

pub use breaker::{CircuitBreaker, CircuitState};
pub use client::{ClientStats, CommandOutcome, CommandReport, ResilientClient};
pub use error::{ClientError, Result};
pub use retry::RetryPolicy;
pub use status::{PrinterState, PrinterStatus, StatusSnapshot};
pub use validation::{CommandValidation, ValidationOptions, ValidationReport, validate};
