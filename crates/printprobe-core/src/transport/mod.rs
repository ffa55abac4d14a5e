//! Transport boundary for the device's control socket.
//!
//! A transport owns one long-lived bidirectional connection that carries
//! independent messages. It knows nothing about protocol semantics: it sends
//! bytes, receives the next inbound message with a deadline, and closes.
//!
//! ## Architecture
//!
//! ```text
//! Orchestrator / Client        Transport              Device
//! ┌──────────────────┐        ┌─────────────┐        ┌──────────┐
//! │  send payload    │ bytes  │  WebSocket  │  TCP   │          │
//! │  await one reply │───────▶│  (or test   │───────▶│  socket  │
//! │                  │◀───────│   script)   │◀───────│          │
//! └──────────────────┘        └─────────────┘        └──────────┘
//! ```
//!
//! Callers enforce strict half-duplex use: at most one command is in flight
//! at a time, because the protocol carries no request identifiers.

pub mod scripted;
pub mod websocket;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use scripted::{ScriptHandle, ScriptedReply, ScriptedTransport};
pub use websocket::{WebSocketConfig, WebSocketTransport};

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Transport error types.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Transport is not connected.
    #[error("Transport not connected")]
    NotConnected,

    /// Connection could not be established.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Send failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Receive failed.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// No message arrived before the deadline.
    #[error("Operation timeout after {0}ms")]
    Timeout(u64),

    /// Peer closed the connection.
    #[error("Connection closed by peer")]
    Closed,

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Other error.
    #[error("Transport error: {0}")]
    Other(#[from] anyhow::Error),
}

impl TransportError {
    /// Build a timeout error from a duration.
    pub fn timeout(after: Duration) -> Self {
        TransportError::Timeout(u64::try_from(after.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

/// Traffic counters for a transport.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransportMetrics {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connect_count: u64,
    /// Unix timestamp of the last send or receive.
    pub last_activity: Option<i64>,
}

impl TransportMetrics {
    pub fn record_sent(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
        self.last_activity = Some(chrono::Utc::now().timestamp());
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.frames_received += 1;
        self.bytes_received += bytes as u64;
        self.last_activity = Some(chrono::Utc::now().timestamp());
    }
}

/// Transport trait - a single bidirectional message channel.
#[async_trait]
pub trait Transport: Send {
    /// Transport type identifier.
    fn transport_type(&self) -> &str;

    /// Whether a connection is currently open.
    fn is_connected(&self) -> bool;

    /// Traffic counters if tracked.
    fn metrics(&self) -> Option<TransportMetrics> {
        None
    }

    /// Open the connection to `uri`.
    async fn connect(&mut self, uri: &str) -> Result<()>;

    /// Send one message.
    async fn send(&mut self, data: Vec<u8>) -> Result<()>;

    /// Wait for the next inbound message, at most `timeout`.
    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>>;

    /// Close the connection. Closing an already closed transport is a no-op.
    async fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_error_from_duration() {
        let err = TransportError::timeout(Duration::from_secs(5));
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Operation timeout after 5000ms");
    }

    #[test]
    fn test_metrics_counters() {
        let mut metrics = TransportMetrics::default();
        metrics.record_sent(10);
        metrics.record_received(4);
        metrics.record_received(6);
        assert_eq!(metrics.frames_sent, 1);
        assert_eq!(metrics.frames_received, 2);
        assert_eq!(metrics.bytes_received, 10);
        assert!(metrics.last_activity.is_some());
    }
}
