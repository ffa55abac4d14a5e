//! Scripted in-memory transport.
//!
//! Replays a queue of connect outcomes and inbound replies and records every
//! frame sent. Used as the device stand-in for tests and dry runs. Waiting
//! uses tokio's clock, so tests running with a paused clock observe
//! timeouts without real delays.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Result, Transport, TransportError, TransportMetrics};

/// One scripted reply to a `receive` call.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Deliver this frame immediately.
    Frame(Vec<u8>),
    /// Deliver this frame after a delay. Times out if the delay exceeds the
    /// receive timeout.
    Delayed(Duration, Vec<u8>),
    /// Wait out the full receive timeout.
    Timeout,
    /// Fail the receive with a transport error.
    Error(String),
    /// Peer closes the connection.
    Close,
}

impl ScriptedReply {
    pub fn json(value: serde_json::Value) -> Self {
        ScriptedReply::Frame(value.to_string().into_bytes())
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    connect_results: VecDeque<std::result::Result<(), String>>,
    replies: VecDeque<ScriptedReply>,
    sent: Vec<Vec<u8>>,
    connect_attempts: usize,
    receive_calls: usize,
    close_calls: usize,
    uris: Vec<String>,
}

/// Inspection handle that stays valid after the transport is moved.
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptHandle {
    /// Frames sent so far.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    /// Sent frames decoded as JSON, skipping anything unparseable.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .sent
            .iter()
            .filter_map(|raw| serde_json::from_slice(raw).ok())
            .collect()
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    pub fn receive_calls(&self) -> usize {
        self.state.lock().receive_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    pub fn uris(&self) -> Vec<String> {
        self.state.lock().uris.clone()
    }

    pub fn push_reply(&self, reply: ScriptedReply) {
        self.state.lock().replies.push_back(reply);
    }

    pub fn pending_replies(&self) -> usize {
        self.state.lock().replies.len()
    }
}

/// Scripted transport.
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
    connected: bool,
    metrics: TransportMetrics,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState::default())),
            connected: false,
            metrics: TransportMetrics::default(),
        }
    }

    /// Handle for inspecting the script after the transport is moved.
    pub fn handle(&self) -> ScriptHandle {
        ScriptHandle {
            state: self.state.clone(),
        }
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_connects(self, n: usize) -> Self {
        {
            let mut state = self.state.lock();
            for _ in 0..n {
                state
                    .connect_results
                    .push_back(Err("connection refused".to_string()));
            }
        }
        self
    }

    /// Queue an explicit connect outcome.
    pub fn with_connect_result(self, result: std::result::Result<(), String>) -> Self {
        self.state.lock().connect_results.push_back(result);
        self
    }

    pub fn with_reply(self, reply: ScriptedReply) -> Self {
        self.state.lock().replies.push_back(reply);
        self
    }

    pub fn with_json(self, value: serde_json::Value) -> Self {
        self.with_reply(ScriptedReply::json(value))
    }

    pub fn with_timeouts(self, n: usize) -> Self {
        {
            let mut state = self.state.lock();
            for _ in 0..n {
                state.replies.push_back(ScriptedReply::Timeout);
            }
        }
        self
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn transport_type(&self) -> &str {
        "scripted"
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn metrics(&self) -> Option<TransportMetrics> {
        Some(self.metrics.clone())
    }

    async fn connect(&mut self, uri: &str) -> Result<()> {
        let outcome = {
            let mut state = self.state.lock();
            state.connect_attempts += 1;
            state.uris.push(uri.to_string());
            state.connect_results.pop_front().unwrap_or(Ok(()))
        };

        match outcome {
            Ok(()) => {
                self.connected = true;
                self.metrics.connect_count += 1;
                Ok(())
            }
            Err(reason) => {
                self.connected = false;
                Err(TransportError::ConnectionFailed(reason))
            }
        }
    }

    async fn send(&mut self, data: Vec<u8>) -> Result<()> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.metrics.record_sent(data.len());
        self.state.lock().sent.push(data);
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        let reply = {
            let mut state = self.state.lock();
            state.receive_calls += 1;
            state.replies.pop_front()
        };

        match reply {
            Some(ScriptedReply::Frame(bytes)) => {
                self.metrics.record_received(bytes.len());
                Ok(bytes)
            }
            Some(ScriptedReply::Delayed(delay, bytes)) => {
                if delay > timeout {
                    tokio::time::sleep(timeout).await;
                    // The frame still arrives later, as on a real socket.
                    self.state
                        .lock()
                        .replies
                        .push_front(ScriptedReply::Frame(bytes));
                    return Err(TransportError::timeout(timeout));
                }
                tokio::time::sleep(delay).await;
                self.metrics.record_received(bytes.len());
                Ok(bytes)
            }
            Some(ScriptedReply::Timeout) | None => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::timeout(timeout))
            }
            Some(ScriptedReply::Error(reason)) => Err(TransportError::ReceiveFailed(reason)),
            Some(ScriptedReply::Close) => {
                self.connected = false;
                Err(TransportError::Closed)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().close_calls += 1;
        self.connected = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_replays_script_in_order() {
        let mut transport = ScriptedTransport::new()
            .fail_connects(1)
            .with_json(json!({"status": "ready"}))
            .with_timeouts(1);
        let handle = transport.handle();

        assert!(transport.connect("ws://printer:9999").await.is_err());
        transport.connect("ws://printer:9999").await.unwrap();
        assert_eq!(handle.connect_attempts(), 2);

        transport.send(br#"{"cmd":"get_status"}"#.to_vec()).await.unwrap();
        let reply = transport.receive(Duration::from_secs(5)).await.unwrap();
        assert_eq!(reply, br#"{"status":"ready"}"#.to_vec());

        let started = tokio::time::Instant::now();
        let err = transport.receive(Duration::from_secs(5)).await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(started.elapsed(), Duration::from_secs(5));

        assert_eq!(handle.sent_json(), vec![json!({"cmd": "get_status"})]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_frame_is_delivered_on_next_receive() {
        let mut transport = ScriptedTransport::new().with_reply(ScriptedReply::Delayed(
            Duration::from_secs(8),
            b"{\"late\":true}".to_vec(),
        ));
        transport.connect("ws://printer:9999").await.unwrap();

        assert!(transport.receive(Duration::from_secs(5)).await.unwrap_err().is_timeout());
        let frame = transport.receive(Duration::from_secs(5)).await.unwrap();
        assert_eq!(frame, b"{\"late\":true}".to_vec());
    }

    #[tokio::test]
    async fn test_close_disconnects() {
        let mut transport = ScriptedTransport::new().with_reply(ScriptedReply::Close);
        let handle = transport.handle();
        transport.connect("ws://printer:9999").await.unwrap();

        assert!(matches!(
            transport.receive(Duration::from_secs(1)).await,
            Err(TransportError::Closed)
        ));
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send(b"{}".to_vec()).await,
            Err(TransportError::NotConnected)
        ));

        transport.close().await.unwrap();
        assert_eq!(handle.close_calls(), 1);
    }
}
