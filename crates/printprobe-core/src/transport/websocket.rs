//! WebSocket transport over `tokio-tungstenite`.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use super::{Result, Transport, TransportError, TransportMetrics};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    /// Connection handshake timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Close handshake timeout in milliseconds.
    #[serde(default = "default_close_timeout")]
    pub close_timeout_ms: u64,
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_close_timeout() -> u64 {
    5_000
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            close_timeout_ms: default_close_timeout(),
        }
    }
}

impl WebSocketConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

/// WebSocket transport.
///
/// Text and binary frames are delivered as bytes. Control frames are
/// swallowed; a close frame ends the connection.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    stream: Option<WsStream>,
    metrics: TransportMetrics,
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(WebSocketConfig::default())
    }
}

impl WebSocketTransport {
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            stream: None,
            metrics: TransportMetrics::default(),
        }
    }

    fn stream_mut(&mut self) -> Result<&mut WsStream> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn transport_type(&self) -> &str {
        "websocket"
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn metrics(&self) -> Option<TransportMetrics> {
        Some(self.metrics.clone())
    }

    async fn connect(&mut self, uri: &str) -> Result<()> {
        if !uri.starts_with("ws://") && !uri.starts_with("wss://") {
            return Err(TransportError::InvalidConfiguration(format!(
                "not a websocket uri: {}",
                uri
            )));
        }

        // Drop any previous connection first.
        self.close().await?;

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let (stream, _) = tokio::time::timeout(timeout, connect_async(uri))
            .await
            .map_err(|_| TransportError::timeout(timeout))?
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        self.stream = Some(stream);
        self.metrics.connect_count += 1;
        tracing::debug!(uri = %uri, "WebSocket connected");
        Ok(())
    }

    async fn send(&mut self, data: Vec<u8>) -> Result<()> {
        let len = data.len();
        let frame = match String::from_utf8(data) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };

        let stream = self.stream_mut()?;
        let result = stream.send(frame).await;
        if let Err(e) = result {
            self.stream = None;
            return Err(TransportError::SendFailed(e.to_string()));
        }
        self.metrics.record_sent(len);
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let stream = self.stream_mut()?;
            let next = match tokio::time::timeout_at(deadline, stream.next()).await {
                Ok(next) => next,
                Err(_) => return Err(TransportError::timeout(timeout)),
            };

            match next {
                Some(Ok(Message::Text(text))) => {
                    let bytes = text.into_bytes();
                    self.metrics.record_received(bytes.len());
                    return Ok(bytes);
                }
                Some(Ok(Message::Binary(bytes))) => {
                    self.metrics.record_received(bytes.len());
                    return Ok(bytes);
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(?frame, "WebSocket closed by peer");
                    self.stream = None;
                    return Err(TransportError::Closed);
                }
                // Ping, pong and raw frames carry no protocol data.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    self.stream = None;
                    return Err(TransportError::Closed);
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let timeout = Duration::from_millis(self.config.close_timeout_ms);
            match tokio::time::timeout(timeout, stream.close(None)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("WebSocket close error ignored: {}", e),
                Err(_) => tracing::debug!("WebSocket close handshake timed out"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = WebSocketConfig::default();
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert_eq!(config.close_timeout_ms, 5_000);

        let config: WebSocketConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.connect_timeout_ms, 10_000);
    }

    #[tokio::test]
    async fn test_rejects_non_websocket_uri() {
        let mut transport = WebSocketTransport::default();
        let err = transport.connect("http://127.0.0.1:9999").await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidConfiguration(_)));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let mut transport = WebSocketTransport::default();
        assert!(matches!(
            transport.send(b"{}".to_vec()).await,
            Err(TransportError::NotConnected)
        ));
        assert!(matches!(
            transport.receive(Duration::from_millis(10)).await,
            Err(TransportError::NotConnected)
        ));
        // close is idempotent
        transport.close().await.unwrap();
        transport.close().await.unwrap();
    }
}
