//! Append-only message log.
//!
//! Every message seen on the wire goes here with its direction, capture
//! time and best-effort decoded payload. Appending never fails. The log has
//! a single writer; readers take snapshots through [`MessageLog::messages`].

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::Result;
use crate::message::{CapturedMessage, Direction, MessageTimestamp};
use crate::persist::write_atomic;

/// On-disk form of a message log.
#[derive(Debug, Serialize, Deserialize)]
struct RawLogFile {
    #[serde(default)]
    started_at: Option<DateTime<Utc>>,
    captured_messages: Vec<CapturedMessage>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLogInput {
    Wrapped(RawLogFile),
    Bare(Vec<CapturedMessage>),
}

/// Append-only store of captured messages.
#[derive(Debug, Clone)]
pub struct MessageLog {
    epoch: Instant,
    started_at: DateTime<Utc>,
    messages: Vec<CapturedMessage>,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLog {
    /// Empty log whose clock starts now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            started_at: Utc::now(),
            messages: Vec::new(),
        }
    }

    /// Log holding already captured messages, e.g. loaded from disk.
    pub fn from_messages(messages: Vec<CapturedMessage>) -> Self {
        let mut log = Self::new();
        log.messages = messages;
        log
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Timestamp for a message captured right now, at microsecond
    /// resolution to match the persisted form.
    pub fn now(&self) -> MessageTimestamp {
        let elapsed = self.epoch.elapsed();
        let offset = Duration::from_micros(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
        MessageTimestamp::new(offset, Utc::now())
    }

    /// Append an already built message.
    pub fn append(&mut self, message: CapturedMessage) {
        self.messages.push(message);
    }

    /// Capture raw bytes stamped with the current time.
    pub fn capture(&mut self, direction: Direction, raw: Vec<u8>) -> &CapturedMessage {
        let message = CapturedMessage::new(direction, raw, self.now());
        if message.decoded().is_none() {
            tracing::debug!(?direction, bytes = message.raw().len(), "Captured undecodable message");
        }
        self.messages.push(message);
        &self.messages[self.messages.len() - 1]
    }

    pub fn record_sent(&mut self, raw: Vec<u8>) -> &CapturedMessage {
        self.capture(Direction::Sent, raw)
    }

    pub fn record_received(&mut self, raw: Vec<u8>) -> &CapturedMessage {
        self.capture(Direction::Received, raw)
    }

    pub fn messages(&self) -> &[CapturedMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn sent(&self) -> impl Iterator<Item = &CapturedMessage> {
        self.messages.iter().filter(|m| m.is_sent())
    }

    pub fn received(&self) -> impl Iterator<Item = &CapturedMessage> {
        self.messages.iter().filter(|m| m.is_received())
    }

    pub fn count(&self, direction: Direction) -> usize {
        self.messages.iter().filter(|m| m.direction() == direction).count()
    }

    /// Serialize as `{"captured_messages": [...]}`.
    pub fn to_json(&self) -> Result<String> {
        let file = RawLogFile {
            started_at: Some(self.started_at),
            captured_messages: self.messages.clone(),
        };
        Ok(serde_json::to_string_pretty(&file)?)
    }

    /// Flush the whole log to `path` atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_atomic(path, self.to_json()?.as_bytes())?;
        tracing::info!(path = %path.display(), messages = self.len(), "Message log saved");
        Ok(())
    }

    /// Parse either the wrapped form or a bare array of messages.
    pub fn from_json(content: &str) -> Result<Self> {
        let log = match serde_json::from_str::<RawLogInput>(content)? {
            RawLogInput::Wrapped(file) => {
                let mut log = Self::from_messages(file.captured_messages);
                if let Some(started_at) = file.started_at {
                    log.started_at = started_at;
                }
                log
            }
            RawLogInput::Bare(messages) => Self::from_messages(messages),
        };
        Ok(log)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }
}
