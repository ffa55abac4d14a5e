//! Captured protocol messages.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::payload::Payload;

/// Direction of a captured message relative to this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Sent by us to the device.
    Sent,
    /// Received from the device.
    Received,
}

/// Capture time of a message.
///
/// `offset` is monotonic time since the owning log started and is the only
/// value used for ordering and correlation. `wall` is kept for humans.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MessageTimestamp {
    #[serde(rename = "offset_us", with = "duration_us")]
    pub offset: Duration,
    pub wall: DateTime<Utc>,
}

impl MessageTimestamp {
    pub fn new(offset: Duration, wall: DateTime<Utc>) -> Self {
        Self { offset, wall }
    }

    /// Timestamp at `offset`, wall clock derived from now.
    pub fn at(offset: Duration) -> Self {
        Self {
            offset,
            wall: Utc::now(),
        }
    }
}

/// A single message seen on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedMessage {
    timestamp: MessageTimestamp,
    direction: Direction,
    #[serde(rename = "raw_data", with = "raw_text")]
    raw: Vec<u8>,
    #[serde(rename = "parsed_data", default)]
    decoded: Option<Value>,
}

impl CapturedMessage {
    /// Capture raw bytes. Decoding is best-effort: unparseable data is kept
    /// raw-only.
    pub fn new(direction: Direction, raw: Vec<u8>, timestamp: MessageTimestamp) -> Self {
        let decoded = serde_json::from_slice::<Value>(&raw).ok();
        Self {
            timestamp,
            direction,
            raw,
            decoded,
        }
    }

    pub fn sent(raw: Vec<u8>, timestamp: MessageTimestamp) -> Self {
        Self::new(Direction::Sent, raw, timestamp)
    }

    pub fn received(raw: Vec<u8>, timestamp: MessageTimestamp) -> Self {
        Self::new(Direction::Received, raw, timestamp)
    }

    pub fn timestamp(&self) -> &MessageTimestamp {
        &self.timestamp
    }

    /// Monotonic offset since the log started.
    pub fn offset(&self) -> Duration {
        self.timestamp.offset
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Lossy UTF-8 view of the raw bytes.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.raw).into_owned()
    }

    pub fn decoded(&self) -> Option<&Value> {
        self.decoded.as_ref()
    }

    /// Decoded payload when the message is a JSON object.
    pub fn payload(&self) -> Option<Payload> {
        self.decoded.clone().and_then(Payload::from_value)
    }

    pub fn is_sent(&self) -> bool {
        self.direction == Direction::Sent
    }

    pub fn is_received(&self) -> bool {
        self.direction == Direction::Received
    }
}

mod duration_us {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_micros(u64::deserialize(d)?))
    }
}

mod raw_text {
    use super::*;

    pub fn serialize<S: Serializer>(raw: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&String::from_utf8_lossy(raw))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        Ok(String::deserialize(d)?.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoding_is_best_effort() {
        let ts = MessageTimestamp::at(Duration::ZERO);
        let msg = CapturedMessage::received(b"\xff\xfegarbage".to_vec(), ts);
        assert!(msg.decoded().is_none());
        assert!(msg.payload().is_none());
        assert_eq!(msg.raw().len(), 9);

        let msg = CapturedMessage::received(br#"{"status":"ready"}"#.to_vec(), ts);
        assert!(msg.payload().unwrap().contains_key("status"));
    }

    #[test]
    fn test_serde_roundtrip_keeps_offset() {
        let ts = MessageTimestamp::at(Duration::from_millis(200));
        let msg = CapturedMessage::sent(br#"{"cmd":"get_status"}"#.to_vec(), ts);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["direction"], "sent");
        assert_eq!(json["raw_data"], r#"{"cmd":"get_status"}"#);

        let back: CapturedMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back.offset(), Duration::from_millis(200));
        assert!(back.is_sent());
    }
}
