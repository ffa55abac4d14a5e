//! Temporal command/response correlation.
//!
//! The protocol carries no request ids, so a command is paired with the
//! earliest later inbound message that no earlier command has claimed.
//! Pairing is first come first served: a single response is never counted
//! for two commands sent in quick succession.
//!
//! On a chatty connection an unrelated broadcast inside the window will be
//! paired with a command. That is accepted behaviour.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use printprobe_core::config::discovery::DEFAULT_CORRELATION_WINDOW_MS;
use printprobe_core::message::CapturedMessage;
use printprobe_core::message_log::MessageLog;

/// A command matched with its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponsePair {
    pub command: CapturedMessage,
    pub response: CapturedMessage,
    /// `response - command`, never negative and never above the window.
    #[serde(with = "latency_ms")]
    pub latency: Duration,
}

/// Result of correlating a log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub pairs: Vec<CommandResponsePair>,
    /// Commands with no response inside the window.
    pub unpaired: Vec<CapturedMessage>,
    /// Inbound messages not claimed by any command.
    pub unclaimed_responses: usize,
}

impl Correlation {
    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }

    pub fn unpaired_count(&self) -> usize {
        self.unpaired.len()
    }
}

/// Pairs commands with responses inside a time window.
#[derive(Debug, Clone, Copy)]
pub struct Correlator {
    window: Duration,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_CORRELATION_WINDOW_MS))
    }
}

impl Correlator {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn correlate_log(&self, log: &MessageLog) -> Correlation {
        self.correlate(log.messages())
    }

    /// Correlate a message sequence.
    ///
    /// Both directions are ordered by capture offset (stable, so ties keep
    /// log order). Responses must be strictly later than their command.
    /// Only the earliest unclaimed later response is a candidate; if it lies
    /// outside the window the command is unpaired and the response stays
    /// available for later commands.
    pub fn correlate(&self, messages: &[CapturedMessage]) -> Correlation {
        let mut sent: Vec<&CapturedMessage> = messages.iter().filter(|m| m.is_sent()).collect();
        let mut received: Vec<&CapturedMessage> =
            messages.iter().filter(|m| m.is_received()).collect();
        sent.sort_by_key(|m| m.offset());
        received.sort_by_key(|m| m.offset());

        let mut correlation = Correlation::default();
        let mut claimed = 0usize;
        // Index of the first response not yet claimed or skipped.
        let mut next = 0usize;

        for command in sent {
            // Responses at or before this command can never match it or any
            // later command.
            while next < received.len() && received[next].offset() <= command.offset() {
                next += 1;
            }

            match received.get(next) {
                Some(response) if response.offset() - command.offset() <= self.window => {
                    correlation.pairs.push(CommandResponsePair {
                        command: command.clone(),
                        response: (*response).clone(),
                        latency: response.offset() - command.offset(),
                    });
                    claimed += 1;
                    next += 1;
                }
                _ => correlation.unpaired.push(command.clone()),
            }
        }

        correlation.unclaimed_responses = received.len() - claimed;
        tracing::debug!(
            pairs = correlation.pairs.len(),
            unpaired = correlation.unpaired.len(),
            window_ms = self.window.as_millis() as u64,
            "Correlation complete"
        );
        correlation
    }
}

/// Convenience wrapper around [`Correlator::correlate`].
pub fn correlate(messages: &[CapturedMessage], window: Duration) -> Correlation {
    Correlator::new(window).correlate(messages)
}

mod latency_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64() * 1000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(ms.max(0.0) / 1000.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printprobe_core::message::MessageTimestamp;

    fn sent(ms: u64, body: &str) -> CapturedMessage {
        CapturedMessage::sent(body.as_bytes().to_vec(), MessageTimestamp::at(Duration::from_millis(ms)))
    }

    fn received(ms: u64, body: &str) -> CapturedMessage {
        CapturedMessage::received(body.as_bytes().to_vec(), MessageTimestamp::at(Duration::from_millis(ms)))
    }

    #[test]
    fn test_single_pair_latency() {
        let messages = vec![
            sent(0, r#"{"cmd":"get_status"}"#),
            received(200, r#"{"status":"ready"}"#),
        ];
        let correlation = Correlator::default().correlate(&messages);
        assert_eq!(correlation.pair_count(), 1);
        assert_eq!(correlation.pairs[0].latency, Duration::from_millis(200));
        assert!(correlation.unpaired.is_empty());
    }

    #[test]
    fn test_response_not_shared_between_commands() {
        let messages = vec![
            sent(0, r#"{"cmd":"a"}"#),
            sent(10, r#"{"cmd":"b"}"#),
            received(50, r#"{"r":1}"#),
        ];
        let correlation = Correlator::default().correlate(&messages);
        assert_eq!(correlation.pair_count(), 1);
        assert_eq!(correlation.pairs[0].command.text(), r#"{"cmd":"a"}"#);
        assert_eq!(correlation.unpaired_count(), 1);
        assert_eq!(correlation.unpaired[0].text(), r#"{"cmd":"b"}"#);
    }

    #[test]
    fn test_interleaved_first_come_first_served() {
        let messages = vec![
            sent(0, r#"{"cmd":"a"}"#),
            sent(10, r#"{"cmd":"b"}"#),
            received(20, r#"{"r":1}"#),
            received(30, r#"{"r":2}"#),
        ];
        let correlation = Correlator::default().correlate(&messages);
        assert_eq!(correlation.pair_count(), 2);
        assert_eq!(correlation.pairs[0].response.text(), r#"{"r":1}"#);
        assert_eq!(correlation.pairs[1].response.text(), r#"{"r":2}"#);
        assert_eq!(correlation.pairs[1].latency, Duration::from_millis(20));
    }

    #[test]
    fn test_earlier_and_simultaneous_messages_are_ignored() {
        let messages = vec![
            received(0, r#"{"broadcast":1}"#),
            received(100, r#"{"broadcast":2}"#),
            sent(100, r#"{"cmd":"a"}"#),
        ];
        let correlation = Correlator::default().correlate(&messages);
        assert!(correlation.pairs.is_empty());
        assert_eq!(correlation.unpaired_count(), 1);
        assert_eq!(correlation.unclaimed_responses, 2);
    }

    #[test]
    fn test_window_bound() {
        let window = Duration::from_secs(60);
        let messages = vec![
            sent(0, r#"{"cmd":"a"}"#),
            received(61_000, r#"{"late":true}"#),
            sent(62_000, r#"{"cmd":"b"}"#),
            received(122_000, r#"{"ok":true}"#),
        ];
        let correlation = correlate(&messages, window);
        assert_eq!(correlation.unpaired_count(), 1);
        assert_eq!(correlation.pair_count(), 1);
        assert_eq!(correlation.pairs[0].latency, window);
    }

    #[test]
    fn test_out_of_window_response_remains_available() {
        let messages = vec![
            sent(0, r#"{"cmd":"a"}"#),
            sent(5_000, r#"{"cmd":"b"}"#),
            received(8_000, r#"{"ok":true}"#),
        ];
        let correlation = correlate(&messages, Duration::from_secs(5));
        assert_eq!(correlation.unpaired[0].text(), r#"{"cmd":"a"}"#);
        assert_eq!(correlation.pairs[0].command.text(), r#"{"cmd":"b"}"#);
    }

    #[test]
    fn test_invariants_hold_on_mixed_traffic() {
        let window = Duration::from_millis(500);
        let mut messages = Vec::new();
        for i in 0..40u64 {
            if i % 3 == 0 {
                messages.push(received(i * 97 % 2_000, &format!(r#"{{"r":{}}}"#, i)));
            } else {
                messages.push(sent(i * 61 % 2_000, &format!(r#"{{"s":{}}}"#, i)));
            }
        }
        let correlation = correlate(&messages, window);

        let mut seen = std::collections::HashSet::new();
        for pair in &correlation.pairs {
            assert!(pair.response.offset() > pair.command.offset());
            assert!(pair.latency <= window);
            assert!(seen.insert(pair.response.text()), "response paired twice");
        }
        let sent_total = messages.iter().filter(|m| m.is_sent()).count();
        assert_eq!(correlation.pair_count() + correlation.unpaired_count(), sent_total);
    }
}
