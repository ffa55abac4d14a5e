//! Per-command retry policy.
//!
//! Only timeouts are retried. Any other failure means the device
//! understood the transport but not the command, and repeating it cannot
//! help.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use printprobe_core::config::client::DEFAULT_RETRY_COUNT;

/// Exponential backoff over a fixed number of attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Wait after attempt 0; doubles with every attempt.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_COUNT)
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms: 1_000,
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::new(1)
    }

    /// Wait after a timed-out `attempt` (0-based): `base * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    /// Whether a timeout on `attempt` (0-based) leaves room for another.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }
}
