//! Connection circuit breaker.
//!
//! Two states only. The breaker opens after `failure_threshold`
//! consecutive connection failures and refuses attempts until `cooldown`
//! has elapsed. There is no background timer: the breaker closes when a
//! caller explicitly asks to connect after the cooldown.
//!
//! ```text
//!          failures >= threshold
//! Closed ─────────────────────────▶ Open
//!   ▲                                 │
//!   └──── connect after cooldown ─────┘
//! ```

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use printprobe_core::config::client::{DEFAULT_COOLDOWN_SECS, DEFAULT_FAILURE_THRESHOLD};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
        }
    }
}

/// Per-connection circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    failure_threshold: u32,
    cooldown: Duration,
    last_transition: Option<Instant>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(
            DEFAULT_FAILURE_THRESHOLD,
            Duration::from_secs(DEFAULT_COOLDOWN_SECS),
        )
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            last_transition: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn last_transition(&self) -> Option<Instant> {
        self.last_transition
    }

    /// Cooldown left while open, zero otherwise.
    pub fn remaining_cooldown(&self) -> Duration {
        match (self.state, self.last_transition) {
            (CircuitState::Open, Some(opened_at)) => self.cooldown.saturating_sub(opened_at.elapsed()),
            _ => Duration::ZERO,
        }
    }

    /// Ask permission for a connection attempt.
    ///
    /// Closed: always granted. Open: refused with the remaining cooldown
    /// until it has elapsed, then the breaker closes and the attempt is
    /// granted.
    pub fn try_acquire(&mut self) -> std::result::Result<(), Duration> {
        if self.state == CircuitState::Closed {
            return Ok(());
        }
        let remaining = self.remaining_cooldown();
        if !remaining.is_zero() {
            return Err(remaining);
        }
        tracing::info!(cooldown_secs = self.cooldown.as_secs(), "Circuit cooldown elapsed, closing");
        self.transition(CircuitState::Closed);
        self.consecutive_failures = 0;
        Ok(())
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.state == CircuitState::Closed && self.consecutive_failures >= self.failure_threshold {
            tracing::error!(
                failures = self.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Circuit opened"
            );
            self.transition(CircuitState::Open);
        }
    }

    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.last_transition = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_opens_at_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.try_acquire().is_ok());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.try_acquire(), Err(Duration::from_secs(60)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_count() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.consecutive_failures(), 1);
        assert!(!breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closes_only_when_asked_after_cooldown() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(60));
        breaker.record_failure();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(breaker.try_acquire(), Err(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(2)).await;
        // Still open until someone asks.
        assert!(breaker.is_open());
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }
}
