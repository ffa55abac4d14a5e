//! Resilient client.
//!
//! Owns one connection, one circuit breaker and a retry policy, and sends
//! catalog commands strictly one at a time: send, then wait for exactly one
//! inbound message.
//!
//! ## Call flow
//!
//! ```text
//! send_command(id)
//!   ├─ catalog lookup ──────────── UnknownCommand (fatal)
//!   ├─ connect if needed ───────── breaker check, CircuitOpen / ConnectionFailure
//!   └─ attempt loop
//!        ├─ send + receive(timeout)
//!        ├─ classify with the entry's indicators
//!        └─ Timeout? wait 2^attempt s and retry, else return
//! ```

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;

use printprobe_core::cancel::CancelToken;
use printprobe_core::catalog::{CatalogEntry, CommandCatalog};
use printprobe_core::classifier::{self, Classification, Reason};
use printprobe_core::config::{ClientConfig, ProbeConfig};
use printprobe_core::diagnostics::{Diagnostic, SharedSink, tracing_sink};
use printprobe_core::message::Direction;
use printprobe_core::message_log::MessageLog;
use printprobe_core::payload::Payload;
use printprobe_core::transport::Transport;

use crate::breaker::{CircuitBreaker, CircuitState};
use crate::error::{ClientError, Result};
use crate::retry::RetryPolicy;
use crate::status::{PrinterStatus, StatusSnapshot};

const COMPONENT: &str = "client";

/// Field added to every outgoing command for diagnostics.
pub const CLIENT_TIMESTAMP_FIELD: &str = "_client_timestamp";

/// Typed outcome of one command call.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Success(Value),
    /// Response matched only part of the expected fields.
    PartialSuccess(Value),
    Failure(ClientError),
    Timeout,
}

impl CommandOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            CommandOutcome::Success(_) => "success",
            CommandOutcome::PartialSuccess(_) => "partial_success",
            CommandOutcome::Failure(_) => "failure",
            CommandOutcome::Timeout => "timeout",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success(_))
    }

    /// Success or partial success.
    pub fn is_usable(&self) -> bool {
        matches!(self, CommandOutcome::Success(_) | CommandOutcome::PartialSuccess(_))
    }

    pub fn response(&self) -> Option<&Value> {
        match self {
            CommandOutcome::Success(v) | CommandOutcome::PartialSuccess(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ClientError> {
        match self {
            CommandOutcome::Failure(e) => Some(e),
            _ => None,
        }
    }
}

/// Outcome plus what it took to get it.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReport {
    pub command_id: String,
    pub outcome: CommandOutcome,
    /// Attempts made, including the first.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Running counters for one client.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClientStats {
    pub commands: u64,
    pub attempts: u64,
    pub successes: u64,
    pub partials: u64,
    pub failures: u64,
    /// Attempts that timed out, retried or not.
    pub timeouts: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    /// Connects refused by the open breaker.
    pub circuit_rejections: u64,
    pub circuit_state: Option<CircuitState>,
}

/// Production client for one device connection.
pub struct ResilientClient<T: Transport> {
    transport: T,
    uri: String,
    catalog: CommandCatalog,
    config: ClientConfig,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    cancel: CancelToken,
    sink: SharedSink,
    log: Option<MessageLog>,
    stats: ClientStats,
    last_status: Option<PrinterStatus>,
}

impl<T: Transport> ResilientClient<T> {
    pub fn new(transport: T, uri: impl Into<String>, catalog: CommandCatalog) -> Self {
        let config = ClientConfig::default();
        Self {
            transport,
            uri: uri.into(),
            catalog,
            breaker: CircuitBreaker::new(config.failure_threshold, config.cooldown()),
            retry: RetryPolicy::new(config.retry_count),
            config,
            cancel: CancelToken::new(),
            sink: tracing_sink(),
            log: None,
            stats: ClientStats::default(),
            last_status: None,
        }
    }

    /// Client for the device and tuning in `config`.
    pub fn from_config(transport: T, config: &ProbeConfig, catalog: CommandCatalog) -> Self {
        Self::new(transport, config.device_uri(), catalog).with_config(config.client.clone())
    }

    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.breaker = CircuitBreaker::new(config.failure_threshold, config.cooldown());
        self.retry = RetryPolicy::new(config.retry_count);
        self.config = config;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Record every frame sent and received.
    pub fn with_message_log(mut self, log: MessageLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn catalog(&self) -> &CommandCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn message_log(&self) -> Option<&MessageLog> {
        self.log.as_ref()
    }

    pub fn take_message_log(&mut self) -> Option<MessageLog> {
        self.log.take()
    }

    pub fn last_status(&self) -> Option<&PrinterStatus> {
        self.last_status.as_ref()
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            circuit_state: Some(self.breaker.state()),
            ..self.stats.clone()
        }
    }

    /// Response timeout for a catalog command.
    pub fn command_timeout(&self, id: &str) -> Option<Duration> {
        self.catalog.get(id).map(|entry| self.timeout_for(entry))
    }

    fn timeout_for(&self, entry: &CatalogEntry) -> Duration {
        entry.derive_timeout(self.config.timeout_floor(), self.config.timeout_multiplier)
    }

    /// Open the connection.
    ///
    /// While the breaker is open and cooling down this fails with
    /// `CircuitOpen` without touching the transport.
    pub async fn connect(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        if self.transport.is_connected() {
            return Ok(());
        }

        if let Err(remaining) = self.breaker.try_acquire() {
            self.stats.circuit_rejections += 1;
            let remaining_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(remaining_ms, "Circuit open, not connecting");
            return Err(ClientError::CircuitOpen { remaining_ms });
        }

        self.stats.connect_attempts += 1;
        tracing::info!(uri = %self.uri, "Connecting");
        match self.transport.connect(&self.uri).await {
            Ok(()) => {
                self.breaker.record_success();
                self.emit(Diagnostic::info(COMPONENT, format!("Connected to {}", self.uri)));
                Ok(())
            }
            Err(e) => {
                self.stats.connect_failures += 1;
                self.breaker.record_failure();
                self.emit(Diagnostic::warn(
                    COMPONENT,
                    format!(
                        "Connection to {} failed ({}/{}): {}",
                        self.uri,
                        self.breaker.consecutive_failures(),
                        self.breaker.failure_threshold(),
                        e
                    ),
                ));
                if self.breaker.is_open() {
                    self.emit(Diagnostic::error(
                        COMPONENT,
                        format!("Circuit opened for {}s", self.breaker.cooldown().as_secs()),
                    ));
                }
                Err(ClientError::ConnectionFailure(e.to_string()))
            }
        }
    }

    /// Close the connection. Safe to call when already closed.
    pub async fn disconnect(&mut self) {
        if !self.transport.is_connected() {
            return;
        }
        if let Err(e) = self.transport.close().await {
            tracing::debug!("Close failed: {}", e);
        }
        self.emit(Diagnostic::info(COMPONENT, format!("Disconnected from {}", self.uri)));
    }

    /// Send a catalog command with `overrides` merged into its template.
    ///
    /// Errors only for an unknown id or cancellation; everything the device
    /// or the network does becomes a [`CommandOutcome`].
    pub async fn send_command(&mut self, id: &str, overrides: &Payload) -> Result<CommandOutcome> {
        self.execute(id, overrides).await.map(|report| report.outcome)
    }

    /// Like [`send_command`](Self::send_command), reporting attempts and
    /// elapsed time as well.
    pub async fn execute(&mut self, id: &str, overrides: &Payload) -> Result<CommandReport> {
        let entry = self
            .catalog
            .get(id)
            .cloned()
            .ok_or_else(|| ClientError::UnknownCommand(id.to_string()))?;
        let started = Instant::now();
        self.stats.commands += 1;

        if let Err(e) = self.connect().await {
            if e.is_fatal() {
                return Err(e);
            }
            self.stats.failures += 1;
            return Ok(CommandReport {
                command_id: entry.id,
                outcome: CommandOutcome::Failure(e),
                attempts: 0,
                elapsed: started.elapsed(),
            });
        }

        let payload = entry.payload_with(overrides);
        let timeout = self.timeout_for(&entry);
        let mut attempt = 0u32;

        let outcome = loop {
            if self.cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            self.stats.attempts += 1;

            match self.attempt(&entry, &payload, timeout).await {
                CommandOutcome::Timeout if self.retry.should_retry(attempt) => {
                    let wait = self.retry.backoff(attempt);
                    tracing::warn!(
                        command_id = %entry.id,
                        attempt,
                        backoff_ms = wait.as_millis() as u64,
                        "Timeout, retrying"
                    );
                    if !self.cancel.sleep(wait).await {
                        return Err(ClientError::Cancelled);
                    }
                    attempt += 1;
                }
                outcome => break outcome,
            }
        };

        match &outcome {
            CommandOutcome::Success(_) => self.stats.successes += 1,
            CommandOutcome::PartialSuccess(_) => self.stats.partials += 1,
            CommandOutcome::Failure(_) => self.stats.failures += 1,
            CommandOutcome::Timeout => {}
        }
        tracing::info!(
            command_id = %entry.id,
            outcome = outcome.kind(),
            attempts = attempt + 1,
            "Command finished"
        );

        Ok(CommandReport {
            command_id: entry.id,
            outcome,
            attempts: attempt + 1,
            elapsed: started.elapsed(),
        })
    }

    /// One send and one receive.
    async fn attempt(&mut self, entry: &CatalogEntry, payload: &Payload, timeout: Duration) -> CommandOutcome {
        let mut message = payload.clone();
        message.insert(CLIENT_TIMESTAMP_FIELD, Utc::now().to_rfc3339());
        let bytes = message.to_bytes();

        if let Err(e) = self.transport.send(bytes.clone()).await {
            self.emit(Diagnostic::warn(COMPONENT, format!("Sending {} failed: {}", entry.id, e)));
            return CommandOutcome::Failure(e.into());
        }
        self.record(Direction::Sent, bytes);

        let reply = match self.transport.receive(timeout).await {
            Ok(reply) => reply,
            Err(e) if e.is_timeout() => {
                self.stats.timeouts += 1;
                tracing::warn!(command_id = %entry.id, timeout_ms = timeout.as_millis() as u64, "No response");
                return CommandOutcome::Timeout;
            }
            Err(e) => {
                self.emit(Diagnostic::warn(COMPONENT, format!("Awaiting {} failed: {}", entry.id, e)));
                return CommandOutcome::Failure(e.into());
            }
        };
        self.record(Direction::Received, reply.clone());

        let verdict = classifier::evaluate(&entry.indicators, &entry.expected_fields, &reply);
        tracing::debug!(command_id = %entry.id, reason = ?verdict.reason, "Response classified");
        match (verdict.classification, serde_json::from_slice::<Value>(&reply)) {
            (Classification::Success, Ok(value)) => CommandOutcome::Success(value),
            (Classification::Partial, Ok(value)) => CommandOutcome::PartialSuccess(value),
            _ => CommandOutcome::Failure(match verdict.reason {
                Reason::Unparseable => {
                    ClientError::InvalidResponse(String::from_utf8_lossy(&reply).into_owned())
                }
                Reason::FailureIndicator { indicator } => {
                    ClientError::Failure(format!("failure indicator '{}'", indicator))
                }
                Reason::Coverage { fraction } => ClientError::Failure(format!(
                    "only {:.0}% of expected fields present",
                    fraction * 100.0
                )),
                other => ClientError::Failure(format!("{:?}", other)),
            }),
        }
    }

    /// Try each status-class command in order until one succeeds.
    ///
    /// Partial answers are not used. When every candidate fails the last
    /// known status is returned as stale.
    pub async fn get_status(&mut self) -> Result<StatusSnapshot> {
        let candidates: Vec<String> = self
            .catalog
            .status_commands()
            .into_iter()
            .map(|entry| entry.id.clone())
            .collect();

        for id in candidates {
            match self.send_command(&id, &Payload::new()).await? {
                CommandOutcome::Success(response) => {
                    let status = PrinterStatus::from_response(&response, &id);
                    tracing::info!(command_id = %id, state = %status.state, "Status refreshed");
                    self.last_status = Some(status.clone());
                    return Ok(StatusSnapshot::Fresh(status));
                }
                other => {
                    tracing::debug!(command_id = %id, outcome = other.kind(), "Status candidate failed");
                }
            }
        }

        self.emit(Diagnostic::warn(COMPONENT, "No status command succeeded, status unknown"));
        Ok(StatusSnapshot::Unknown {
            last_known: self.last_status.clone(),
        })
    }

    fn record(&mut self, direction: Direction, raw: Vec<u8>) {
        if let Some(log) = self.log.as_mut() {
            log.capture(direction, raw);
        }
    }

    fn emit(&self, diagnostic: Diagnostic) {
        self.sink.emit(diagnostic);
    }
}
