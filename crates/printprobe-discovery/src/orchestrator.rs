//! Discovery orchestrator.
//!
//! Drives a connectivity check and three time-bounded phases over one
//! connection, logging every message:
//!
//! ```text
//! connect ─▶ ping probes ─▶ passive ─▶ active ─▶ fuzzing ─▶ flush
//!                             │          │          │
//!                             └──────────┴──────────┴── cancel ─▶ flush
//! ```
//!
//! A failed probe never stops a phase. Cancellation is checked between
//! iterations and before every send; captured data is always flushed before
//! `run` returns.

use std::path::Path;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use printprobe_core::Result;
use printprobe_core::cancel::CancelToken;
use printprobe_core::classifier::{self, Indicators};
use printprobe_core::config::DiscoveryConfig;
use printprobe_core::diagnostics::{Diagnostic, SharedSink, tracing_sink};
use printprobe_core::message::Direction;
use printprobe_core::message_log::MessageLog;
use printprobe_core::payload::Payload;
use printprobe_core::transport::{Transport, TransportError};

use crate::probes;
use crate::report::{Completion, DiscoveryReport, Phase, PhaseStats, ProbeResult, SuccessfulCommand};

/// File name of the discovery report inside the output directory.
pub const REPORT_FILE: &str = "discovery_report.json";
/// File name of the raw message log inside the output directory.
pub const RAW_LOG_FILE: &str = "raw_messages.json";

const COMPONENT: &str = "discovery";

/// Everything a discovery run produced.
#[derive(Debug)]
pub struct DiscoveryOutcome {
    pub report: DiscoveryReport,
    pub log: MessageLog,
}

/// Outcome of sending one probe and waiting for one reply.
enum ProbeReply {
    Response(Vec<u8>),
    Timeout,
    SendFailed(TransportError),
    ReceiveFailed(TransportError),
}

/// Runs discovery against one device.
pub struct DiscoveryOrchestrator<T: Transport> {
    transport: T,
    uri: String,
    config: DiscoveryConfig,
    indicators: Indicators,
    cancel: CancelToken,
    sink: SharedSink,
    log: MessageLog,
}

impl<T: Transport> DiscoveryOrchestrator<T> {
    pub fn new(transport: T, uri: impl Into<String>, config: DiscoveryConfig) -> Self {
        Self {
            transport,
            uri: uri.into(),
            config,
            indicators: Indicators::default(),
            cancel: CancelToken::new(),
            sink: tracing_sink(),
            log: MessageLog::new(),
        }
    }

    pub fn with_indicators(mut self, indicators: Indicators) -> Self {
        self.indicators = indicators;
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

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run discovery to completion, cancellation or abort.
    ///
    /// When `out_dir` is given the report and the raw log are written there
    /// before returning, whatever the outcome.
    pub async fn run(mut self, out_dir: Option<&Path>) -> Result<DiscoveryOutcome> {
        let mut report = DiscoveryReport::new(self.uri.clone());
        let completion = self.execute(&mut report).await;
        report.completion = completion;

        if let Err(e) = self.transport.close().await {
            tracing::debug!("Close after discovery failed: {}", e);
        }

        report.analysis_timestamp = chrono::Utc::now();
        report.total_messages = self.log.len();
        report.sent_messages = self.log.count(Direction::Sent);
        report.received_messages = self.log.count(Direction::Received);

        self.emit(Diagnostic::info(
            COMPONENT,
            format!(
                "Discovery finished ({:?}): {} messages, {} successful commands",
                report.completion,
                report.total_messages,
                report.successful_commands().count()
            ),
        ));

        if let Some(dir) = out_dir {
            // Both writes are attempted; the first error wins.
            let log_written = self.log.save(dir.join(RAW_LOG_FILE));
            let report_written = report.save(dir.join(REPORT_FILE));
            log_written.and(report_written)?;
        }

        Ok(DiscoveryOutcome {
            report,
            log: self.log,
        })
    }

    async fn execute(&mut self, report: &mut DiscoveryReport) -> Completion {
        if self.cancel.is_cancelled() {
            return Completion::Cancelled;
        }

        if let Err(e) = self.transport.connect(&self.uri).await {
            self.emit(Diagnostic::error(COMPONENT, format!("Connection to {} failed: {}", self.uri, e)));
            return Completion::Aborted(e.to_string());
        }
        self.emit(Diagnostic::info(COMPONENT, format!("Connected to {}", self.uri)));

        report.connectivity = self.connectivity_check().await;

        let budget = self.config.phase_budget();
        for phase in [Phase::Passive, Phase::Active, Phase::Fuzzing] {
            if self.cancel.is_cancelled() {
                break;
            }
            if !self.transport.is_connected() {
                if let Err(e) = self.transport.connect(&self.uri).await {
                    self.emit(Diagnostic::error(
                        COMPONENT,
                        format!("Reconnect before {} phase failed: {}", phase, e),
                    ));
                    return Completion::Aborted(e.to_string());
                }
            }

            self.emit(Diagnostic::info(
                COMPONENT,
                format!("Starting {} phase ({}s budget)", phase, budget.as_secs()),
            ));
            let stats = match phase {
                Phase::Passive => self.passive_phase(budget).await,
                Phase::Active => {
                    let commands = probes::active_commands(self.config.max_variations);
                    let timeout = self.config.response_timeout();
                    let delay = self.config.active_delay();
                    self.probe_phase(Phase::Active, commands, budget, timeout, delay).await
                }
                Phase::Fuzzing => {
                    let commands = probes::fuzz_patterns(self.config.max_fuzz);
                    let timeout = self.config.fuzz_timeout();
                    let delay = self.config.fuzz_delay();
                    self.probe_phase(Phase::Fuzzing, commands, budget, timeout, delay).await
                }
            };
            self.emit(Diagnostic::info(
                COMPONENT,
                format!(
                    "{} phase done: sent {}, responded {}, timed out {}, errors {}, received {}",
                    phase, stats.sent, stats.responded, stats.timed_out, stats.errors, stats.received
                ),
            ));
            report.phases.push(stats);
        }

        if self.cancel.is_cancelled() {
            self.emit(Diagnostic::warn(COMPONENT, "Discovery cancelled, flushing captured data"));
            Completion::Cancelled
        } else {
            Completion::Completed
        }
    }

    /// Send the ping variants. Results are informational only.
    async fn connectivity_check(&mut self) -> Vec<ProbeResult> {
        let mut results = Vec::new();
        let timeout = self.config.probe_timeout();
        let spacing = self.config.probe_spacing();

        for probe in probes::connectivity_probes() {
            if self.cancel.is_cancelled() {
                break;
            }
            let result = match self.probe(&probe, timeout).await {
                ProbeReply::Response(bytes) => ProbeResult {
                    probe: probe.clone(),
                    responded: true,
                    response: Some(decode_or_text(&bytes)),
                    error: None,
                },
                ProbeReply::Timeout => ProbeResult {
                    probe: probe.clone(),
                    responded: false,
                    response: None,
                    error: Some("timeout".to_string()),
                },
                ProbeReply::SendFailed(e) | ProbeReply::ReceiveFailed(e) => ProbeResult {
                    probe: probe.clone(),
                    responded: false,
                    response: None,
                    error: Some(e.to_string()),
                },
            };
            tracing::debug!(probe = %probe, responded = result.responded, "Connectivity probe");
            results.push(result);

            if !self.cancel.sleep(spacing).await {
                break;
            }
        }

        let responded = results.iter().filter(|r| r.responded).count();
        self.emit(Diagnostic::info(
            COMPONENT,
            format!("Connectivity check: {}/{} probes answered", responded, results.len()),
        ));
        results
    }

    /// Listen only. Short receive timeouts keep cancellation responsive.
    async fn passive_phase(&mut self, budget: Duration) -> PhaseStats {
        let mut stats = PhaseStats::new(Phase::Passive);
        let started = Instant::now();
        let deadline = started + budget;
        let poll = self.config.passive_poll();

        loop {
            if self.cancel.is_cancelled() {
                stats.interrupted = true;
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = poll.min(deadline - now);

            match self.transport.receive(wait).await {
                Ok(bytes) => {
                    tracing::debug!(bytes = bytes.len(), "Passive capture");
                    self.log.record_received(bytes);
                    stats.received += 1;
                }
                Err(e) if e.is_timeout() => continue,
                Err(e) => {
                    stats.errors += 1;
                    self.emit(Diagnostic::error(COMPONENT, format!("Passive listening stopped: {}", e)));
                    break;
                }
            }
        }

        stats.finish(started.elapsed());
        stats
    }

    /// Send each command, wait for one reply, pause. Stops on cancellation
    /// or when the budget is spent.
    async fn probe_phase(
        &mut self,
        phase: Phase,
        commands: Vec<Payload>,
        budget: Duration,
        timeout: Duration,
        delay: Duration,
    ) -> PhaseStats {
        let mut stats = PhaseStats::new(phase);
        let started = Instant::now();
        let deadline = started + budget;

        for command in commands {
            if self.cancel.is_cancelled() || Instant::now() >= deadline {
                stats.interrupted = true;
                break;
            }

            match self.probe(&command, timeout).await {
                ProbeReply::Response(bytes) => {
                    stats.sent += 1;
                    stats.responded += 1;
                    stats.received += 1;
                    if classifier::is_successful_reply(&self.indicators, &bytes) {
                        tracing::info!(phase = %phase, command = %command, "Command answered");
                        stats.successful_commands.push(SuccessfulCommand {
                            command: command.clone(),
                            response: decode_or_text(&bytes),
                        });
                    } else {
                        tracing::debug!(phase = %phase, command = %command, "Command rejected");
                    }
                }
                ProbeReply::Timeout => {
                    stats.sent += 1;
                    stats.timed_out += 1;
                    tracing::debug!(phase = %phase, command = %command, "No response");
                }
                ProbeReply::SendFailed(e) => {
                    stats.errors += 1;
                    self.emit(Diagnostic::warn(COMPONENT, format!("Sending {} failed: {}", command, e)));
                    if !self.transport.is_connected() {
                        stats.interrupted = true;
                        break;
                    }
                }
                ProbeReply::ReceiveFailed(e) => {
                    stats.sent += 1;
                    stats.errors += 1;
                    self.emit(Diagnostic::warn(COMPONENT, format!("Awaiting reply to {} failed: {}", command, e)));
                    if !self.transport.is_connected() {
                        stats.interrupted = true;
                        break;
                    }
                }
            }

            if !self.cancel.sleep(delay).await {
                stats.interrupted = true;
                break;
            }
        }

        stats.finish(started.elapsed());
        stats
    }

    /// Send one payload and wait for a single reply, logging both.
    async fn probe(&mut self, payload: &Payload, timeout: Duration) -> ProbeReply {
        let bytes = payload.to_bytes();
        if let Err(e) = self.transport.send(bytes.clone()).await {
            return ProbeReply::SendFailed(e);
        }
        self.log.record_sent(bytes);

        match self.transport.receive(timeout).await {
            Ok(reply) => {
                self.log.record_received(reply.clone());
                ProbeReply::Response(reply)
            }
            Err(e) if e.is_timeout() => ProbeReply::Timeout,
            Err(e) => ProbeReply::ReceiveFailed(e),
        }
    }

    fn emit(&self, diagnostic: Diagnostic) {
        self.sink.emit(diagnostic);
    }
}

fn decode_or_text(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use printprobe_core::diagnostics::MemorySink;
    use printprobe_core::transport::ScriptedTransport;

    #[tokio::test]
    async fn test_pre_cancelled_run_sends_nothing() {
        let transport = ScriptedTransport::new();
        let handle = transport.handle();
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = DiscoveryOrchestrator::new(transport, "ws://printer:9999", DiscoveryConfig::default())
            .with_cancel_token(cancel)
            .run(None)
            .await
            .unwrap();

        assert_eq!(outcome.report.completion, Completion::Cancelled);
        assert_eq!(handle.connect_attempts(), 0);
        assert!(outcome.log.is_empty());
    }

    #[tokio::test]
    async fn test_connection_failure_aborts() {
        let transport = ScriptedTransport::new().fail_connects(1);
        let sink = MemorySink::new();

        let outcome = DiscoveryOrchestrator::new(transport, "ws://printer:9999", DiscoveryConfig::default())
            .with_sink(sink.clone())
            .run(None)
            .await
            .unwrap();

        assert!(matches!(outcome.report.completion, Completion::Aborted(_)));
        assert!(outcome.report.phases.is_empty());
        assert!(sink.contains("Connection to ws://printer:9999 failed"));
    }

    #[test]
    fn test_decode_or_text() {
        assert_eq!(decode_or_text(br#"{"a":1}"#), serde_json::json!({"a": 1}));
        assert_eq!(decode_or_text(b"pong"), Value::String("pong".into()));
    }
}
