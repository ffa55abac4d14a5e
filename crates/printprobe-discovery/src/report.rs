//! Discovery report written at the end of a run.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use printprobe_core::Result;
use printprobe_core::payload::Payload;
use printprobe_core::persist::write_atomic;

/// Discovery phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Passive,
    Active,
    Fuzzing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Passive => write!(f, "passive"),
            Phase::Active => write!(f, "active"),
            Phase::Fuzzing => write!(f, "fuzzing"),
        }
    }
}

/// How a discovery run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum Completion {
    Completed,
    Cancelled,
    Aborted(String),
}

impl Completion {
    pub fn is_completed(&self) -> bool {
        matches!(self, Completion::Completed)
    }
}

/// A probe that drew a usable response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessfulCommand {
    pub command: Payload,
    pub response: Value,
}

/// Counters for one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub sent: usize,
    pub responded: usize,
    pub timed_out: usize,
    pub errors: usize,
    /// Inbound messages captured during the phase.
    pub received: usize,
    /// Stopped early by cancellation or the phase budget.
    pub interrupted: bool,
    pub successful_commands: Vec<SuccessfulCommand>,
}

impl PhaseStats {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            started_at: Utc::now(),
            elapsed_ms: 0,
            sent: 0,
            responded: 0,
            timed_out: 0,
            errors: 0,
            received: 0,
            interrupted: false,
            successful_commands: Vec::new(),
        }
    }

    pub fn finish(&mut self, elapsed: Duration) {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }
}

/// Result of one connectivity probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub probe: Payload,
    pub responded: bool,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Summary of a discovery run, for human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub analysis_timestamp: DateTime<Utc>,
    pub uri: String,
    pub completion: Completion,
    pub total_messages: usize,
    pub sent_messages: usize,
    pub received_messages: usize,
    pub connectivity: Vec<ProbeResult>,
    pub phases: Vec<PhaseStats>,
}

impl DiscoveryReport {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            analysis_timestamp: Utc::now(),
            uri: uri.into(),
            completion: Completion::Completed,
            total_messages: 0,
            sent_messages: 0,
            received_messages: 0,
            connectivity: Vec::new(),
            phases: Vec::new(),
        }
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseStats> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn successful_commands(&self) -> impl Iterator<Item = &SuccessfulCommand> {
        self.phases.iter().flat_map(|p| p.successful_commands.iter())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        write_atomic(path.as_ref(), content.as_bytes())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&content)?)
    }
}
