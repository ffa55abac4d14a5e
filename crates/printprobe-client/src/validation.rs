//! Validation runs against a live device.
//!
//! Sends each of the first N catalog commands R times with a short pause and
//! reports how often each one worked.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use printprobe_core::payload::Payload;
use printprobe_core::transport::Transport;

use crate::client::{CommandOutcome, ResilientClient};
use crate::error::Result;

/// How much to validate.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Catalog entries to exercise, in id order.
    pub commands: usize,
    /// Sends per command.
    pub runs: u32,
    /// Pause after every send.
    pub pause: Duration,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            commands: 5,
            runs: 3,
            pause: Duration::from_millis(printprobe_core::config::client::DEFAULT_VALIDATION_PAUSE_MS),
        }
    }
}

/// Results for one command.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandValidation {
    pub command_id: String,
    pub runs: u32,
    pub successes: u32,
    pub partials: u32,
    pub failures: u32,
    pub timeouts: u32,
    /// Full successes over runs.
    pub success_rate: f64,
}

impl CommandValidation {
    fn record(&mut self, outcome: &CommandOutcome) {
        self.runs += 1;
        match outcome {
            CommandOutcome::Success(_) => self.successes += 1,
            CommandOutcome::PartialSuccess(_) => self.partials += 1,
            CommandOutcome::Failure(_) => self.failures += 1,
            CommandOutcome::Timeout => self.timeouts += 1,
        }
        self.success_rate = f64::from(self.successes) / f64::from(self.runs);
    }
}

/// Validation summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub generated_at: DateTime<Utc>,
    pub commands: Vec<CommandValidation>,
    pub total_runs: u32,
    pub overall_success_rate: f64,
}

/// Run validation through `client`. Stops early, returning an error, when
/// the client's cancel token fires.
pub async fn validate<T: Transport>(
    client: &mut ResilientClient<T>,
    options: &ValidationOptions,
) -> Result<ValidationReport> {
    let ids: Vec<String> = client.catalog().ids().take(options.commands).map(str::to_string).collect();
    let cancel = client.cancel_token();
    let mut results = Vec::with_capacity(ids.len());

    for id in ids {
        let mut result = CommandValidation {
            command_id: id.clone(),
            ..Default::default()
        };
        for run in 0..options.runs {
            let outcome = client.send_command(&id, &Payload::new()).await?;
            tracing::debug!(command_id = %id, run, outcome = outcome.kind(), "Validation run");
            result.record(&outcome);
            if !cancel.sleep(options.pause).await {
                return Err(crate::ClientError::Cancelled);
            }
        }
        tracing::info!(
            command_id = %id,
            success_rate = result.success_rate,
            "Command validated"
        );
        results.push(result);
    }

    let total_runs: u32 = results.iter().map(|r| r.runs).sum();
    let total_successes: u32 = results.iter().map(|r| r.successes).sum();
    let overall_success_rate = if total_runs == 0 {
        0.0
    } else {
        f64::from(total_successes) / f64::from(total_runs)
    };

    Ok(ValidationReport {
        generated_at: Utc::now(),
        commands: results,
        total_runs,
        overall_success_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use printprobe_core::catalog::CommandCatalog;
    use printprobe_core::transport::ScriptedTransport;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_validation_counts_per_command() {
        // Fallback ids in order: get_progress, get_status, get_temperature.
        let transport = ScriptedTransport::new()
            .with_json(json!({"progress": 10}))
            .with_json(json!({"error": "busy"}))
            .with_json(json!({"status": "idle"}))
            .with_json(json!({"status": "idle"}));
        let mut client = ResilientClient::new(transport, "ws://printer:9999", CommandCatalog::fallback());

        let options = ValidationOptions {
            commands: 2,
            runs: 2,
            pause: Duration::from_millis(500),
        };
        let report = validate(&mut client, &options).await.unwrap();

        assert_eq!(report.commands.len(), 2);
        assert_eq!(report.commands[0].command_id, "get_progress");
        assert_eq!(report.commands[0].successes, 1);
        assert_eq!(report.commands[0].failures, 1);
        assert_eq!(report.commands[1].success_rate, 1.0);
        assert_eq!(report.total_runs, 4);
        assert!((report.overall_success_rate - 0.75).abs() < 1e-9);
    }
}
