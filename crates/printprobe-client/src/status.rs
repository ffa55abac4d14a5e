//! Printer status derived from a status-class response.
//!
//! A status is rebuilt from one response at a time and never merged with
//! older data. When no status command succeeds the previous value is
//! returned as stale.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Nozzle temperature below which the printer counts as cool.
pub const COOL_NOZZLE_CELSIUS: f64 = 50.0;

/// Operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrinterState {
    Idle,
    Printing,
    Paused,
    Stopped,
    Error,
    Heating,
    Ready,
    Unknown,
}

impl PrinterState {
    /// Numeric codes: 0 idle, 1 printing. Names are matched
    /// case-insensitively.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(0) => Some(PrinterState::Idle),
                Some(1) => Some(PrinterState::Printing),
                _ => Some(PrinterState::Unknown),
            },
            Value::String(s) => Self::from_name(s),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let state = match name.trim().to_lowercase().as_str() {
            "idle" => PrinterState::Idle,
            "printing" => PrinterState::Printing,
            "paused" => PrinterState::Paused,
            "stopped" => PrinterState::Stopped,
            "error" => PrinterState::Error,
            "heating" => PrinterState::Heating,
            "ready" => PrinterState::Ready,
            "unknown" => PrinterState::Unknown,
            other => match other.parse::<i64>() {
                Ok(0) => PrinterState::Idle,
                Ok(1) => PrinterState::Printing,
                _ => return None,
            },
        };
        Some(state)
    }
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PrinterState::Idle => "idle",
            PrinterState::Printing => "printing",
            PrinterState::Paused => "paused",
            PrinterState::Stopped => "stopped",
            PrinterState::Error => "error",
            PrinterState::Heating => "heating",
            PrinterState::Ready => "ready",
            PrinterState::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Snapshot of the printer built from one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrinterStatus {
    pub state: PrinterState,
    /// Celsius, keyed `nozzle`, `bed`, ...
    pub temperatures: BTreeMap<String, f64>,
    /// Percent, 0 to 100.
    pub progress: f64,
    pub current_file: Option<String>,
    pub time_remaining_secs: Option<u64>,
    pub errors: Vec<String>,
    pub last_update: DateTime<Utc>,
    /// Catalog id of the command that produced the response.
    pub source_command: String,
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn first<'a>(map: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k))
}

fn collect_errors(value: &Value, errors: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.trim().is_empty() => errors.push(s.clone()),
        Value::Number(n) if n.as_i64() != Some(0) => errors.push(format!("error code {}", n)),
        Value::Array(items) => items.iter().for_each(|item| collect_errors(item, errors)),
        Value::Object(map) => {
            // {"errcode": 0, "key": 0} is the all-clear form.
            match map.get("errcode").and_then(Value::as_i64) {
                Some(0) => {}
                Some(code) => errors.push(format!("error code {}", code)),
                None if !map.is_empty() => errors.push(Value::Object(map.clone()).to_string()),
                None => {}
            }
        }
        _ => {}
    }
}

impl PrinterStatus {
    /// Parse a successful status response.
    ///
    /// A response without a recognizable state still proves the printer
    /// answered, so it is reported as ready.
    pub fn from_response(response: &Value, source_command: impl Into<String>) -> Self {
        let mut status = Self {
            state: PrinterState::Ready,
            temperatures: BTreeMap::new(),
            progress: 0.0,
            current_file: None,
            time_remaining_secs: None,
            errors: Vec::new(),
            last_update: Utc::now(),
            source_command: source_command.into(),
        };
        let Some(map) = response.as_object() else {
            return status;
        };

        if let Some(state) = first(map, &["state", "status"]).and_then(PrinterState::from_value) {
            status.state = state;
        }
        if let Some(progress) = first(map, &["printProgress", "progress", "percent"]).and_then(number) {
            status.progress = progress.clamp(0.0, 100.0);
        }

        if let Some(Value::Object(temps)) = map.get("temperature") {
            for (name, value) in temps {
                if let Some(celsius) = number(value) {
                    status.temperatures.insert(name.clone(), celsius);
                }
            }
        }
        for (key, name) in [("nozzleTemp", "nozzle"), ("bedTemp", "bed"), ("nozzle", "nozzle"), ("bed", "bed")] {
            if let Some(celsius) = map.get(key).and_then(number) {
                status.temperatures.insert(name.to_string(), celsius);
            }
        }

        status.current_file = first(map, &["printFileName", "current_file"])
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        status.time_remaining_secs = map
            .get("printLeftTime")
            .and_then(number)
            .filter(|secs| *secs >= 0.0)
            .map(|secs| secs as u64);

        for key in ["err", "error", "errors"] {
            if let Some(value) = map.get(key) {
                collect_errors(value, &mut status.errors);
            }
        }
        status
    }

    pub fn nozzle_temperature(&self) -> Option<f64> {
        self.temperatures.get("nozzle").copied()
    }

    pub fn is_operational(&self) -> bool {
        !matches!(self.state, PrinterState::Error | PrinterState::Unknown)
    }

    pub fn is_ready_for_print(&self) -> bool {
        matches!(self.state, PrinterState::Idle | PrinterState::Ready)
    }

    pub fn is_printing(&self) -> bool {
        self.state == PrinterState::Printing || (self.progress > 0.0 && self.progress < 100.0)
    }

    /// Idle, no job in progress and a cool nozzle. An unknown nozzle
    /// temperature is not cool.
    pub fn is_ready(&self) -> bool {
        self.state == PrinterState::Idle
            && (self.progress == 0.0 || self.progress == 100.0)
            && self
                .nozzle_temperature()
                .is_some_and(|celsius| celsius < COOL_NOZZLE_CELSIUS)
    }
}

/// Result of a status query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "freshness", rename_all = "lowercase")]
pub enum StatusSnapshot {
    /// Built from a response obtained just now.
    Fresh(PrinterStatus),
    /// No status command succeeded; `last_known` is the previous snapshot,
    /// now stale.
    Unknown { last_known: Option<PrinterStatus> },
}

impl StatusSnapshot {
    pub fn is_fresh(&self) -> bool {
        matches!(self, StatusSnapshot::Fresh(_))
    }

    pub fn state(&self) -> PrinterState {
        match self {
            StatusSnapshot::Fresh(status) => status.state,
            StatusSnapshot::Unknown { .. } => PrinterState::Unknown,
        }
    }

    /// The fresh status, or the stale one when nothing newer exists.
    pub fn status(&self) -> Option<&PrinterStatus> {
        match self {
            StatusSnapshot::Fresh(status) => Some(status),
            StatusSnapshot::Unknown { last_known } => last_known.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_broadcast_style_response() {
        let status = PrinterStatus::from_response(
            &json!({
                "state": 1,
                "printProgress": 42,
                "nozzleTemp": "210.5",
                "bedTemp": 60,
                "printFileName": "/usr/data/printer_data/gcodes/part.gcode",
                "printLeftTime": 1800,
                "err": {"errcode": 0, "key": 0}
            }),
            "get_status",
        );

        assert_eq!(status.state, PrinterState::Printing);
        assert_eq!(status.progress, 42.0);
        assert_eq!(status.nozzle_temperature(), Some(210.5));
        assert_eq!(status.temperatures["bed"], 60.0);
        assert_eq!(status.time_remaining_secs, Some(1800));
        assert!(status.current_file.as_deref().unwrap().ends_with("part.gcode"));
        assert!(status.errors.is_empty());
        assert!(status.is_printing());
        assert!(!status.is_ready());
        assert!(status.is_operational());
    }

    #[test]
    fn test_ready_requires_idle_and_cool() {
        let idle_cool = PrinterStatus::from_response(
            &json!({"state": 0, "printProgress": 100, "nozzleTemp": "31.0"}),
            "get_status",
        );
        assert!(idle_cool.is_ready());
        assert!(idle_cool.is_ready_for_print());

        let idle_hot = PrinterStatus::from_response(&json!({"state": 0, "nozzleTemp": 180}), "get_status");
        assert!(!idle_hot.is_ready());

        let no_temperature = PrinterStatus::from_response(&json!({"state": "idle"}), "get_status");
        assert!(!no_temperature.is_ready());
        assert!(no_temperature.is_ready_for_print());
    }

    #[test]
    fn test_named_states_and_errors() {
        let status = PrinterStatus::from_response(
            &json!({"status": "Paused", "err": {"errcode": 2001}, "temperature": {"nozzle": 25, "bed": "22"}}),
            "get_temperature",
        );
        assert_eq!(status.state, PrinterState::Paused);
        assert_eq!(status.errors, vec!["error code 2001".to_string()]);
        assert_eq!(status.temperatures.len(), 2);

        // A reply with no state is still a live printer.
        let bare = PrinterStatus::from_response(&json!({"temperature": 24.0}), "get_temperature");
        assert_eq!(bare.state, PrinterState::Ready);
        assert_eq!(PrinterState::from_value(&json!(7)), Some(PrinterState::Unknown));
        assert_eq!(PrinterState::from_name("weird"), None);
    }

    #[test]
    fn test_stale_snapshot_keeps_last_known() {
        let last = PrinterStatus::from_response(&json!({"state": 0}), "get_status");
        let snapshot = StatusSnapshot::Unknown {
            last_known: Some(last.clone()),
        };
        assert!(!snapshot.is_fresh());
        assert_eq!(snapshot.state(), PrinterState::Unknown);
        assert_eq!(snapshot.status(), Some(&last));
    }
}
