//! Offline analysis of a captured message log.
//!
//! Correlates the log, builds the catalog, extracts a per-field schema of
//! everything the device sent and derives implementation recommendations.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use printprobe_core::Result;
use printprobe_core::catalog::CommandCatalog;
use printprobe_core::classifier::Indicators;
use printprobe_core::message::{CapturedMessage, Direction};
use printprobe_core::message_log::MessageLog;
use printprobe_core::persist::write_atomic;

use crate::correlator::Correlator;
use crate::schema::{SchemaBuilder, ShapeReport};

/// File name of the catalog inside the output directory.
pub const CATALOG_FILE: &str = "catalog.json";
/// File name of the analysis report inside the output directory.
pub const ANALYSIS_FILE: &str = "analysis_report.json";

/// Maximum distinct sample values kept per field.
pub const MAX_FIELD_SAMPLES: usize = 5;

/// Observed shape of one top-level field in device messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// JSON type name, or `mixed` when more than one was seen.
    pub type_name: String,
    pub samples: Vec<Value>,
    /// Messages carrying the field.
    pub occurrences: usize,
    /// `occurrences` over all decoded object messages.
    pub frequency: f64,
    /// Distinct values among the kept samples.
    pub unique_values: usize,
    /// Fewer than two distinct values were seen.
    pub read_only: bool,
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Field schema over every decoded inbound object message.
pub fn extract_field_schema(messages: &[CapturedMessage]) -> BTreeMap<String, FieldSchema> {
    let mut schema: BTreeMap<String, FieldSchema> = BTreeMap::new();
    let mut object_messages = 0usize;

    for message in messages.iter().filter(|m| m.is_received()) {
        let Some(Value::Object(map)) = message.decoded() else {
            continue;
        };
        object_messages += 1;

        for (key, value) in map {
            let field = schema.entry(key.clone()).or_insert_with(|| FieldSchema {
                type_name: type_name(value).to_string(),
                samples: Vec::new(),
                occurrences: 0,
                frequency: 0.0,
                unique_values: 0,
                read_only: true,
            });
            if field.type_name != type_name(value) {
                field.type_name = "mixed".to_string();
            }
            if field.samples.len() < MAX_FIELD_SAMPLES && !field.samples.contains(value) {
                field.samples.push(value.clone());
            }
            field.occurrences += 1;
        }
    }

    for field in schema.values_mut() {
        field.unique_values = field.samples.len();
        field.read_only = field.unique_values <= 1;
        field.frequency = if object_messages == 0 {
            0.0
        } else {
            field.occurrences as f64 / object_messages as f64
        };
    }
    schema
}

/// Headline numbers of an analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutiveSummary {
    pub total_messages: usize,
    pub sent_messages: usize,
    pub received_messages: usize,
    pub pairs: usize,
    /// Pairs classified success or partial.
    pub successful_pairs: usize,
    pub success_rate_percent: f64,
    pub mean_latency_ms: f64,
    pub catalog_commands: usize,
    pub rejected_shapes: usize,
    pub unpaired_commands: usize,
}

/// Full analysis output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub summary: ExecutiveSummary,
    pub catalog: CommandCatalog,
    pub rejected_shapes: Vec<ShapeReport>,
    pub field_schema: BTreeMap<String, FieldSchema>,
    pub recommendations: Vec<String>,
}

impl AnalysisReport {
    /// Write `catalog.json` and `analysis_report.json` into `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        self.catalog.save(dir.join(CATALOG_FILE))?;
        let content = serde_json::to_string_pretty(self)?;
        write_atomic(&dir.join(ANALYSIS_FILE), content.as_bytes())
    }
}

/// Recommendations tiered by overall success rate (0.0 to 1.0).
pub fn recommendations(success_rate: f64, successful_commands: usize) -> Vec<String> {
    let mut recommendations = Vec::new();
    if success_rate > 0.8 {
        recommendations
            .push("High confidence: the socket protocol can fully replace GUI automation".to_string());
        recommendations.push("Use the native client as the primary control path".to_string());
    } else if success_rate > 0.5 {
        recommendations
            .push("Moderate confidence: combine the native client with a GUI fallback".to_string());
        recommendations.push("Route only high-success commands through the native client".to_string());
    } else {
        recommendations.push("Low confidence: keep GUI automation as the primary path".to_string());
        recommendations.push("Use the socket protocol for monitoring and basic queries only".to_string());
    }
    if successful_commands > 10 {
        recommendations.push(format!(
            "{} working commands discovered; the vocabulary is rich enough for a native client",
            successful_commands
        ));
    }
    recommendations
}

/// Correlates, classifies and aggregates a message log.
pub struct Analyzer {
    correlator: Correlator,
    builder: SchemaBuilder,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self {
            correlator: Correlator::default(),
            builder: SchemaBuilder::default(),
        }
    }
}

impl Analyzer {
    pub fn new(window: Duration, indicators: Indicators) -> Self {
        Self {
            correlator: Correlator::new(window),
            builder: SchemaBuilder::new(indicators),
        }
    }

    pub fn with_builder(mut self, builder: SchemaBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn analyze(&self, log: &MessageLog) -> AnalysisReport {
        let correlation = self.correlator.correlate_log(log);
        let schema = self.builder.analyze_correlation(&correlation);

        let pairs = correlation.pair_count();
        let successful_pairs: usize = schema.shapes.iter().map(|s| s.successes + s.partials).sum();
        let success_rate = if pairs == 0 {
            0.0
        } else {
            successful_pairs as f64 / pairs as f64
        };
        let mean_latency_ms = if pairs == 0 {
            0.0
        } else {
            correlation
                .pairs
                .iter()
                .map(|p| p.latency.as_secs_f64() * 1000.0)
                .sum::<f64>()
                / pairs as f64
        };

        let rejected_shapes: Vec<ShapeReport> = schema.rejected().cloned().collect();
        let summary = ExecutiveSummary {
            total_messages: log.len(),
            sent_messages: log.count(Direction::Sent),
            received_messages: log.count(Direction::Received),
            pairs,
            successful_pairs,
            success_rate_percent: success_rate * 100.0,
            mean_latency_ms,
            catalog_commands: schema.catalog.len(),
            rejected_shapes: rejected_shapes.len(),
            unpaired_commands: correlation.unpaired_count(),
        };

        tracing::info!(
            pairs,
            commands = summary.catalog_commands,
            success_rate = summary.success_rate_percent,
            "Analysis complete"
        );

        AnalysisReport {
            generated_at: Utc::now(),
            recommendations: recommendations(success_rate, schema.catalog.len()),
            field_schema: extract_field_schema(log.messages()),
            summary,
            catalog: schema.catalog,
            rejected_shapes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printprobe_core::message::MessageTimestamp;
    use serde_json::json;

    fn received(ms: u64, value: Value) -> CapturedMessage {
        CapturedMessage::received(
            value.to_string().into_bytes(),
            MessageTimestamp::at(Duration::from_millis(ms)),
        )
    }

    #[test]
    fn test_field_schema() {
        let messages = vec![
            received(0, json!({"state": 0, "model": "K1"})),
            received(10, json!({"state": 1, "model": "K1", "nozzleTemp": "25.3"})),
            received(20, json!({"state": "idle"})),
            CapturedMessage::received(b"garbage".to_vec(), MessageTimestamp::at(Duration::from_millis(30))),
        ];
        let schema = extract_field_schema(&messages);

        let state = &schema["state"];
        assert_eq!(state.type_name, "mixed");
        assert_eq!(state.occurrences, 3);
        assert_eq!(state.unique_values, 3);
        assert!(!state.read_only);
        assert!((state.frequency - 1.0).abs() < 1e-9);

        let model = &schema["model"];
        assert_eq!(model.type_name, "string");
        assert!(model.read_only);
        assert!((model.frequency - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_field_samples_are_capped() {
        let messages: Vec<CapturedMessage> = (0..8).map(|i| received(i, json!({"n": i}))).collect();
        let schema = extract_field_schema(&messages);
        assert_eq!(schema["n"].samples.len(), MAX_FIELD_SAMPLES);
        assert_eq!(schema["n"].occurrences, 8);
    }

    #[test]
    fn test_recommendation_tiers() {
        assert!(recommendations(0.9, 3)[0].starts_with("High confidence"));
        assert!(recommendations(0.6, 3)[0].starts_with("Moderate confidence"));
        assert!(recommendations(0.5, 3)[0].starts_with("Low confidence"));
        assert_eq!(recommendations(0.9, 11).len(), 3);
        assert_eq!(recommendations(0.9, 10).len(), 2);
    }
}
