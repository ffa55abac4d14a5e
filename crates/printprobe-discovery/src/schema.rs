//! Schema builder: aggregates classified pairs into a command catalog.
//!
//! Pairs are grouped by command shape (the sorted set of top-level field
//! names). Because values are ignored, `{"cmd":"get_status"}` and
//! `{"cmd":"get_temperature"}` land in the same group; the most recent
//! usable payload becomes the group's template.
//!
//! Each response is classified against the response fields already seen
//! for its shape, in capture order. The first response of a shape has no
//! expected fields, so it is at least partial unless a failure indicator
//! fires.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use printprobe_core::catalog::{CatalogEntry, CommandCatalog, LatencyStats};
use printprobe_core::classifier::{Classification, IndicatorClassifier, Indicators, ResponseClassifier};
use printprobe_core::message::CapturedMessage;
use printprobe_core::payload::{CommandShape, Payload, value_token};

use crate::correlator::{CommandResponsePair, Correlation};
use crate::describe::describe;

/// Aggregated outcome for one command shape, usable or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeReport {
    pub shape: CommandShape,
    pub id: String,
    /// Paired attempts.
    pub attempts: usize,
    pub successes: usize,
    pub partials: usize,
    pub failures: usize,
    /// Commands of this shape that got no response inside the window.
    pub timeouts: usize,
    pub success_rate: f64,
    /// Whether the shape made it into the catalog.
    pub usable: bool,
    pub sample_command: Payload,
    #[serde(default)]
    pub sample_response: Option<Value>,
}

/// Catalog plus per-shape reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaAnalysis {
    pub catalog: CommandCatalog,
    pub shapes: Vec<ShapeReport>,
    /// Sent messages that were not JSON objects and could not be grouped.
    pub undecodable_commands: usize,
}

impl SchemaAnalysis {
    /// Shapes excluded from the catalog, kept for human review.
    pub fn rejected(&self) -> impl Iterator<Item = &ShapeReport> {
        self.shapes.iter().filter(|s| !s.usable)
    }
}

#[derive(Default)]
struct ShapeGroup<'a> {
    pairs: Vec<(&'a CommandResponsePair, Payload)>,
    timeouts: usize,
    last_command: Option<Payload>,
}

/// Builds the command catalog from correlated pairs.
pub struct SchemaBuilder {
    indicators: Indicators,
    classifier: Arc<dyn ResponseClassifier>,
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new(Indicators::default())
    }
}

impl SchemaBuilder {
    pub fn new(indicators: Indicators) -> Self {
        Self {
            classifier: Arc::new(IndicatorClassifier::new(indicators.clone())),
            indicators,
        }
    }

    /// Replace the classification strategy. The indicators are still stored
    /// in each entry for the client to use.
    pub fn with_classifier(mut self, classifier: Arc<dyn ResponseClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Build the production catalog from pairs.
    pub fn build(&self, pairs: &[CommandResponsePair]) -> CommandCatalog {
        self.analyze(pairs, &[]).catalog
    }

    pub fn analyze_correlation(&self, correlation: &Correlation) -> SchemaAnalysis {
        self.analyze(&correlation.pairs, &correlation.unpaired)
    }

    /// Build the catalog and a report for every shape seen.
    pub fn analyze(&self, pairs: &[CommandResponsePair], unpaired: &[CapturedMessage]) -> SchemaAnalysis {
        let mut groups: BTreeMap<CommandShape, ShapeGroup<'_>> = BTreeMap::new();
        let mut undecodable = 0usize;

        let mut ordered: Vec<&CommandResponsePair> = pairs.iter().collect();
        ordered.sort_by_key(|p| p.command.offset());

        for pair in ordered {
            match pair.command.payload() {
                Some(payload) => {
                    let group = groups.entry(payload.shape()).or_default();
                    group.last_command = Some(payload.clone());
                    group.pairs.push((pair, payload));
                }
                None => undecodable += 1,
            }
        }

        for command in unpaired {
            match command.payload() {
                Some(payload) => {
                    let group = groups.entry(payload.shape()).or_default();
                    group.timeouts += 1;
                    if group.last_command.is_none() {
                        group.last_command = Some(payload);
                    }
                }
                None => undecodable += 1,
            }
        }

        // Fewer fields first, so the plainest shape keeps the plain id.
        let mut shapes: Vec<(CommandShape, ShapeGroup<'_>)> = groups.into_iter().collect();
        shapes.sort_by(|(a, _), (b, _)| a.fields().len().cmp(&b.fields().len()).then_with(|| a.cmp(b)));

        let mut catalog = CommandCatalog::new();
        let mut reports = Vec::with_capacity(shapes.len());
        let mut used_ids: HashSet<String> = HashSet::new();

        for (shape, group) in shapes {
            let aggregate = self.aggregate(&group);
            let sample = aggregate
                .template
                .clone()
                .or_else(|| group.last_command.clone())
                .unwrap_or_default();
            let id = unique_id(&sample, &mut used_ids);

            let attempts = group.pairs.len();
            let usable = aggregate.successes + aggregate.partials;
            let success_rate = if attempts == 0 {
                0.0
            } else {
                usable as f64 / attempts as f64
            };

            if let Some(template) = aggregate.template.clone() {
                let mut entry = CatalogEntry::new(id.clone(), template)
                    .with_expected_fields(aggregate.usable_fields.iter().cloned())
                    .with_indicators(self.indicators.clone())
                    .with_latency(LatencyStats::from_samples(&aggregate.latencies));
                entry.success_rate = success_rate;
                entry.attempts = attempts;
                entry.successes = aggregate.successes;
                entry.partials = aggregate.partials;
                entry.description = describe(&entry.template, aggregate.sample_response.as_ref());
                catalog.insert(entry);
            } else {
                tracing::debug!(shape = %shape, attempts, timeouts = group.timeouts, "Shape rejected");
            }

            reports.push(ShapeReport {
                shape,
                id,
                attempts,
                successes: aggregate.successes,
                partials: aggregate.partials,
                failures: aggregate.failures,
                timeouts: group.timeouts,
                success_rate,
                usable: usable > 0,
                sample_command: sample,
                sample_response: aggregate.sample_response.or(aggregate.last_response),
            });
        }

        catalog.status_order = status_order(&catalog);
        tracing::info!(
            commands = catalog.len(),
            shapes = reports.len(),
            "Command catalog built"
        );

        SchemaAnalysis {
            catalog,
            shapes: reports,
            undecodable_commands: undecodable,
        }
    }

    fn aggregate(&self, group: &ShapeGroup<'_>) -> Aggregate {
        let mut aggregate = Aggregate::default();
        let mut observed: BTreeSet<String> = BTreeSet::new();

        for (pair, payload) in &group.pairs {
            let classification = self.classifier.classify(payload, pair.response.raw(), &observed);
            let fields = response_fields(&pair.response);

            match classification {
                Classification::Success => aggregate.successes += 1,
                Classification::Partial => aggregate.partials += 1,
                Classification::Failure => aggregate.failures += 1,
            }
            if classification.is_usable() {
                aggregate.template = Some(payload.clone());
                aggregate.sample_response = pair.response.decoded().cloned();
                aggregate.usable_fields.extend(fields.iter().cloned());
            }
            aggregate.last_response = pair.response.decoded().cloned();
            aggregate.latencies.push(pair.latency);
            observed.extend(fields);
        }
        aggregate
    }
}

#[derive(Default)]
struct Aggregate {
    successes: usize,
    partials: usize,
    failures: usize,
    template: Option<Payload>,
    sample_response: Option<Value>,
    last_response: Option<Value>,
    usable_fields: BTreeSet<String>,
    latencies: Vec<Duration>,
}

fn response_fields(response: &CapturedMessage) -> Vec<String> {
    response
        .decoded()
        .and_then(Value::as_object)
        .map(|map| map.keys().cloned().collect())
        .unwrap_or_default()
}

/// Canonical id of a payload: `<key>_<value>` for the first discriminator
/// key present, else `generic_` plus the two lexicographically first field
/// names.
pub fn canonical_id(payload: &Payload) -> String {
    if let Some((key, value)) = payload.discriminator() {
        return sanitize(&format!("{}_{}", key, value_token(value)));
    }
    let fields: Vec<&str> = payload.keys().take(2).collect();
    if fields.is_empty() {
        "generic_empty".to_string()
    } else {
        sanitize(&format!("generic_{}", fields.join("_")))
    }
}

fn unique_id(payload: &Payload, used: &mut HashSet<String>) -> String {
    let base = canonical_id(payload);
    if used.insert(base.clone()) {
        return base;
    }

    // Same discriminator value under a different shape: qualify with the
    // remaining field names.
    let discriminator = payload.discriminator().map(|(key, _)| key);
    let rest: Vec<&str> = payload
        .keys()
        .filter(|k| Some(*k) != discriminator)
        .collect();
    let qualified = if rest.is_empty() {
        base.clone()
    } else {
        sanitize(&format!("{}_{}", base, rest.join("_")))
    };
    if used.insert(qualified.clone()) {
        return qualified;
    }

    let mut n = 2usize;
    loop {
        let candidate = format!("{}_{}", qualified, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Status-class ids by success rate, best first, ties by id.
fn status_order(catalog: &CommandCatalog) -> Vec<String> {
    let mut status: Vec<&CatalogEntry> = catalog.iter().filter(|e| e.status_class).collect();
    status.sort_by(|a, b| {
        b.success_rate
            .total_cmp(&a.success_rate)
            .then_with(|| a.id.cmp(&b.id))
    });
    status.into_iter().map(|e| e.id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use printprobe_core::message::MessageTimestamp;
    use serde_json::json;

    fn pair(at_ms: u64, latency_ms: u64, command: Value, response: Value) -> CommandResponsePair {
        let command = CapturedMessage::sent(
            command.to_string().into_bytes(),
            MessageTimestamp::at(Duration::from_millis(at_ms)),
        );
        let response = CapturedMessage::received(
            response.to_string().into_bytes(),
            MessageTimestamp::at(Duration::from_millis(at_ms + latency_ms)),
        );
        CommandResponsePair {
            command,
            response,
            latency: Duration::from_millis(latency_ms),
        }
    }

    #[test]
    fn test_canonical_id() {
        assert_eq!(canonical_id(&Payload::new().with("cmd", "get_status")), "cmd_get_status");
        assert_eq!(
            canonical_id(&Payload::new().with("request", "job_info").with("action", "x")),
            "action_x"
        );
        assert_eq!(
            canonical_id(&Payload::new().with("type", "info").with("method", "get").with("z", 1)),
            "generic_method_type"
        );
        assert_eq!(canonical_id(&Payload::new().with("id", 3)), "generic_id");
        assert_eq!(canonical_id(&Payload::new()), "generic_empty");
    }

    #[test]
    fn test_build_single_success() {
        let builder = SchemaBuilder::default();
        let pairs = vec![pair(0, 200, json!({"cmd": "get_status"}), json!({"status": "ready"}))];
        let catalog = builder.build(&pairs);

        let entry = catalog.get("cmd_get_status").expect("entry");
        assert_eq!(entry.success_rate, 1.0);
        assert_eq!(entry.attempts, 1);
        assert!(entry.expected_fields.contains("status"));
        assert!((entry.latency.mean_ms - 200.0).abs() < 1e-9);
        assert!(entry.status_class);
        assert_eq!(catalog.status_order, vec!["cmd_get_status".to_string()]);
    }

    #[test]
    fn test_shape_groups_ignore_values() {
        let builder = SchemaBuilder::default();
        let pairs = vec![
            pair(0, 100, json!({"cmd": "get_status"}), json!({"status": "idle"})),
            pair(1_000, 300, json!({"cmd": "get_temperature"}), json!({"temperature": 25})),
        ];
        let analysis = builder.analyze(&pairs, &[]);
        assert_eq!(analysis.catalog.len(), 1);
        // Most recent usable payload is the template.
        let entry = analysis.catalog.iter().next().unwrap();
        assert_eq!(entry.id, "cmd_get_temperature");
        assert_eq!(entry.template, Payload::new().with("cmd", "get_temperature"));
        assert_eq!(entry.attempts, 2);
        assert!((entry.latency.mean_ms - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_success_shape_is_rejected_but_reported() {
        let builder = SchemaBuilder::default();
        let pairs = vec![pair(0, 50, json!({"cmd": "bogus"}), json!({"error": "unknown"}))];
        let unpaired = vec![CapturedMessage::sent(
            br#"{"method":"pause"}"#.to_vec(),
            MessageTimestamp::at(Duration::from_secs(2)),
        )];
        let analysis = builder.analyze(&pairs, &unpaired);

        assert!(analysis.catalog.is_empty());
        let rejected: Vec<&ShapeReport> = analysis.rejected().collect();
        assert_eq!(rejected.len(), 2);
        let bogus = rejected.iter().find(|s| s.id == "cmd_bogus").unwrap();
        assert_eq!(bogus.failures, 1);
        assert_eq!(bogus.sample_response, Some(json!({"error": "unknown"})));
        let pause = rejected.iter().find(|s| s.id == "generic_method").unwrap();
        assert_eq!(pause.timeouts, 1);
        assert_eq!(pause.attempts, 0);
    }

    #[test]
    fn test_structural_partial_uses_earlier_fields() {
        let builder = SchemaBuilder::new(Indicators::new(["ready"], ["error"]));
        let pairs = vec![
            pair(0, 10, json!({"op": 1}), json!({"a": 1, "b": 2, "note": "ready"})),
            pair(100, 10, json!({"op": 2}), json!({"a": 3, "b": 4, "c": 5})),
            pair(200, 10, json!({"op": 3}), json!({"z": 0})),
        ];
        let analysis = builder.analyze(&pairs, &[]);
        let entry = analysis.catalog.get("generic_op").unwrap();
        assert_eq!(entry.successes, 1);
        assert_eq!(entry.partials, 1);
        assert_eq!(entry.attempts, 3);
        assert!((entry.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(entry.template, Payload::new().with("op", 2));
        let fields: Vec<&str> = entry.expected_fields.iter().map(String::as_str).collect();
        assert_eq!(fields, vec!["a", "b", "c", "note"]);
    }

    #[test]
    fn test_colliding_ids_are_qualified() {
        let builder = SchemaBuilder::default();
        let pairs = vec![
            pair(0, 10, json!({"cmd": "fan_control"}), json!({"result": "ok"})),
            pair(100, 10, json!({"cmd": "fan_control", "state": "query"}), json!({"result": "ok"})),
        ];
        let catalog = builder.build(&pairs);
        assert!(catalog.contains("cmd_fan_control"));
        assert!(catalog.contains("cmd_fan_control_state"));
    }

    struct RejectAll;

    impl ResponseClassifier for RejectAll {
        fn classify(&self, _: &Payload, _: &[u8], _: &BTreeSet<String>) -> Classification {
            Classification::Failure
        }
    }

    #[test]
    fn test_custom_classifier_decides_usability() {
        let builder = SchemaBuilder::default().with_classifier(Arc::new(RejectAll));
        let pairs = vec![pair(0, 10, json!({"cmd": "get_status"}), json!({"status": "ready"}))];
        let analysis = builder.analyze(&pairs, &[]);

        assert!(analysis.catalog.is_empty());
        assert_eq!(analysis.shapes[0].failures, 1);
        assert!(!analysis.shapes[0].usable);
    }

    #[test]
    fn test_status_order_by_success_rate() {
        let builder = SchemaBuilder::default();
        let pairs = vec![
            pair(0, 10, json!({"cmd": "get_status"}), json!({"status": 1})),
            pair(100, 10, json!({"cmd": "get_status"}), json!({"error": "busy"})),
            pair(200, 10, json!({"request": "status"}), json!({"status": 1})),
        ];
        let catalog = builder.build(&pairs);
        assert_eq!(
            catalog.status_order,
            vec!["request_status".to_string(), "cmd_get_status".to_string()]
        );
        catalog.validate().unwrap();
    }
}
