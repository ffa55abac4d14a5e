//! Heuristic response classification.
//!
//! The protocol has no schema, so a response is judged by keywords and by
//! how many of the fields previously seen for the same command shape it
//! carries. Rules apply in a fixed order:
//!
//! 1. the response is not valid JSON → failure
//! 2. a failure indicator occurs in the serialized response → failure
//! 3. a success indicator occurs → success
//! 4. at least half of the expected fields are present → partial,
//!    otherwise failure; an empty expected set counts as covered
//!
//! Discovery judges probe replies with [`is_successful_reply`], which has no
//! expected fields and instead accepts any object carrying more than one
//! field.
//!
//! Indicator matching is a case-insensitive substring test on the compact
//! re-serialization of the response, so keys and values both match.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::payload::Payload;

/// Minimum expected-field coverage for a partial success.
pub const PARTIAL_COVERAGE_THRESHOLD: f64 = 0.5;

/// Outcome of classifying one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Success,
    Partial,
    Failure,
}

impl Classification {
    /// Success or partial success.
    pub fn is_usable(self) -> bool {
        matches!(self, Classification::Success | Classification::Partial)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Success => write!(f, "success"),
            Classification::Partial => write!(f, "partial"),
            Classification::Failure => write!(f, "failure"),
        }
    }
}

/// Which rule decided a classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Reason {
    Unparseable,
    FailureIndicator { indicator: String },
    SuccessIndicator { indicator: String },
    Coverage { fraction: f64 },
    NoExpectedFields,
}

/// Classification with the rule that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub classification: Classification,
    pub reason: Reason,
}

/// Success and failure keyword lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indicators {
    #[serde(default = "default_success_indicators")]
    pub success: Vec<String>,
    #[serde(default = "default_failure_indicators")]
    pub failure: Vec<String>,
}

fn default_success_indicators() -> Vec<String> {
    [
        "status",
        "temperature",
        "progress",
        "result",
        "data",
        "info",
        "files",
        "success",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_failure_indicators() -> Vec<String> {
    ["error", "fail", "invalid", "unknown", "not found"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for Indicators {
    fn default() -> Self {
        Self {
            success: default_success_indicators(),
            failure: default_failure_indicators(),
        }
    }
}

impl Indicators {
    pub fn new<S, F>(success: S, failure: F) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            success: success.into_iter().map(Into::into).collect(),
            failure: failure.into_iter().map(Into::into).collect(),
        }
    }
}

/// Pluggable classification strategy.
pub trait ResponseClassifier: Send + Sync {
    /// Classify `response` to `command`, given the fields previously observed
    /// in responses to the same command shape.
    fn classify(
        &self,
        command: &Payload,
        response: &[u8],
        expected_fields: &BTreeSet<String>,
    ) -> Classification;
}

/// The keyword and field-coverage heuristic.
#[derive(Debug, Clone, Default)]
pub struct IndicatorClassifier {
    indicators: Indicators,
}

impl IndicatorClassifier {
    pub fn new(indicators: Indicators) -> Self {
        Self { indicators }
    }

    pub fn indicators(&self) -> &Indicators {
        &self.indicators
    }

    /// Classify and report which rule fired.
    pub fn evaluate(&self, response: &[u8], expected_fields: &BTreeSet<String>) -> Verdict {
        evaluate(&self.indicators, expected_fields, response)
    }
}

impl ResponseClassifier for IndicatorClassifier {
    fn classify(
        &self,
        _command: &Payload,
        response: &[u8],
        expected_fields: &BTreeSet<String>,
    ) -> Classification {
        self.evaluate(response, expected_fields).classification
    }
}

/// Classify a raw response.
pub fn classify(indicators: &Indicators, expected_fields: &BTreeSet<String>, response: &[u8]) -> Classification {
    evaluate(indicators, expected_fields, response).classification
}

/// Classify a raw response and report the deciding rule.
pub fn evaluate(indicators: &Indicators, expected_fields: &BTreeSet<String>, response: &[u8]) -> Verdict {
    let value: Value = match serde_json::from_slice(response) {
        Ok(value) => value,
        Err(_) => {
            return Verdict {
                classification: Classification::Failure,
                reason: Reason::Unparseable,
            };
        }
    };

    let haystack = value.to_string().to_lowercase();

    if let Some(indicator) = first_match(&indicators.failure, &haystack) {
        return Verdict {
            classification: Classification::Failure,
            reason: Reason::FailureIndicator { indicator },
        };
    }

    if let Some(indicator) = first_match(&indicators.success, &haystack) {
        return Verdict {
            classification: Classification::Success,
            reason: Reason::SuccessIndicator { indicator },
        };
    }

    if expected_fields.is_empty() {
        return Verdict {
            classification: Classification::Partial,
            reason: Reason::NoExpectedFields,
        };
    }

    let fraction = field_coverage(&value, expected_fields);
    let classification = if fraction >= PARTIAL_COVERAGE_THRESHOLD {
        Classification::Partial
    } else {
        Classification::Failure
    };
    Verdict {
        classification,
        reason: Reason::Coverage { fraction },
    }
}

/// Whether a discovery probe reply counts as an answered command.
///
/// Indicators decide first, as in [`evaluate`]. Without a keyword match a
/// JSON object with more than one top-level field still counts.
pub fn is_successful_reply(indicators: &Indicators, response: &[u8]) -> bool {
    let value: Value = match serde_json::from_slice(response) {
        Ok(value) => value,
        Err(_) => return false,
    };
    let haystack = value.to_string().to_lowercase();
    if first_match(&indicators.failure, &haystack).is_some() {
        return false;
    }
    if first_match(&indicators.success, &haystack).is_some() {
        return true;
    }
    value.as_object().is_some_and(|map| map.len() > 1)
}

/// Fraction of `expected_fields` present as top-level keys of `value`.
pub fn field_coverage(value: &Value, expected_fields: &BTreeSet<String>) -> f64 {
    if expected_fields.is_empty() {
        return 0.0;
    }
    let present = match value.as_object() {
        Some(map) => expected_fields.iter().filter(|f| map.contains_key(f.as_str())).count(),
        None => 0,
    };
    present as f64 / expected_fields.len() as f64
}

fn first_match(indicators: &[String], haystack: &str) -> Option<String> {
    indicators
        .iter()
        .filter(|i| !i.is_empty())
        .find(|i| haystack.contains(&i.to_lowercase()))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn only(success: &[&str], failure: &[&str]) -> Indicators {
        Indicators::new(success.iter().copied(), failure.iter().copied())
    }

    #[test]
    fn test_unparseable_is_failure() {
        let verdict = evaluate(&Indicators::default(), &fields(&["status"]), b"status: ok");
        assert_eq!(verdict.classification, Classification::Failure);
        assert_eq!(verdict.reason, Reason::Unparseable);
    }

    #[test]
    fn test_failure_indicator_beats_success_indicator() {
        let indicators = only(&["status"], &["error"]);
        let response = br#"{"status":"ERROR","nozzleTemp":210}"#;
        let verdict = evaluate(&indicators, &fields(&["status", "nozzleTemp"]), response);
        assert_eq!(verdict.classification, Classification::Failure);
        assert!(matches!(verdict.reason, Reason::FailureIndicator { .. }));
    }

    #[test]
    fn test_unknown_error_with_no_coverage() {
        let indicators = only(&["status"], &["error"]);
        let verdict = evaluate(&indicators, &BTreeSet::new(), br#"{"error":"unknown"}"#);
        assert_eq!(verdict.classification, Classification::Failure);
        assert_eq!(
            verdict.reason,
            Reason::FailureIndicator {
                indicator: "error".to_string()
            }
        );
    }

    #[test]
    fn test_success_indicator_case_insensitive() {
        let indicators = only(&["Status"], &[]);
        assert_eq!(
            classify(&indicators, &BTreeSet::new(), br#"{"STATUS":"ready"}"#),
            Classification::Success
        );
    }

    #[test]
    fn test_structural_coverage() {
        let indicators = only(&[], &[]);
        let expected = fields(&["nozzleTemp", "bedTemp", "state", "fan"]);

        let half = br#"{"nozzleTemp":200,"bedTemp":60}"#;
        assert_eq!(classify(&indicators, &expected, half), Classification::Partial);

        let quarter = br#"{"nozzleTemp":200}"#;
        assert_eq!(classify(&indicators, &expected, quarter), Classification::Failure);
    }

    #[test]
    fn test_no_expected_fields_is_partial() {
        let verdict = evaluate(&only(&[], &["error"]), &BTreeSet::new(), br#"{"a":1,"b":2}"#);
        assert_eq!(verdict.classification, Classification::Partial);
        assert_eq!(verdict.reason, Reason::NoExpectedFields);

        // A failure indicator still wins.
        let verdict = evaluate(&only(&[], &["error"]), &BTreeSet::new(), br#"{"error":1}"#);
        assert_eq!(verdict.classification, Classification::Failure);
    }

    #[test]
    fn test_successful_reply_rules() {
        let indicators = Indicators::default();
        assert!(is_successful_reply(&indicators, br#"{"nozzleTemp":200,"bedTemp":60}"#));
        assert!(is_successful_reply(&indicators, br#"{"result":"ok"}"#));
        assert!(!is_successful_reply(&indicators, br#"{"pong":true}"#));
        assert!(!is_successful_reply(&indicators, br#"{"error":"invalid","code":3}"#));
        assert!(!is_successful_reply(&indicators, br#"[1,2,3]"#));
        assert!(!is_successful_reply(&indicators, b"ok"));
    }

    #[test]
    fn test_empty_indicators_are_ignored() {
        let indicators = only(&[""], &[""]);
        let expected = fields(&["x"]);
        assert_eq!(
            classify(&indicators, &expected, br#"{"x":1}"#),
            Classification::Partial
        );
    }

    #[test]
    fn test_classification_is_deterministic() {
        let classifier = IndicatorClassifier::default();
        let command = Payload::new().with("cmd", "get_status");
        let expected = fields(&["state"]);
        let response = br#"{"state":1,"printProgress":42}"#;
        let first = classifier.classify(&command, response, &expected);
        for _ in 0..10 {
            assert_eq!(classifier.classify(&command, response, &expected), first);
        }
    }

    #[test]
    fn test_default_indicators() {
        let indicators = Indicators::default();
        assert!(indicators.success.contains(&"status".to_string()));
        assert!(indicators.failure.contains(&"not found".to_string()));
        assert!(Classification::Partial.is_usable());
        assert!(!Classification::Failure.is_usable());
    }
}
