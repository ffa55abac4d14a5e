//! Command catalog: the persisted vocabulary of production-usable commands.
//!
//! Produced by the schema builder after discovery and loaded read-only by
//! the resilient client. When no catalog file exists a small built-in
//! fallback catalog is used instead.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog_err;
use crate::classifier::Indicators;
use crate::error::Result;
use crate::payload::{CommandShape, Payload};

/// Catalog file format version.
pub const CATALOG_VERSION: u32 = 1;

/// Largest latency statistic a loaded catalog may carry: one day.
pub const MAX_LATENCY_MS: f64 = 86_400_000.0;

/// Latency distribution in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub std_dev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p25_ms: f64,
    pub p75_ms: f64,
    pub p95_ms: f64,
}

impl LatencyStats {
    /// Summarize `samples`. Empty input yields all-zero stats.
    pub fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut ms: Vec<f64> = samples.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        ms.sort_by(|a, b| a.total_cmp(b));

        let n = ms.len() as f64;
        let mean = ms.iter().sum::<f64>() / n;
        let variance = ms.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Self {
            samples: ms.len(),
            mean_ms: mean,
            median_ms: percentile(&ms, 50.0),
            std_dev_ms: variance.sqrt(),
            min_ms: ms[0],
            max_ms: ms[ms.len() - 1],
            p25_ms: percentile(&ms, 25.0),
            p75_ms: percentile(&ms, 75.0),
            p95_ms: percentile(&ms, 95.0),
        }
    }

    pub fn mean(&self) -> Duration {
        saturating_secs(self.mean_ms / 1000.0)
    }

    /// Name and value of the first statistic that is not a finite number in
    /// `0..=MAX_LATENCY_MS`.
    fn out_of_range(&self) -> Option<(&'static str, f64)> {
        [
            ("mean_ms", self.mean_ms),
            ("median_ms", self.median_ms),
            ("std_dev_ms", self.std_dev_ms),
            ("min_ms", self.min_ms),
            ("max_ms", self.max_ms),
            ("p25_ms", self.p25_ms),
            ("p75_ms", self.p75_ms),
            ("p95_ms", self.p95_ms),
        ]
        .into_iter()
        .find(|(_, v)| !v.is_finite() || !(0.0..=MAX_LATENCY_MS).contains(v))
    }
}

/// Seconds as a duration, clamped to `[0, Duration::MAX]`; NaN is zero.
fn saturating_secs(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Percentile of sorted data with linear interpolation between ranks.
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let rank = pct / 100.0 * (len - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

/// Coarse purpose of a command, inferred from its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandCategory {
    Query,
    Control,
    Operation,
    #[default]
    Other,
}

impl CommandCategory {
    /// First match wins: query, control, operation.
    pub fn infer(command_text: &str) -> Self {
        let text = command_text.to_lowercase();
        if text.contains("get") || text.contains("status") {
            CommandCategory::Query
        } else if text.contains("set") || text.contains("control") {
            CommandCategory::Control
        } else if text.contains("start") || text.contains("print") {
            CommandCategory::Operation
        } else {
            CommandCategory::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandCategory::Query => "query",
            CommandCategory::Control => "control",
            CommandCategory::Operation => "operation",
            CommandCategory::Other => "other",
        }
    }
}

impl fmt::Display for CommandCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One production-usable command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub shape: CommandShape,
    /// Payload sent when no overrides are given.
    pub template: Payload,
    /// Response field names seen for this shape.
    #[serde(default)]
    pub expected_fields: BTreeSet<String>,
    #[serde(default)]
    pub latency: LatencyStats,
    /// Usable responses over total attempts, 0.0 to 1.0.
    #[serde(default)]
    pub success_rate: f64,
    #[serde(default)]
    pub attempts: usize,
    #[serde(default)]
    pub successes: usize,
    #[serde(default)]
    pub partials: usize,
    #[serde(default)]
    pub indicators: Indicators,
    #[serde(default)]
    pub category: CommandCategory,
    /// Candidate for status derivation.
    #[serde(default)]
    pub status_class: bool,
    #[serde(default)]
    pub description: String,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>, template: Payload) -> Self {
        let shape = template.shape();
        let category = CommandCategory::infer(&template.to_string());
        Self {
            id: id.into(),
            shape,
            template,
            expected_fields: BTreeSet::new(),
            latency: LatencyStats::default(),
            success_rate: 0.0,
            attempts: 0,
            successes: 0,
            partials: 0,
            indicators: Indicators::default(),
            category,
            status_class: category == CommandCategory::Query,
            description: String::new(),
        }
    }

    pub fn with_expected_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_indicators(mut self, indicators: Indicators) -> Self {
        self.indicators = indicators;
        self
    }

    pub fn with_latency(mut self, latency: LatencyStats) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_status_class(mut self, status_class: bool) -> Self {
        self.status_class = status_class;
        self
    }

    /// Per-command response timeout: observed mean latency times
    /// `multiplier`, never below `floor`.
    pub fn derive_timeout(&self, floor: Duration, multiplier: f64) -> Duration {
        let scaled = saturating_secs(self.latency.mean().as_secs_f64() * multiplier);
        scaled.max(floor)
    }

    /// Template with `overrides` applied.
    pub fn payload_with(&self, overrides: &Payload) -> Payload {
        self.template.merged(overrides)
    }
}

/// The set of catalog entries keyed by canonical id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandCatalog {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "chrono::Utc::now")]
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub entries: BTreeMap<String, CatalogEntry>,
    /// Status-class ids in the order they are tried.
    #[serde(default)]
    pub status_order: Vec<String>,
}

fn default_version() -> u32 {
    CATALOG_VERSION
}

impl Default for CommandCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandCatalog {
    pub fn new() -> Self {
        Self {
            version: CATALOG_VERSION,
            generated_at: Utc::now(),
            entries: BTreeMap::new(),
            status_order: Vec::new(),
        }
    }

    /// Built-in catalog used when no catalog file exists.
    pub fn fallback() -> Self {
        let mut catalog = Self::new();
        catalog.insert(
            CatalogEntry::new("get_status", Payload::new().with("cmd", "get_status"))
                .with_expected_fields(["status", "state"])
                .with_indicators(Indicators::new(["status", "result"], default_failures()))
                .with_status_class(true),
        );
        catalog.insert(
            CatalogEntry::new("get_temperature", Payload::new().with("request", "temperature"))
                .with_expected_fields(["temperature", "bed", "nozzle"])
                .with_indicators(Indicators::new(["temperature"], default_failures()))
                .with_status_class(true),
        );
        catalog.insert(
            CatalogEntry::new("get_progress", Payload::new().with("action", "get_progress"))
                .with_expected_fields(["progress", "percent"])
                .with_indicators(Indicators::new(["progress"], default_failures()))
                .with_status_class(true),
        );
        catalog.status_order = vec![
            "get_status".to_string(),
            "get_temperature".to_string(),
            "get_progress".to_string(),
        ];
        for entry in catalog.entries.values_mut() {
            entry.description = "built-in fallback".to_string();
        }
        catalog
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, entry: CatalogEntry) -> Option<CatalogEntry> {
        self.entries.insert(entry.id.clone(), entry)
    }

    pub fn get(&self, id: &str) -> Option<&CatalogEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    /// Status-class entries in try order. Entries tagged but missing from
    /// `status_order` follow in id order.
    pub fn status_commands(&self) -> Vec<&CatalogEntry> {
        let mut ordered: Vec<&CatalogEntry> = self
            .status_order
            .iter()
            .filter_map(|id| self.entries.get(id))
            .filter(|e| e.status_class)
            .collect();
        for entry in self.entries.values() {
            if entry.status_class && !self.status_order.contains(&entry.id) {
                ordered.push(entry);
            }
        }
        ordered
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.version != CATALOG_VERSION {
            return Err(catalog_err!("unsupported catalog version {}", self.version));
        }
        for (key, entry) in &self.entries {
            if key != &entry.id {
                return Err(catalog_err!("entry key '{}' does not match id '{}'", key, entry.id));
            }
            if entry.template.is_empty() {
                return Err(catalog_err!("entry '{}' has an empty payload template", key));
            }
            if let Some((field, value)) = entry.latency.out_of_range() {
                return Err(catalog_err!(
                    "entry '{}' has latency {} = {} outside [0, {}]",
                    key,
                    field,
                    value,
                    MAX_LATENCY_MS
                ));
            }
            if !(0.0..=1.0).contains(&entry.success_rate) {
                return Err(catalog_err!(
                    "entry '{}' has success rate {} outside [0, 1]",
                    key,
                    entry.success_rate
                ));
            }
        }
        if let Some(id) = self.status_order.iter().find(|id| !self.entries.contains_key(*id)) {
            return Err(catalog_err!("status order names unknown command '{}'", id));
        }
        Ok(())
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let catalog: Self =
            serde_json::from_str(content).map_err(|e| catalog_err!("malformed catalog: {}", e))?;
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load and validate a catalog file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    /// Load `path`, or the fallback catalog when the file does not exist.
    /// A file that exists but is malformed is an error.
    pub fn load_or_fallback(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Catalog not found, using fallback commands");
            return Ok(Self::fallback());
        }
        let catalog = Self::load(path)?;
        tracing::info!(path = %path.display(), commands = catalog.len(), "Catalog loaded");
        Ok(catalog)
    }

    /// Write as pretty JSON via a temporary file and rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        crate::persist::write_atomic(path.as_ref(), content.as_bytes())
    }
}

fn default_failures() -> Vec<String> {
    Indicators::default().failure
}
