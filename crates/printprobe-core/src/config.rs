//! Configuration defaults and loading.
//!
//! Every tunable has a named default below. [`ProbeConfig`] groups them per
//! component and is loaded from TOML, with environment overrides applied last.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classifier::Indicators;
use crate::error::Result;

/// Device connection defaults.
pub mod device {
    pub const DEFAULT_HOST: &str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 9999;
    pub const DEFAULT_SCHEME: &str = "ws";
}

/// Discovery defaults.
pub mod discovery {
    /// Total discovery time, split evenly across the three phases.
    pub const DEFAULT_TOTAL_DURATION_SECS: u64 = 30 * 60;
    pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 5_000;
    pub const DEFAULT_ACTIVE_DELAY_MS: u64 = 1_000;
    pub const DEFAULT_FUZZ_DELAY_MS: u64 = 2_000;
    pub const DEFAULT_FUZZ_TIMEOUT_MS: u64 = 3_000;
    pub const DEFAULT_PASSIVE_POLL_MS: u64 = 1_000;
    pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 3_000;
    pub const DEFAULT_PROBE_SPACING_MS: u64 = 500;
    pub const DEFAULT_MAX_VARIATIONS: usize = 100;
    pub const DEFAULT_MAX_FUZZ: usize = 50;
    /// Upper bounds accepted for the two generator caps.
    pub const MAX_VARIATIONS_LIMIT: usize = 100;
    pub const MAX_FUZZ_LIMIT: usize = 50;
    pub const DEFAULT_CORRELATION_WINDOW_MS: u64 = 60_000;
}

/// Resilient client defaults.
pub mod client {
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
    pub const DEFAULT_COOLDOWN_SECS: u64 = 60;
    pub const DEFAULT_RETRY_COUNT: u32 = 3;
    pub const DEFAULT_TIMEOUT_FLOOR_MS: u64 = 10_000;
    pub const DEFAULT_TIMEOUT_MULTIPLIER: f64 = 3.0;
    pub const DEFAULT_VALIDATION_PAUSE_MS: u64 = 500;
}

/// Environment variable names.
pub mod env_vars {
    pub const HOST: &str = "PRINTPROBE_HOST";
    pub const PORT: &str = "PRINTPROBE_PORT";
    pub const LOG_JSON: &str = "PRINTPROBE_LOG_JSON";

    /// Device host from the environment, if set.
    pub fn host() -> Option<String> {
        std::env::var(HOST).ok().filter(|s| !s.trim().is_empty())
    }

    /// Device port from the environment, if set and valid.
    pub fn port() -> Option<u16> {
        std::env::var(PORT).ok().and_then(|s| s.trim().parse().ok())
    }

    pub fn log_json() -> bool {
        std::env::var(LOG_JSON)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub indicators: Indicators,
}

impl ProbeConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load from `path`, falling back to defaults when the file is absent,
    /// then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml_str(&content)?
        } else {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(host) = env_vars::host() {
            self.device.host = host;
        }
        if let Some(port) = env_vars::port() {
            self.device.port = port;
        }
    }

    /// Reject settings no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.device.host.trim().is_empty() {
            return Err(crate::config_err!("device.host is empty"));
        }
        if self.client.failure_threshold == 0 {
            return Err(crate::config_err!("client.failure_threshold must be at least 1"));
        }
        if self.client.retry_count == 0 {
            return Err(crate::config_err!("client.retry_count must be at least 1"));
        }
        if self.discovery.correlation_window_ms == 0 {
            return Err(crate::config_err!("discovery.correlation_window_ms must be positive"));
        }
        if self.discovery.max_variations > discovery::MAX_VARIATIONS_LIMIT {
            return Err(crate::config_err!(
                "discovery.max_variations must be at most {}",
                discovery::MAX_VARIATIONS_LIMIT
            ));
        }
        if self.discovery.max_fuzz > discovery::MAX_FUZZ_LIMIT {
            return Err(crate::config_err!(
                "discovery.max_fuzz must be at most {}",
                discovery::MAX_FUZZ_LIMIT
            ));
        }
        let multiplier = self.client.timeout_multiplier;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(crate::config_err!(
                "client.timeout_multiplier must be a positive number, got {}",
                multiplier
            ));
        }
        Ok(())
    }

    pub fn device_uri(&self) -> String {
        self.device.uri()
    }
}

/// Where the device lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `ws` or `wss`.
    #[serde(default = "default_scheme")]
    pub scheme: String,
}

fn default_host() -> String {
    device::DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    device::DEFAULT_PORT
}

fn default_scheme() -> String {
    device::DEFAULT_SCHEME.to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            scheme: default_scheme(),
        }
    }
}

impl DeviceConfig {
    pub fn uri(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// Discovery timing and bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_total_duration")]
    pub total_duration_secs: u64,
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_active_delay")]
    pub active_delay_ms: u64,
    #[serde(default = "default_fuzz_delay")]
    pub fuzz_delay_ms: u64,
    #[serde(default = "default_fuzz_timeout")]
    pub fuzz_timeout_ms: u64,
    #[serde(default = "default_passive_poll")]
    pub passive_poll_ms: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_probe_spacing")]
    pub probe_spacing_ms: u64,
    #[serde(default = "default_max_variations")]
    pub max_variations: usize,
    #[serde(default = "default_max_fuzz")]
    pub max_fuzz: usize,
    #[serde(default = "default_correlation_window")]
    pub correlation_window_ms: u64,
}

fn default_total_duration() -> u64 {
    discovery::DEFAULT_TOTAL_DURATION_SECS
}

fn default_response_timeout() -> u64 {
    discovery::DEFAULT_RESPONSE_TIMEOUT_MS
}

fn default_active_delay() -> u64 {
    discovery::DEFAULT_ACTIVE_DELAY_MS
}

fn default_fuzz_delay() -> u64 {
    discovery::DEFAULT_FUZZ_DELAY_MS
}

fn default_fuzz_timeout() -> u64 {
    discovery::DEFAULT_FUZZ_TIMEOUT_MS
}

fn default_passive_poll() -> u64 {
    discovery::DEFAULT_PASSIVE_POLL_MS
}

fn default_probe_timeout() -> u64 {
    discovery::DEFAULT_PROBE_TIMEOUT_MS
}

fn default_probe_spacing() -> u64 {
    discovery::DEFAULT_PROBE_SPACING_MS
}

fn default_max_variations() -> usize {
    discovery::DEFAULT_MAX_VARIATIONS
}

fn default_max_fuzz() -> usize {
    discovery::DEFAULT_MAX_FUZZ
}

fn default_correlation_window() -> u64 {
    discovery::DEFAULT_CORRELATION_WINDOW_MS
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            total_duration_secs: default_total_duration(),
            response_timeout_ms: default_response_timeout(),
            active_delay_ms: default_active_delay(),
            fuzz_delay_ms: default_fuzz_delay(),
            fuzz_timeout_ms: default_fuzz_timeout(),
            passive_poll_ms: default_passive_poll(),
            probe_timeout_ms: default_probe_timeout(),
            probe_spacing_ms: default_probe_spacing(),
            max_variations: default_max_variations(),
            max_fuzz: default_max_fuzz(),
            correlation_window_ms: default_correlation_window(),
        }
    }
}

impl DiscoveryConfig {
    pub fn with_total_duration(mut self, total: Duration) -> Self {
        self.total_duration_secs = total.as_secs();
        self
    }

    /// Budget of one phase: a third of the total.
    pub fn phase_budget(&self) -> Duration {
        Duration::from_secs(self.total_duration_secs) / 3
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn active_delay(&self) -> Duration {
        Duration::from_millis(self.active_delay_ms)
    }

    pub fn fuzz_delay(&self) -> Duration {
        Duration::from_millis(self.fuzz_delay_ms)
    }

    pub fn fuzz_timeout(&self) -> Duration {
        Duration::from_millis(self.fuzz_timeout_ms)
    }

    pub fn passive_poll(&self) -> Duration {
        Duration::from_millis(self.passive_poll_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn probe_spacing(&self) -> Duration {
        Duration::from_millis(self.probe_spacing_ms)
    }

    pub fn correlation_window(&self) -> Duration {
        Duration::from_millis(self.correlation_window_ms)
    }
}

/// Resilient client tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_timeout_floor")]
    pub timeout_floor_ms: u64,
    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: f64,
    #[serde(default = "default_validation_pause")]
    pub validation_pause_ms: u64,
}

fn default_failure_threshold() -> u32 {
    client::DEFAULT_FAILURE_THRESHOLD
}

fn default_cooldown() -> u64 {
    client::DEFAULT_COOLDOWN_SECS
}

fn default_retry_count() -> u32 {
    client::DEFAULT_RETRY_COUNT
}

fn default_timeout_floor() -> u64 {
    client::DEFAULT_TIMEOUT_FLOOR_MS
}

fn default_timeout_multiplier() -> f64 {
    client::DEFAULT_TIMEOUT_MULTIPLIER
}

fn default_validation_pause() -> u64 {
    client::DEFAULT_VALIDATION_PAUSE_MS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown(),
            retry_count: default_retry_count(),
            timeout_floor_ms: default_timeout_floor(),
            timeout_multiplier: default_timeout_multiplier(),
            validation_pause_ms: default_validation_pause(),
        }
    }
}

impl ClientConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn timeout_floor(&self) -> Duration {
        Duration::from_millis(self.timeout_floor_ms)
    }

    pub fn validation_pause(&self) -> Duration {
        Duration::from_millis(self.validation_pause_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProbeConfig::default();
        assert_eq!(config.device_uri(), "ws://127.0.0.1:9999");
        assert_eq!(config.discovery.response_timeout(), Duration::from_secs(5));
        assert_eq!(config.discovery.correlation_window(), Duration::from_secs(60));
        assert_eq!(config.discovery.phase_budget(), Duration::from_secs(600));
        assert_eq!(config.client.failure_threshold, 3);
        assert_eq!(config.client.cooldown(), Duration::from_secs(60));
        assert_eq!(config.client.timeout_floor(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ProbeConfig::from_toml_str(
            r#"
            [device]
            host = "10.0.0.5"

            [client]
            retry_count = 5

            [indicators]
            success = ["ok"]
            "#,
        )
        .unwrap();

        assert_eq!(config.device_uri(), "ws://10.0.0.5:9999");
        assert_eq!(config.client.retry_count, 5);
        assert_eq!(config.client.failure_threshold, 3);
        assert_eq!(config.indicators.success, vec!["ok".to_string()]);
        assert!(!config.indicators.failure.is_empty());
        assert_eq!(config.discovery.max_fuzz, 50);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProbeConfig::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.discovery.max_variations, 100);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[device\nhost = ").unwrap();
        assert!(ProbeConfig::load(&path).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = ProbeConfig::default();
        config.client.failure_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_multiplier() {
        for multiplier in [f64::INFINITY, f64::NAN, 0.0, -1.0] {
            let mut config = ProbeConfig::default();
            config.client.timeout_multiplier = multiplier;
            assert!(config.validate().is_err(), "accepted {}", multiplier);
        }
    }

    #[test]
    fn test_validate_bounds_generator_caps() {
        let mut config = ProbeConfig::default();
        config.discovery.max_fuzz = 51;
        assert!(config.validate().is_err());

        let mut config = ProbeConfig::default();
        config.discovery.max_variations = 101;
        assert!(config.validate().is_err());

        let mut config = ProbeConfig::default();
        config.discovery.max_variations = 0;
        config.discovery.max_fuzz = 0;
        assert!(config.validate().is_ok());
    }
}
