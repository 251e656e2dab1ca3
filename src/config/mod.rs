//! Structured configuration document.
//!
//! Nested structs with `impl Default`, loaded from TOML via `serde`, in
//! the same shape as this codebase's other structured configuration
//! (sectioned, every field defaulted, validation returning a full list of
//! human-readable errors rather than failing on the first one found).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub targets: TargetsConfig,
    pub sources: SourcesConfig,
    pub publishing: PublishingConfig,
    pub probing: ProbingConfig,
    pub intervals: IntervalsConfig,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub wot: WotConfig,
    pub resolution: ResolutionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            targets: TargetsConfig::default(),
            sources: SourcesConfig::default(),
            publishing: PublishingConfig::default(),
            probing: ProbingConfig::default(),
            intervals: IntervalsConfig::default(),
            logging: LoggingConfig::default(),
            database: DatabaseConfig::default(),
            api: ApiConfig::default(),
            wot: WotConfig::default(),
            resolution: ResolutionConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config at {}: {e}", path.display()))?;
        let cfg: Config = toml::from_str(&text)?;
        Ok(cfg)
    }

    /// Returns every violated validation rule, not just the first.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.publishing.enabled && std::env::var("TRUST_SERVICE_PRIVATE_KEY").is_err() {
            errors.push(
                "publishing.enabled is true but TRUST_SERVICE_PRIVATE_KEY is not set".to_string(),
            );
        }

        if self.intervals.cycle_secs < 300 {
            errors.push(format!(
                "intervals.cycle_secs must be >= 300, got {}",
                self.intervals.cycle_secs
            ));
        }

        if self.targets.urls.is_empty() && !self.targets.discover_from_monitors {
            errors.push(
                "targets.urls is empty and targets.discover_from_monitors is false".to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub name: String,
    pub algorithm_version: String,
    pub algorithm_url: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: "relay-trust-service".to_string(),
            algorithm_version: "1.0.0".to_string(),
            algorithm_url: "https://github.com/example/relay-trust-service".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TargetsConfig {
    pub urls: Vec<String>,
    pub discover_from_monitors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SourcesConfig {
    pub monitor_endpoints: Vec<String>,
    pub report_endpoints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    pub enabled: bool,
    pub pool_endpoints: Vec<String>,
    pub material_change_threshold: u32,
    pub min_observations: u64,
    pub min_delay_ms: u64,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pool_endpoints: Vec::new(),
            material_change_threshold: 3,
            min_observations: 1,
            min_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbingConfig {
    pub concurrency: usize,
    pub onion_connect_timeout_secs: u64,
    pub onion_metadata_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub metadata_timeout_secs: u64,
    pub flapping_window_secs: u64,
}

impl Default for ProbingConfig {
    fn default() -> Self {
        Self {
            concurrency: 30,
            onion_connect_timeout_secs: 30,
            onion_metadata_timeout_secs: 15,
            connect_timeout_secs: 10,
            metadata_timeout_secs: 5,
            flapping_window_secs: 6 * 3600,
        }
    }
}

impl ProbingConfig {
    pub fn connect_timeout(&self, is_onion: bool) -> Duration {
        Duration::from_secs(if is_onion {
            self.onion_connect_timeout_secs
        } else {
            self.connect_timeout_secs
        })
    }

    pub fn metadata_timeout(&self, is_onion: bool) -> Duration {
        Duration::from_secs(if is_onion {
            self.onion_metadata_timeout_secs
        } else {
            self.metadata_timeout_secs
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    pub cycle_secs: u64,
    pub retention_secs: u64,
    pub checkpoint_secs: u64,
    pub wot_refresh_secs: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            cycle_secs: 600,
            retention_secs: 24 * 3600,
            checkpoint_secs: 15 * 60,
            wot_refresh_secs: 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub retention_days: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./relay-trust.duckdb"),
            retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSectionConfig {
    pub max_requests: u32,
    pub window_secs: u64,
    pub burst: u32,
}

impl Default for RateLimitSectionConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_secs: 60,
            burst: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub rate_limit: RateLimitSectionConfig,
    pub strict_rate_limit: RateLimitSectionConfig,
    pub cache_ttl_relay_secs: u64,
    pub cache_ttl_aggregate_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            rate_limit: RateLimitSectionConfig::default(),
            strict_rate_limit: RateLimitSectionConfig {
                max_requests: 10,
                window_secs: 60,
                burst: 2,
            },
            cache_ttl_relay_secs: 30,
            cache_ttl_aggregate_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WotProviderConfig {
    pub url: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WotConfig {
    pub providers: Vec<WotProviderConfig>,
    pub timeout_secs: u64,
}

impl Default for WotConfig {
    fn default() -> Self {
        Self {
            providers: Vec::new(),
            timeout_secs: 5,
        }
    }
}

impl Default for WotProviderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionConfig {
    pub geo_endpoint: String,
    pub dns_timeout_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            geo_endpoint: "http://ip-api.com/json".to_string(),
            dns_timeout_secs: 5,
            http_timeout_secs: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_fails_validation_without_targets() {
        let cfg = Config::default();
        let result = cfg.validate();
        assert!(result.is_err());
        let errors = result.unwrap_err();
        assert!(errors.iter().any(|e| e.contains("targets.urls")));
    }

    #[test]
    fn validation_collects_multiple_errors() {
        let mut cfg = Config::default();
        cfg.intervals.cycle_secs = 10;
        cfg.publishing.enabled = true;
        std::env::remove_var("TRUST_SERVICE_PRIVATE_KEY");
        let errors = cfg.validate().unwrap_err();
        assert!(errors.len() >= 2);
    }

    #[test]
    fn non_empty_targets_satisfies_target_rule() {
        let mut cfg = Config::default();
        cfg.targets.urls.push("wss://relay.example.com".to_string());
        let errors = cfg.validate().unwrap_err();
        assert!(!errors.iter().any(|e| e.contains("targets.urls")));
    }
}
