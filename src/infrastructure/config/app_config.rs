//! Application configuration.

use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use super::args::CliArgs;
use crate::domain::errors::ConfigError;
use crate::infrastructure::cache::{EvictionPolicy, PersistentLimits};
use crate::infrastructure::retry::RetryPolicy;

pub(crate) const APP_NAME: &str = "imgwarm";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "linuxmobile";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Converts to tracing level.
    #[must_use]
    pub const fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Cache tier configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte ceiling of the memory tier.
    pub memory_ceiling_bytes: u64,
    /// Item ceiling of the memory tier.
    pub memory_ceiling_items: usize,
    /// Byte ceiling of the persistent tier.
    pub persistent_ceiling_bytes: u64,
    /// Age after which persistent entries expire.
    pub persistent_ttl_secs: u64,
    /// Interval of the expiry sweep. Zero disables it.
    pub sweep_interval_secs: u64,
    /// How the memory tier picks eviction victims.
    pub eviction_policy: EvictionPolicy,
    /// Directory of the persistent tier. Defaults to the user cache dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_ceiling_bytes: 64 * 1024 * 1024,
            memory_ceiling_items: 200,
            persistent_ceiling_bytes: 200 * 1024 * 1024,
            persistent_ttl_secs: 7 * 24 * 60 * 60,
            sweep_interval_secs: 300,
            eviction_policy: EvictionPolicy::default(),
            cache_dir: None,
        }
    }
}

impl CacheConfig {
    /// Limits for the persistent tier.
    #[must_use]
    pub const fn persistent_limits(&self) -> PersistentLimits {
        PersistentLimits {
            max_bytes: self.persistent_ceiling_bytes,
            ttl: Duration::from_secs(self.persistent_ttl_secs),
        }
    }

    /// Sweep interval, or `None` when sweeping is disabled.
    #[must_use]
    pub const fn sweep_interval(&self) -> Option<Duration> {
        if self.sweep_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.sweep_interval_secs))
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per key, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay_ms: u64,
    /// Upper bound of a single delay.
    pub max_delay_ms: u64,
    /// Double the delay after every failure.
    pub exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            exponential_backoff: true,
        }
    }
}

impl RetryConfig {
    /// Converts to a retry policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            exponential: self.exponential_backoff,
        }
    }
}

/// Preload configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Concurrent preload fetches.
    pub concurrency: usize,
    /// Distance from the viewport, in pixels, at which elements preload.
    pub distance_px: u32,
    /// Keep observing elements after their first visible event.
    pub keep_observing: bool,
    /// Preload related images of frequently used locators.
    pub prediction_enabled: bool,
    /// Accesses after which a locator becomes a prediction.
    pub learning_threshold: u32,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            distance_px: 200,
            keep_observing: false,
            prediction_enabled: true,
            learning_threshold: 3,
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Request timeout.
    pub timeout_secs: u64,
    /// Send a HEAD request before downloading.
    pub probe_with_head: bool,
    /// Hosts that resize images through query parameters.
    pub transform_hosts: Vec<String>,
    /// Image used when a locator fails permanently.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_locator: Option<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            probe_with_head: false,
            transform_hosts: Vec::new(),
            fallback_locator: None,
        }
    }
}

impl NetworkConfig {
    /// Request timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Settings of the image engine itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cache tiers.
    pub cache: CacheConfig,
    /// Retry and backoff.
    pub retry: RetryConfig,
    /// Preloading.
    pub preload: PreloadConfig,
    /// Upstream fetches.
    pub network: NetworkConfig,
}

impl EngineConfig {
    /// Checks values the engine cannot run with.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.memory_ceiling_bytes == 0 {
            return Err(ConfigError::invalid(
                "cache.memory_ceiling_bytes",
                "must be greater than zero",
            ));
        }
        if self.cache.memory_ceiling_items == 0 {
            return Err(ConfigError::invalid(
                "cache.memory_ceiling_items",
                "must be greater than zero",
            ));
        }
        if self.preload.concurrency == 0 {
            return Err(ConfigError::invalid(
                "preload.concurrency",
                "must be greater than zero",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "retry.max_attempts",
                "must be greater than zero",
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::invalid(
                "retry.max_delay_ms",
                "must not be smaller than retry.base_delay_ms",
            ));
        }
        Ok(())
    }
}

/// Application configuration from file and CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Engine settings.
    #[serde(flatten)]
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.engine.cache.cache_dir = Some(cache_dir.clone());
        }
        if let Some(fallback) = &args.fallback {
            self.engine.network.fallback_locator = Some(fallback.clone());
        }
        if let Some(concurrency) = args.concurrency {
            self.engine.preload.concurrency = concurrency;
        }
    }

    /// Returns default config directory.
    #[must_use]
    pub fn default_config_dir() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Returns default config file path.
    #[must_use]
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Returns default log file path.
    #[must_use]
    pub fn default_log_path() -> Option<PathBuf> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.data_dir().join("imgwarm.log"))
    }

    /// Returns effective config path.
    #[must_use]
    pub fn effective_config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(Self::default_config_path)
    }

    /// Returns effective log path.
    #[must_use]
    pub fn effective_log_path(&self) -> Option<PathBuf> {
        self.log_path.clone().or_else(Self::default_log_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_partial_config() {
        let toml_content = r#"
            log_level = "debug"

            [cache]
            memory_ceiling_items = 50
            eviction_policy = "lru"

            [retry]
            exponential_backoff = false

            [network]
            transform_hosts = ["images.example.com"]
            fallback_locator = "https://example.com/placeholder.png"
        "#;

        let config: AppConfig = toml::from_str(toml_content).expect("Failed to parse config");

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.engine.cache.memory_ceiling_items, 50);
        assert_eq!(config.engine.cache.eviction_policy, EvictionPolicy::Lru);
        assert_eq!(config.engine.cache.memory_ceiling_bytes, 64 * 1024 * 1024);
        assert!(!config.engine.retry.exponential_backoff);
        assert_eq!(config.engine.retry.max_attempts, 3);
        assert_eq!(config.engine.preload, PreloadConfig::default());
        assert_eq!(config.engine.network.transform_hosts, vec!["images.example.com"]);
        assert_eq!(
            config.engine.network.fallback_locator.as_deref(),
            Some("https://example.com/placeholder.png")
        );
    }

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = AppConfig::default();
        let content = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.engine, config.engine);
        assert!(content.contains("[cache]"));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = EngineConfig::default();
        config.preload.concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "preload.concurrency", .. })
        ));

        let mut config = EngineConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "retry.max_attempts", .. })
        ));

        let mut config = EngineConfig::default();
        config.cache.memory_ceiling_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_conversions() {
        let config = EngineConfig::default();
        let policy = config.retry.policy();
        assert_eq!(policy, RetryPolicy::default());
        assert_eq!(config.cache.persistent_limits().ttl, Duration::from_secs(604_800));
        assert_eq!(config.cache.sweep_interval(), Some(Duration::from_secs(300)));

        let mut cache = CacheConfig::default();
        cache.sweep_interval_secs = 0;
        assert_eq!(cache.sweep_interval(), None);
    }

    #[test]
    fn test_cli_overrides_file_values() {
        let mut config = AppConfig::default();
        let args = CliArgs::parse_from([
            "imgwarm",
            "--log-level",
            "warn",
            "--cache-dir",
            "/tmp/images",
            "--concurrency",
            "5",
            "stats",
        ]);
        config.merge_with_args(&args);

        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.engine.cache.cache_dir, Some(PathBuf::from("/tmp/images")));
        assert_eq!(config.engine.preload.concurrency, 5);
    }
}
