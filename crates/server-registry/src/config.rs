//! Configuration loading and validation for the server registry

use crate::directory::app_filter;
use crate::types::{PipelineConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "STEAM_API_KEY";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discovery: DiscoverySettings,

    #[serde(default)]
    pub probe: ProbeSettings,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub state: StateSettings,

    #[serde(default)]
    pub reaper: ReaperSettings,

    #[serde(default)]
    pub store: StoreSettings,

    #[serde(default)]
    pub shutdown: ShutdownSettings,

    #[serde(default)]
    pub metrics: MetricsSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub telemetry: TelemetrySettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.discovery.validate()?;
        self.probe.validate()?;
        self.dispatch.validate()?;
        self.state.validate()?;
        self.reaper.validate()?;
        self.shutdown.validate()?;
        self.metrics.validate()?;
        Ok(())
    }
}

/// Master directory polling
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DiscoverySettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_poll_interval")]
    pub poll_interval: Duration,

    #[validate(range(min = 1))]
    pub app_id: u32,

    /// Explicit directory filter; derived from `app_id` when unset
    pub filter: Option<String>,

    #[validate(range(min = 1, max = 100000))]
    pub limit: u32,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_request_timeout")]
    pub request_timeout: Duration,

    pub steam_api_key: Option<String>,

    pub api_base: Option<String>,
}

/// Probe settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProbeSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_probe_timeout")]
    pub timeout: Duration,

    #[validate(range(min = 1, max = 1000))]
    pub worker_concurrency: usize,
}

/// Dispatch and retry settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DispatchSettings {
    #[validate(range(min = 1, max = 10000))]
    pub batch_size: usize,

    #[validate(range(min = 1, max = 10))]
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_initial_backoff")]
    pub initial_backoff: Duration,

    #[validate(range(min = 1, max = 1000000))]
    pub queue_capacity: usize,
}

/// State machine settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StateSettings {
    #[validate(range(min = 1, max = 100))]
    pub offline_threshold: u32,
}

/// Reaper settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ReaperSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_reap_interval")]
    pub interval: Duration,

    #[validate(range(min = 1, max = 3650))]
    pub retention_days: u32,
}

/// Store backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    #[default]
    Sqlite,
}

/// Store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,

    /// Database file for the sqlite backend
    pub path: PathBuf,
}

/// Shutdown settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ShutdownSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_drain_timeout")]
    pub drain_timeout: Duration,
}

/// Metrics endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,

    #[validate(custom = "validate_listen_addr")]
    pub listen_addr: String,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    /// `json` or `text`
    pub format: Option<String>,
}

impl LoggingSettings {
    pub fn json(&self) -> bool {
        self.format
            .as_deref()
            .is_some_and(|f| f.eq_ignore_ascii_case("json"))
    }
}

/// OpenTelemetry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    pub service_name: String,
    pub otlp_endpoint: String,
}

// Default implementations

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            app_id: 730,
            filter: None,
            limit: 20000,
            request_timeout: Duration::from_secs(10),
            steam_api_key: None,
            api_base: None,
        }
    }
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            worker_concurrency: 20,
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            batch_size: 100,
            max_attempts: policy.max_attempts,
            initial_backoff: policy.initial_backoff,
            queue_capacity: 10_000,
        }
    }
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            offline_threshold: 3,
        }
    }
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            retention_days: 7,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: PathBuf::from("/var/lib/server-registry/registry.db"),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:9464".to_string(),
        }
    }
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            service_name: "server-registry".to_string(),
            otlp_endpoint: "http://localhost:4317".to_string(),
        }
    }
}

// Custom validators

fn check_range(
    value: &Duration,
    min: Duration,
    max: Duration,
    code: &'static str,
) -> Result<(), ValidationError> {
    if *value < min || *value > max {
        return Err(ValidationError::new(code));
    }
    Ok(())
}

fn validate_poll_interval(interval: &Duration) -> Result<(), ValidationError> {
    check_range(
        interval,
        Duration::from_secs(1),
        Duration::from_secs(24 * 60 * 60),
        "poll_interval_out_of_range",
    )
}

fn validate_request_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    check_range(
        timeout,
        Duration::from_millis(100),
        Duration::from_secs(300),
        "request_timeout_out_of_range",
    )
}

fn validate_probe_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    check_range(
        timeout,
        Duration::from_millis(10),
        Duration::from_secs(60),
        "probe_timeout_out_of_range",
    )
}

fn validate_initial_backoff(backoff: &Duration) -> Result<(), ValidationError> {
    check_range(
        backoff,
        Duration::from_millis(1),
        Duration::from_secs(600),
        "initial_backoff_out_of_range",
    )
}

fn validate_reap_interval(interval: &Duration) -> Result<(), ValidationError> {
    check_range(
        interval,
        Duration::from_secs(1),
        Duration::from_secs(7 * 24 * 60 * 60),
        "reap_interval_out_of_range",
    )
}

fn validate_drain_timeout(timeout: &Duration) -> Result<(), ValidationError> {
    check_range(
        timeout,
        Duration::ZERO,
        Duration::from_secs(600),
        "drain_timeout_out_of_range",
    )
}

fn validate_listen_addr(addr: &str) -> Result<(), ValidationError> {
    addr.parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("listen_addr_invalid"))
}

// Configuration loading implementation

impl Config {
    /// Load configuration from an explicit path or the default search paths
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            tracing::info!("Loading configuration from: {}", path.display());
            return Self::load_from_file(path);
        }

        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/server-registry/server-registry.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./server-registry.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/server-registry/server-registry.yaml"))
    }

    /// Directory filter, derived from the app id unless set explicitly
    pub fn discovery_filter(&self) -> String {
        match self.discovery.filter.as_deref().map(str::trim) {
            Some(filter) if !filter.is_empty() => filter.to_string(),
            _ => app_filter(self.discovery.app_id),
        }
    }

    /// Configured API key, falling back to the environment
    pub fn steam_api_key(&self) -> Option<String> {
        self.discovery
            .steam_api_key
            .clone()
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty()))
    }

    /// Convert to the internal pipeline configuration
    pub fn to_pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            poll_interval: self.discovery.poll_interval,
            discovery_filter: self.discovery_filter(),
            probe_timeout: self.probe.timeout,
            worker_concurrency: self.probe.worker_concurrency,
            batch_size: self.dispatch.batch_size,
            retry_policy: RetryPolicy {
                max_attempts: self.dispatch.max_attempts,
                initial_backoff: self.dispatch.initial_backoff,
            },
            queue_capacity: self.dispatch.queue_capacity,
            offline_threshold: self.state.offline_threshold,
            reap_interval: self.reaper.interval,
            retention_days: self.reaper.retention_days,
            drain_timeout: self.shutdown.drain_timeout,
            metrics_listen_addr: self
                .metrics
                .enabled
                .then(|| self.metrics.listen_addr.clone()),
        }
    }
}
