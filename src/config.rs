//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

use crate::dispatch::{DispatchConfig, DispatchMode};
use crate::sensors::{SensorRegistry, DEFAULT_SAMPLING_INTERVAL_MS};
use crate::transport::TransportConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub collector: CollectorConfig,

    #[serde(default)]
    pub dispatch: DispatchSection,

    #[serde(default)]
    pub sensors: SensorsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote collector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Listen address of the reference collector binary
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8080/api/sensor/data".to_string()
}

fn default_request_timeout() -> u64 {
    5000
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            request_timeout_ms: default_request_timeout(),
            bind: default_bind(),
        }
    }
}

/// Dispatch timing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchSection {
    #[serde(default = "default_dispatch_interval")]
    pub interval_ms: u64,

    #[serde(default)]
    pub mode: DispatchMode,
}

fn default_dispatch_interval() -> u64 {
    5000 // 5 seconds
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            interval_ms: default_dispatch_interval(),
            mode: DispatchMode::default(),
        }
    }
}

/// Sensor catalog and startup configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SensorsConfig {
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval_ms: u64,

    /// Per-sensor sampling interval overrides
    #[serde(default)]
    pub intervals: HashMap<String, u64>,

    /// Sensors turned on at startup
    #[serde(default)]
    pub enabled: Vec<String>,

    /// Sensors the simulated source reports as missing
    #[serde(default)]
    pub unavailable: Vec<String>,

    /// Whether the simulated location provider grants permission
    #[serde(default = "default_gps_permission")]
    pub gps_permission: bool,
}

fn default_sampling_interval() -> u64 {
    DEFAULT_SAMPLING_INTERVAL_MS
}

fn default_gps_permission() -> bool {
    true
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            sampling_interval_ms: default_sampling_interval(),
            intervals: HashMap::new(),
            enabled: Vec::new(),
            unavailable: Vec::new(),
            gps_permission: default_gps_permission(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Install the global tracing subscriber
    ///
    /// `RUST_LOG` wins over the configured level when set.
    pub fn init_subscriber(&self) -> Result<(), TryInitError> {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("sensorlink={},tower_http=info", self.level))
        });
        let registry = tracing_subscriber::registry().with(filter);

        if self.format == "json" {
            registry.with(tracing_subscriber::fmt::layer().json()).try_init()
        } else {
            registry.with(tracing_subscriber::fmt::layer()).try_init()
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Result<Self, ConfigError> {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("sensorlink").join("config.toml")),
            Some(PathBuf::from("/etc/sensorlink/config.toml")),
            Some(PathBuf::from("./sensorlink.toml")),
        ];

        for path in config_paths.iter().flatten() {
            if path.exists() {
                match Self::load_with_env(path) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        // Collector overrides
        if let Ok(url) = std::env::var("SENSORLINK_COLLECTOR_URL") {
            self.collector.endpoint = url;
        }

        // Dispatch overrides
        if let Ok(interval) = std::env::var("SENSORLINK_DISPATCH_INTERVAL_MS") {
            self.dispatch.interval_ms = interval.parse().map_err(|_| {
                ConfigError::Invalid(format!("SENSORLINK_DISPATCH_INTERVAL_MS: {}", interval))
            })?;
        }
        if let Ok(mode) = std::env::var("SENSORLINK_DISPATCH_MODE") {
            self.dispatch.mode = mode.parse().map_err(ConfigError::Invalid)?;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("SENSORLINK_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("SENSORLINK_LOG_FORMAT") {
            self.logging.format = format;
        }

        self.validate()
    }

    /// Reject values that would only fail later at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collector.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "collector.request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.dispatch.interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "dispatch.interval_ms must be positive".to_string(),
            ));
        }
        if self.sensors.sampling_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "sensors.sampling_interval_ms must be positive".to_string(),
            ));
        }
        if let Some((id, _)) = self.sensors.intervals.iter().find(|(_, ms)| **ms == 0) {
            return Err(ConfigError::Invalid(format!(
                "sensors.intervals.{} must be positive",
                id
            )));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be pretty or json, got {}",
                self.logging.format
            )));
        }

        let known = SensorRegistry::standard();
        let listed = self
            .sensors
            .enabled
            .iter()
            .chain(&self.sensors.unavailable)
            .chain(self.sensors.intervals.keys());
        for id in listed {
            if !known.contains(id) {
                return Err(ConfigError::Invalid(format!("unknown sensor: {}", id)));
            }
        }

        Ok(())
    }

    /// Registry with the configured sampling intervals applied
    pub fn registry(&self) -> Result<SensorRegistry, ConfigError> {
        let base = SensorRegistry::new(
            SensorRegistry::standard()
                .descriptors()
                .iter()
                .cloned()
                .map(|d| d.sampling_interval_ms(self.sensors.sampling_interval_ms)),
        );

        base.with_intervals(&self.sensors.intervals)
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            endpoint: self.collector.endpoint.clone(),
            request_timeout_ms: self.collector.request_timeout_ms,
        }
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            interval_ms: self.dispatch.interval_ms,
            mode: self.dispatch.mode,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Sensorlink Configuration
#
# Environment variables override these settings:
# - SENSORLINK_COLLECTOR_URL
# - SENSORLINK_DISPATCH_INTERVAL_MS
# - SENSORLINK_DISPATCH_MODE
# - SENSORLINK_LOG_LEVEL
# - SENSORLINK_LOG_FORMAT

[collector]
# Where readings are POSTed
endpoint = "http://127.0.0.1:8080/api/sensor/data"

# Request timeout (ms)
request_timeout_ms = 5000

# Listen address for sensorlink-collector
bind = "0.0.0.0:8080"

[dispatch]
# How often enabled readings are sent (ms)
interval_ms = 5000

# "batched" sends a snapshot every interval,
# "immediate" sends every reading as it arrives
mode = "batched"

[sensors]
# Default sampling interval for every sensor (ms)
sampling_interval_ms = 1000

# Sensors turned on at startup
# Known sensors: accelerometer, gyroscope, magnetometer, gps, barometer
enabled = []

# Sensors the simulated source reports as missing hardware
unavailable = []

# Whether the simulated location provider grants permission
gps_permission = true

# Per-sensor sampling interval overrides (ms)
[sensors.intervals]
# gps = 10000

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
