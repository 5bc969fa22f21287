//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and `DIAGSTREAM_*` environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which backing store holds the points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => Err(ConfigError::Invalid(format!(
                "unknown store backend '{}' (expected 'memory' or 'sqlite')",
                other
            ))),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Backing store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Upper bound on every backing-store call
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
}

fn default_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("diagstream").to_string_lossy().to_string())
        .unwrap_or_else(|| "./diagstream_data".to_string())
}

fn default_store_timeout() -> u64 {
    2000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            data_dir: default_data_dir(),
            timeout_ms: default_store_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// `data_dir` with a leading `~/` expanded to the home directory
    pub fn data_path(&self) -> PathBuf {
        match (self.data_dir.strip_prefix("~/"), dirs::home_dir()) {
            (Some(rest), Some(home)) => home.join(rest),
            _ => PathBuf::from(&self.data_dir),
        }
    }
}

/// Live delivery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Undelivered points kept per subscriber before the oldest is dropped
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_subscriber_buffer() -> usize {
    256
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

/// Health check configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_timeout")]
    pub timeout_ms: u64,
}

fn default_health_timeout() -> u64 {
    500
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_health_timeout(),
        }
    }
}

/// Retention policy, applied only by explicit purge tooling
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Closed sessions older than this become eligible for purge
    pub session_ttl_secs: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
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

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load from an explicit path, the default locations, or defaults
    ///
    /// An explicit path that cannot be read is an error; a broken file in a
    /// default location is skipped with a warning.
    pub fn resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load_with_env(path);
        }

        let config_paths = [
            dirs::config_dir().map(|p| p.join("diagstream").join("config.toml")),
            Some(PathBuf::from("./diagstream.toml")),
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

        tracing::debug!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Defaults plus environment variable overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides to an existing config
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Store overrides
        if let Some(backend) = var("DIAGSTREAM_STORE_BACKEND") {
            self.store.backend = backend.parse()?;
        }
        if let Some(data_dir) = var("DIAGSTREAM_DATA_DIR") {
            self.store.data_dir = data_dir;
        }
        if let Some(timeout) = var("DIAGSTREAM_STORE_TIMEOUT_MS") {
            self.store.timeout_ms = parse_number("DIAGSTREAM_STORE_TIMEOUT_MS", &timeout)?;
        }

        // Stream overrides
        if let Some(buffer) = var("DIAGSTREAM_SUBSCRIBER_BUFFER") {
            self.stream.subscriber_buffer = parse_number("DIAGSTREAM_SUBSCRIBER_BUFFER", &buffer)?;
        }

        // Logging overrides
        if let Some(level) = var("DIAGSTREAM_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("DIAGSTREAM_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.timeout_ms == 0 {
            return Err(ConfigError::Invalid("store.timeout_ms must be positive".into()));
        }
        if self.health.timeout_ms == 0 {
            return Err(ConfigError::Invalid("health.timeout_ms must be positive".into()));
        }
        if self.stream.subscriber_buffer == 0 {
            return Err(ConfigError::Invalid(
                "stream.subscriber_buffer must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} is not a number: '{}'", key, value)))
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
    r#"# diagstream Configuration
#
# Environment variables override these settings:
# - DIAGSTREAM_STORE_BACKEND
# - DIAGSTREAM_DATA_DIR
# - DIAGSTREAM_STORE_TIMEOUT_MS
# - DIAGSTREAM_SUBSCRIBER_BUFFER
# - DIAGSTREAM_LOG_LEVEL
# - DIAGSTREAM_LOG_FORMAT

[store]
# Backing store: memory (process-local) or sqlite (durable)
backend = "sqlite"

# Directory holding telemetry.db
data_dir = "~/.local/share/diagstream"

# Upper bound on every backing-store call (ms)
timeout_ms = 2000

[stream]
# Undelivered points kept per live subscriber; the oldest is dropped first
subscriber_buffer = 256

[health]
# Ping timeout for health checks (ms)
timeout_ms = 500

[retention]
# Closed sessions become eligible for `diagstream purge` after this many seconds.
# Unset means nothing ever expires.
# session_ttl_secs = 604800

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
