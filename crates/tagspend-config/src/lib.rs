//! # tagspend-config
//!
//! Configuration for tagspend, loaded from `~/.tagspend/config.yaml`.
//!
//! ```yaml
//! database:
//!   path: /var/lib/tagspend/tagspend.db
//! aggregation:
//!   excluded_keys:
//!     - tag_user_Name
//!   interval_secs: 600
//! logging:
//!   dir: /var/log/tagspend
//! ```
//!
//! Every section is optional. Environment variables override the file:
//! `TAGSPEND_DB_PATH`, `TAGSPEND_EXCLUDED_KEYS` (comma-separated) and
//! `TAGSPEND_LOG_DIR`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tagspend_core::logging::tagspend_home;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable overriding the database path.
pub const ENV_DB_PATH: &str = "TAGSPEND_DB_PATH";
/// Environment variable overriding the exclusion list.
pub const ENV_EXCLUDED_KEYS: &str = "TAGSPEND_EXCLUDED_KEYS";
/// Environment variable overriding the log directory.
pub const ENV_LOG_DIR: &str = "TAGSPEND_LOG_DIR";

/// Tag keys whose aggregates are never persisted unless configured otherwise.
pub const DEFAULT_EXCLUDED_KEYS: &[&str] = &["tag_user_Name"];

/// Default interval between scheduled aggregation runs (10 minutes).
pub const DEFAULT_INTERVAL_SECS: u64 = 600;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file exists but could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid YAML for [`Config`]
    #[error("invalid configuration at {path}: {source}")]
    Invalid {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Configuration loaded but failed validation
    #[error("configuration validation failed: {message}")]
    Validation { message: String },

    /// Default paths could not be resolved
    #[error(transparent)]
    Core(#[from] tagspend_core::CoreError),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub aggregation: AggregationConfig,
    pub logging: LoggingConfig,
}

/// Where the SQLite store lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let base = tagspend_home().unwrap_or_else(|_| PathBuf::from(".tagspend"));
        Self {
            path: base.join("tagspend.db"),
        }
    }
}

/// Aggregation policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AggregationConfig {
    /// Tag keys that are aggregated but never persisted
    pub excluded_keys: Vec<String>,

    /// Seconds between scheduled runs in watch mode
    pub interval_secs: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            excluded_keys: DEFAULT_EXCLUDED_KEYS.iter().map(|k| k.to_string()).collect(),
            interval_secs: DEFAULT_INTERVAL_SECS,
        }
    }
}

/// Logging settings. The CLI `--log-dir` flag wins over this.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: Option<PathBuf>,
}

impl Config {
    /// Default config file location (`~/.tagspend/config.yaml`).
    pub fn default_path() -> Result<PathBuf> {
        Ok(tagspend_home()?.join("config.yaml"))
    }

    /// Load configuration from `path`, or the default location when `None`.
    ///
    /// A missing file is not an error: defaults are used. Environment
    /// overrides are applied and the result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        let mut config = if path.exists() {
            let config = Self::from_file(&path)?;
            info!(path = %path.display(), "Loaded configuration");
            config
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without applying overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents).map_err(|source| ConfigError::Invalid {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse config from a YAML string. An empty document yields defaults.
    pub fn from_yaml_str(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }

    /// Apply `TAGSPEND_*` environment variables on top of the loaded values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var(ENV_DB_PATH) {
            if !path.is_empty() {
                debug!(path = %path, "Database path overridden from environment");
                self.database.path = PathBuf::from(path);
            }
        }

        if let Ok(keys) = std::env::var(ENV_EXCLUDED_KEYS) {
            self.aggregation.excluded_keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
            debug!(
                count = self.aggregation.excluded_keys.len(),
                "Excluded keys overridden from environment"
            );
        }

        if let Ok(dir) = std::env::var(ENV_LOG_DIR) {
            if !dir.is_empty() {
                self.logging.dir = Some(PathBuf::from(dir));
            }
        }
    }

    /// Check the configuration for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                message: "database.path must not be empty".into(),
            });
        }
        if self.aggregation.interval_secs == 0 {
            return Err(ConfigError::Validation {
                message: "aggregation.interval_secs must be greater than zero".into(),
            });
        }
        Ok(())
    }
}
