//! Configuration management for webdb
//!
//! Handles loading and validation of `webdb.toml` configuration files.
//! Every field has a serde default, so an empty file is a valid config.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default per-origin quota: 5 MiB.
pub const DEFAULT_QUOTA: i64 = 5 * 1024 * 1024;

/// Origins starting with this prefix are exempt from bulk sweeps.
pub const DEFAULT_EXTENSION_ORIGIN_PREFIX: &str = "chrome-extension_";

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Tracker settings
    #[serde(default)]
    pub tracker: TrackerConfig,
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output for interactive use
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "unknown log format: {s}. Expected one of: pretty, json"
            )),
        }
    }
}

/// General configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,

    /// Optional log file
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            log_file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Tracker configuration
///
/// `profile_path = None` is an ephemeral profile: nothing is persisted and
/// every tracker operation takes the not-initialized path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Profile directory holding `databases/`
    #[serde(default)]
    pub profile_path: Option<PathBuf>,

    /// Quota applied to origins without an override, in bytes
    #[serde(default = "default_quota")]
    pub default_quota: i64,

    /// Origin prefix exempt from time-based and clear-local-state sweeps
    #[serde(default = "default_extension_origin_prefix")]
    pub extension_origin_prefix: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            profile_path: None,
            default_quota: default_quota(),
            extension_origin_prefix: default_extension_origin_prefix(),
        }
    }
}

fn default_quota() -> i64 {
    DEFAULT_QUOTA
}

fn default_extension_origin_prefix() -> String {
    DEFAULT_EXTENSION_ORIGIN_PREFIX.to_string()
}

impl TrackerConfig {
    /// Tracker config for a persistent profile directory.
    #[must_use]
    pub fn with_profile(path: impl Into<PathBuf>) -> Self {
        Self {
            profile_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Reject values the tracker cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_quota < 0 {
            return Err(ConfigError::ValidationError(format!(
                "tracker.default_quota must be >= 0, got {}",
                self.default_quota
            )));
        }
        if self.extension_origin_prefix.is_empty() {
            return Err(ConfigError::ValidationError(
                "tracker.extension_origin_prefix must not be empty".to_string(),
            ));
        }
        if let Some(path) = &self.profile_path {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(
                    "tracker.profile_path must not be empty; omit it for an ephemeral profile"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Config {
    /// Default config file location (`<config dir>/webdb/webdb.toml`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("webdb").join("webdb.toml"))
    }

    /// Default profile directory (`<local data dir>/webdb`).
    #[must_use]
    pub fn default_profile_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|dir| dir.join("webdb"))
    }

    /// Load configuration from the default location, falling back to defaults
    /// when no file exists there.
    pub fn load() -> crate::Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        Ok(Self::from_toml_str(&text)?)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general
            .log_level
            .parse::<crate::logging::LogLevel>()
            .map_err(ConfigError::ValidationError)?;
        self.tracker.validate()
    }
}
