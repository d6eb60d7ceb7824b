//! Error types for webdb-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for webdb-core
#[derive(Error, Debug)]
pub enum Error {
    /// Metadata store, layout, and lock errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Logging setup errors
    #[error("Logging error: {0}")]
    Log(#[from] crate::logging::LogError),
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Storage(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Log(crate::logging::LogError::InvalidLevel(_)) => Some(
                Remediation::new("Use one of: trace, debug, info, warn, error.")
                    .command("Override", "webdb --log-level info origins"),
            ),
            Self::Log(crate::logging::LogError::FileCreate(_)) => Some(
                Remediation::new("Check that `general.log_file` points to a writable location.")
                    .alternative("Remove `general.log_file` to log to stderr only."),
            ),
            Self::Log(_) => None,
        }
    }
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Profile has no persistent path; metadata is not durable")]
    Ephemeral,

    #[error("Tracker store is not initialized")]
    NotInitialized,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Tracker schema version ({current}) is newer than supported ({supported})")]
    SchemaTooNew { current: i64, supported: i64 },

    #[error("Tracker store corruption detected: {details}")]
    Corruption { details: String },

    #[error("Profile is locked by another tracker: {path}")]
    ProfileLocked { path: String },

    #[error("Failed to delete {path}: {reason}")]
    FileDelete { path: String, reason: String },

    #[error("Database {origin}/{name} is still open")]
    StillOpen { origin: String, name: String },

    #[error("Origin {origin} has open databases")]
    OriginInUse { origin: String },
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl StorageError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::Ephemeral => Remediation::new(
                "This profile has no persistent path. Configure `tracker.profile_path` to track quota.",
            )
            .alternative("Pass --profile <dir> to the webdb CLI."),
            Self::NotInitialized => Remediation::new(
                "The tracker store could not be opened. Check profile permissions and retry.",
            )
            .command("Inspect", "webdb origins"),
            Self::Database(_) => Remediation::new(
                "Tracker store operation failed. Check profile permissions and retry.",
            )
            .alternative("Ensure the profile directory is writable."),
            Self::MigrationFailed(_) => {
                Remediation::new("Tracker store migration failed. Check logs and retry.")
                    .command("Wipe tracker state", "webdb clear-local-state")
            }
            Self::SchemaTooNew { current, supported } => Remediation::new(format!(
                "Tracker store schema version {current} is newer than supported ({supported}). Upgrade webdb."
            ))
            .alternative("Use a profile created by this webdb version."),
            Self::Corruption { .. } => Remediation::new(
                "Tracker store corruption detected. The databases directory will be recreated.",
            )
            .command("Wipe tracker state", "webdb clear-local-state"),
            Self::ProfileLocked { path } => Remediation::new(format!(
                "Another tracker holds the profile lock at {path}. Stop it and retry."
            ))
            .alternative("Wait for the running tracker to shut down."),
            Self::FileDelete { path, .. } => Remediation::new(format!(
                "Could not delete {path}. Check file permissions and retry."
            ))
            .command("Retry deletion", "webdb delete <origin> <name>"),
            Self::StillOpen { .. } | Self::OriginInUse { .. } => Remediation::new(
                "The database is still open. Deletion runs once the last connection closes.",
            ),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Invalid config: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => {
                Remediation::new(format!("Create the config file or point --config elsewhere: {path}"))
                    .alternative("Run without --config to use the defaults.")
            }
            Self::ReadFailed(path, _) => {
                Remediation::new(format!("Check read permissions on {path}."))
            }
            Self::ParseFailed(_) => Remediation::new("Fix the TOML syntax in the config file.")
                .alternative("Compare against the documented [general] and [tracker] tables."),
            Self::ValidationError(_) => {
                Remediation::new("Correct the rejected config value and retry.")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_converts_into_error() {
        let err: Error = StorageError::NotInitialized.into();
        assert!(matches!(err, Error::Storage(StorageError::NotInitialized)));
        assert!(err.to_string().contains("not initialized"));
    }

    #[test]
    fn rusqlite_error_maps_to_database_variant() {
        let err: StorageError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, StorageError::Database(_)));
    }

    #[test]
    fn remediation_renders_commands_and_alternatives() {
        let text = StorageError::MigrationFailed("boom".to_string())
            .remediation()
            .render_plain();
        assert!(text.starts_with("To fix:"));
        assert!(text.contains("webdb clear-local-state"));

        let text = ConfigError::ParseFailed("bad".to_string())
            .remediation()
            .render_plain();
        assert!(text.contains("Alternatives:"));
    }

    #[test]
    fn every_top_level_storage_error_has_remediation() {
        let err = Error::Storage(StorageError::ProfileLocked {
            path: "/p/databases.lock".to_string(),
        });
        let remediation = err.remediation().unwrap();
        assert!(remediation.summary.contains("/p/databases.lock"));
    }

    #[test]
    fn log_errors_convert_with_level_remediation() {
        let err: Error = crate::logging::LogError::InvalidLevel("loud".to_string()).into();
        assert!(err.to_string().contains("loud"));
        let text = err.remediation().unwrap().render_plain();
        assert!(text.contains("--log-level"));
        assert!(Error::Log(crate::logging::LogError::AlreadyInitialized)
            .remediation()
            .is_none());
    }
}
