//! Command-line interface for inspecting and maintaining a webdb profile.

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use webdb_core::config::{Config, LogFormat};
use webdb_core::logging::{LogConfig, init_logging};
use webdb_core::maintenance::{ClearReport, clear_local_state};
use webdb_core::{CachedOriginInfo, DatabaseTracker, DeleteStatus, OriginId};

#[derive(Parser)]
#[command(name = "webdb")]
#[command(about = "Inspect and maintain per-origin database quota state")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(long, global = true, env = "WEBDB_CONFIG")]
    config: Option<PathBuf>,

    /// Profile directory (overrides config)
    #[arg(long, global = true, env = "WEBDB_PROFILE")]
    profile: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tracked origins with usage and quota
    Origins {
        /// Emit JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Persist a quota override for an origin
    SetQuota {
        /// Origin identifier
        origin: String,
        /// Quota in bytes; 0 or less falls back to the default
        #[arg(allow_negative_numbers = true)]
        bytes: i64,
    },
    /// Delete one database, or every database of an origin
    Delete {
        /// Origin identifier
        origin: String,
        /// Database name; omit to delete the whole origin
        name: Option<String>,
    },
    /// Delete databases modified at or after a point in time
    DeleteSince {
        /// RFC 3339 timestamp or unix seconds
        since: String,
    },
    /// Remove all non-extension database state from the profile
    ClearLocalState {
        /// Emit JSON instead of a summary
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[derive(Serialize)]
struct DatabaseRow<'a> {
    name: &'a str,
    description: &'a str,
    size: i64,
}

#[derive(Serialize)]
struct OriginRow<'a> {
    origin: &'a OriginId,
    total_size: i64,
    quota: i64,
    space_available: i64,
    databases: Vec<DatabaseRow<'a>>,
}

impl<'a> From<&'a CachedOriginInfo> for OriginRow<'a> {
    fn from(info: &'a CachedOriginInfo) -> Self {
        Self {
            origin: &info.origin,
            total_size: info.total_size(),
            quota: info.quota,
            space_available: info.space_available(),
            databases: info
                .databases
                .iter()
                .map(|(name, db)| DatabaseRow {
                    name,
                    description: &db.description,
                    size: db.size,
                })
                .collect(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            if let Some(remediation) = remediation_for(&err) {
                eprint!("{}", remediation.render_plain());
            }
            ExitCode::FAILURE
        }
    }
}

fn remediation_for(err: &anyhow::Error) -> Option<webdb_core::error::Remediation> {
    if let Some(err) = err.downcast_ref::<webdb_core::Error>() {
        return err.remediation();
    }
    if let Some(err) = err.downcast_ref::<webdb_core::StorageError>() {
        return Some(err.remediation());
    }
    err.downcast_ref::<webdb_core::ConfigError>()
        .map(webdb_core::ConfigError::remediation)
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    config.validate()?;
    init_logging(&LogConfig::from(&config.general)).context("failed to initialize logging")?;

    let profile = resolve_profile(cli.profile, &config)?;
    tracing::debug!(path = %profile.display(), "Using profile");
    config.tracker.profile_path = Some(profile.clone());

    match cli.command {
        Commands::Origins { json } => cmd_origins(&config, json),
        Commands::SetQuota { origin, bytes } => cmd_set_quota(&config, &OriginId::new(origin), bytes),
        Commands::Delete { origin, name } => {
            cmd_delete(&config, &OriginId::new(origin), name.as_deref())
        }
        Commands::DeleteSince { since } => cmd_delete_since(&config, &since),
        Commands::ClearLocalState { json } => cmd_clear_local_state(&config, &profile, json),
    }
}

fn resolve_profile(flag: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    flag.or_else(|| config.tracker.profile_path.clone())
        .or_else(Config::default_profile_dir)
        .ok_or_else(|| anyhow!("no profile directory; pass --profile or set tracker.profile_path"))
}

fn open_tracker(config: &Config) -> Result<DatabaseTracker> {
    let mut tracker = DatabaseTracker::new(config.tracker.clone());
    tracker.open_store()?;
    Ok(tracker)
}

fn cmd_origins(config: &Config, json: bool) -> Result<()> {
    let mut tracker = open_tracker(config)?;
    let infos = tracker
        .all_origins_info()
        .ok_or_else(|| anyhow!("failed to read origin info from the tracker store"))?;
    let rows: Vec<OriginRow<'_>> = infos.iter().map(OriginRow::from).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No tracked origins.");
        return Ok(());
    }
    println!(
        "{:<40} {:>12} {:>12} {:>12}",
        "ORIGIN", "USED", "QUOTA", "AVAILABLE"
    );
    for row in &rows {
        println!(
            "{:<40} {:>12} {:>12} {:>12}",
            row.origin.as_str(),
            row.total_size,
            row.quota,
            row.space_available
        );
        for db in &row.databases {
            println!("  {:<38} {:>12}  {}", db.name, db.size, db.description);
        }
    }
    Ok(())
}

fn cmd_set_quota(config: &Config, origin: &OriginId, bytes: i64) -> Result<()> {
    let mut tracker = open_tracker(config)?;
    if !tracker.set_origin_quota(origin, bytes) {
        bail!("failed to persist quota for {origin}");
    }
    println!("Quota for {origin} set to {bytes} bytes.");
    Ok(())
}

fn cmd_delete(config: &Config, origin: &OriginId, name: Option<&str>) -> Result<()> {
    let mut tracker = open_tracker(config)?;
    let status = match name {
        Some(name) => tracker.delete_database(origin, name, None),
        None => tracker.delete_data_for_origin(origin, None),
    };
    let target = name.map_or_else(|| origin.to_string(), |name| format!("{origin}/{name}"));
    report_status(&target, status)
}

fn cmd_delete_since(config: &Config, since: &str) -> Result<()> {
    let cutoff = parse_cutoff(since)?;
    let mut tracker = open_tracker(config)?;
    let status = tracker.delete_data_modified_since(cutoff, None);
    report_status(&format!("databases modified since {since}"), status)
}

fn report_status(target: &str, status: DeleteStatus) -> Result<()> {
    match status {
        DeleteStatus::Immediate => {
            println!("Deleted {target}.");
            Ok(())
        }
        DeleteStatus::Pending => {
            println!("Deletion of {target} is pending until open connections close.");
            Ok(())
        }
        DeleteStatus::Failed => bail!("deletion of {target} failed; see log output for details"),
    }
}

fn cmd_clear_local_state(config: &Config, profile: &Path, json: bool) -> Result<()> {
    let report: ClearReport = clear_local_state(profile, &config.tracker.extension_origin_prefix)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if report.store_discarded {
        println!("Tracker store was unreadable; removed the databases directory.");
    } else {
        println!(
            "Removed {} database rows, {} quota rows, {} origin directories.",
            report.database_rows,
            report.quota_rows,
            report.directories_removed.len()
        );
    }
    if !report.directories_failed.is_empty() {
        bail!(
            "could not remove: {}",
            report.directories_failed.join(", ")
        );
    }
    Ok(())
}

/// Parse an RFC 3339 timestamp or a count of unix seconds.
fn parse_cutoff(value: &str) -> Result<SystemTime> {
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(UNIX_EPOCH + Duration::from_secs(secs));
    }
    let parsed = DateTime::parse_from_rfc3339(value).with_context(|| {
        format!("invalid timestamp {value:?}: expected RFC 3339 or unix seconds")
    })?;
    Ok(SystemTime::from(parsed.with_timezone(&Utc)))
}
