//! Offline wipe of a profile's non-exempt database state.
//!
//! Runs without a live tracker. It takes the same profile lock a tracker
//! holds, so it fails with `ProfileLocked` instead of racing one.

use crate::error::StorageError;
use crate::layout::{self, DatabaseLayout};
use crate::metadata::open_existing_store;
use crate::profile_lock::ProfileLock;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

/// What [`clear_local_state`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReport {
    pub database_rows: usize,
    pub quota_rows: usize,
    /// Origin directories removed, by name.
    pub directories_removed: Vec<String>,
    /// Origin directories that could not be fully removed.
    pub directories_failed: Vec<String>,
    /// The tracker store was unreadable and the whole directory was removed.
    pub store_discarded: bool,
}

/// Delete every row and origin directory whose origin does not start with
/// `exempt_prefix`.
///
/// An unreadable tracker store (or one without a version marker) causes the
/// entire databases directory to be removed instead.
pub fn clear_local_state(profile: &Path, exempt_prefix: &str) -> Result<ClearReport, StorageError> {
    let layout = DatabaseLayout::for_profile(profile);
    let mut report = ClearReport::default();
    if !layout.root().is_dir() {
        return Ok(report);
    }
    let _lock = ProfileLock::try_acquire(&layout.lock_path())?;

    let db_path = layout.tracker_db_path();
    if db_path.exists() {
        match clear_rows(&db_path, exempt_prefix) {
            Ok((database_rows, quota_rows)) => {
                report.database_rows = database_rows;
                report.quota_rows = quota_rows;
            }
            Err(err) => {
                warn!(path = %layout.root().display(), error = %err, "Discarding unreadable tracker store");
                layout::remove_dir_best_effort(layout.root())?;
                report.store_discarded = true;
                return Ok(report);
            }
        }
    }

    let entries = std::fs::read_dir(layout.root())
        .map_err(|e| StorageError::Database(format!("{}: {e}", layout.root().display())))?;
    for entry in entries.flatten() {
        if !entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(exempt_prefix) {
            continue;
        }
        match layout::remove_dir_best_effort(&entry.path()) {
            Ok(()) => report.directories_removed.push(name),
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "Failed to remove origin directory");
                report.directories_failed.push(name);
            }
        }
    }
    report.directories_removed.sort();
    report.directories_failed.sort();

    info!(
        database_rows = report.database_rows,
        quota_rows = report.quota_rows,
        directories = report.directories_removed.len(),
        "Cleared local database state"
    );
    Ok(report)
}

fn clear_rows(db_path: &Path, exempt_prefix: &str) -> Result<(usize, usize), StorageError> {
    let mut conn = open_existing_store(db_path)?;
    let tx = conn.transaction()?;
    let database_rows = tx.execute(
        "DELETE FROM Databases WHERE substr(origin, 1, length(?1)) <> ?1",
        params![exempt_prefix],
    )?;
    let has_quota: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'Quota')",
        [],
        |row| row.get(0),
    )?;
    let quota_rows = if has_quota {
        tx.execute(
            "DELETE FROM Quota WHERE substr(origin, 1, length(?1)) <> ?1",
            params![exempt_prefix],
        )?
    } else {
        0
    };
    tx.commit()?;
    Ok((database_rows, quota_rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataStore;
    use crate::origin::{DatabaseDetails, OriginId};

    const PREFIX: &str = "chrome-extension_";

    fn seed(profile: &Path) {
        let mut store = MetadataStore::new(Some(profile));
        store.initialize().unwrap();
        for origin in ["http_a_0", "chrome-extension_abc_0", "http_chrome-extension_0"] {
            store
                .upsert_database(&DatabaseDetails::new(origin, "db", "", 0))
                .unwrap();
            store.set_origin_quota(&OriginId::new(origin), 10).unwrap();
            let path = store
                .database_file_path(&OriginId::new(origin), "db")
                .unwrap()
                .unwrap();
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"data").unwrap();
        }
    }

    #[test]
    fn missing_profile_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let report = clear_local_state(&dir.path().join("nope"), PREFIX).unwrap();
        assert_eq!(report, ClearReport::default());
    }

    #[test]
    fn keeps_only_exempt_origins() {
        let dir = tempfile::tempdir().unwrap();
        seed(dir.path());

        let report = clear_local_state(dir.path(), PREFIX).unwrap();
        assert_eq!(report.database_rows, 2);
        assert_eq!(report.quota_rows, 2);
        assert_eq!(
            report.directories_removed,
            vec!["http_a_0".to_string(), "http_chrome-extension_0".to_string()]
        );
        assert!(!report.store_discarded);

        let root = dir.path().join("databases");
        assert!(root.join("chrome-extension_abc_0").is_dir());
        assert!(!root.join("http_a_0").exists());

        let mut store = MetadataStore::new(Some(dir.path()));
        store.initialize().unwrap();
        assert_eq!(
            store.origins().unwrap(),
            vec![OriginId::new("chrome-extension_abc_0")]
        );
    }

    #[test]
    fn corrupt_store_removes_whole_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("databases");
        std::fs::create_dir_all(root.join("chrome-extension_x_0")).unwrap();
        std::fs::write(root.join("Databases.db"), vec![0x5Au8; 4096]).unwrap();

        let report = clear_local_state(dir.path(), PREFIX).unwrap();
        assert!(report.store_discarded);
        assert!(!root.exists());
    }

    #[test]
    fn refuses_to_run_under_live_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = MetadataStore::new(Some(dir.path()));
        store.initialize().unwrap();
        let err = clear_local_state(dir.path(), PREFIX).unwrap_err();
        assert!(matches!(err, StorageError::ProfileLocked { .. }));
    }
}
