//! On-disk layout of a profile's databases directory.
//!
//! ```text
//! <profile>/
//!   databases.lock          advisory profile lock
//!   databases/
//!     Databases.db          tracker store
//!     <origin>/<id>         file of the database whose row id is <id>
//! ```
//!
//! Origin identifiers that are not a single normal path component have no
//! directory; every file operation on them fails closed.

use crate::error::StorageError;
use crate::origin::OriginId;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// Name of the directory holding tracked databases.
pub const DATABASES_DIR: &str = "databases";
/// Name of the tracker store inside [`DATABASES_DIR`].
pub const TRACKER_DB_FILE: &str = "Databases.db";
/// Name of the profile lock file, a sibling of [`DATABASES_DIR`].
pub const LOCK_FILE: &str = "databases.lock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseLayout {
    root: PathBuf,
}

impl DatabaseLayout {
    /// Layout rooted at `<profile>/databases`.
    #[must_use]
    pub fn for_profile(profile: &Path) -> Self {
        Self {
            root: profile.join(DATABASES_DIR),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn tracker_db_path(&self) -> PathBuf {
        self.root.join(TRACKER_DB_FILE)
    }

    /// Lock file path, next to the databases directory.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        match self.root.parent() {
            Some(parent) => parent.join(LOCK_FILE),
            None => PathBuf::from(LOCK_FILE),
        }
    }

    /// Directory of `origin`, or `None` if the id cannot name a directory.
    #[must_use]
    pub fn origin_dir(&self, origin: &OriginId) -> Option<PathBuf> {
        is_safe_component(origin.as_str()).then(|| self.root.join(origin.as_str()))
    }

    /// File of the database with row id `id` in `origin`.
    #[must_use]
    pub fn database_file(&self, origin: &OriginId, id: i64) -> Option<PathBuf> {
        self.origin_dir(origin).map(|dir| dir.join(id.to_string()))
    }
}

fn is_safe_component(name: &str) -> bool {
    if name.is_empty() || name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Rollback journal that sits next to a database file.
#[must_use]
pub fn journal_path(db_file: &Path) -> PathBuf {
    let mut name = db_file.as_os_str().to_os_string();
    name.push("-journal");
    PathBuf::from(name)
}

/// Size of `path` in bytes; 0 if it does not exist or cannot be stat-ed.
#[must_use]
pub fn file_size(path: &Path) -> i64 {
    std::fs::metadata(path).map_or(0, |m| i64::try_from(m.len()).unwrap_or(i64::MAX))
}

/// Last modification time of `path`, `None` if it does not exist.
#[must_use]
pub fn last_modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Delete `path` if present. A missing file is success.
pub fn delete_file_if_exists(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StorageError::FileDelete {
            path: path.display().to_string(),
            reason: err.to_string(),
        }),
    }
}

/// Remove `dir` recursively.
///
/// If the bulk removal fails, every entry is still attempted individually.
/// Succeeds only if the directory is absent afterwards.
pub fn remove_dir_best_effort(dir: &Path) -> Result<(), StorageError> {
    if !dir.exists() {
        return Ok(());
    }
    let first_error = match std::fs::remove_dir_all(dir) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    purge_entries(dir);
    let _ = std::fs::remove_dir(dir);
    if dir.exists() {
        Err(StorageError::FileDelete {
            path: dir.display().to_string(),
            reason: first_error.to_string(),
        })
    } else {
        Ok(())
    }
}

fn purge_entries(dir: &Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
        if is_dir {
            purge_entries(&path);
            let _ = std::fs::remove_dir(&path);
        } else {
            let _ = std::fs::remove_file(&path);
        }
    }
}
