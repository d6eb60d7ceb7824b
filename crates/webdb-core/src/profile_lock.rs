//! Advisory exclusive lock on a profile's databases directory.
//!
//! A live tracker holds the lock from lazy initialization until reset or
//! drop. The maintenance wipe takes the same lock, so it refuses to run
//! underneath a live tracker.

use crate::error::StorageError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// An acquired profile lock. Released on drop.
#[derive(Debug)]
pub struct ProfileLock {
    _lock_file: File,
    path: PathBuf,
}

impl ProfileLock {
    /// Acquire the lock at `path` without blocking.
    ///
    /// Returns `StorageError::ProfileLocked` if another holder has it.
    pub fn try_acquire(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::Database(format!("{}: {e}", parent.display())))?;
            }
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| StorageError::Database(format!("{}: {e}", path.display())))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {
                debug!(path = %path.display(), "Acquired profile lock");
                Ok(Self {
                    _lock_file: lock_file,
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(StorageError::ProfileLocked {
                path: path.display().to_string(),
            }),
            Err(e) => Err(StorageError::Database(format!("{}: {e}", path.display()))),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProfileLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Released profile lock");
    }
}
