//! Durable tracker metadata: database rows and per-origin quota overrides.
//!
//! The store opens lazily. [`MetadataStore::initialize`] is idempotent and
//! performs, in order:
//!
//! ```text
//! take profile lock
//!   -> existing store unreadable or missing `meta`?  discard databases/
//!   -> open / create Databases.db
//!   -> run pending migrations + version marker in one transaction
//! ```
//!
//! A failed initialization leaves the store closed and the lock released, so
//! a later call retries from scratch.

use crate::error::StorageError;
use crate::layout::{self, DatabaseLayout};
use crate::origin::{DatabaseDetails, OriginId};
use crate::profile_lock::ProfileLock;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Schema version written by this build.
pub const CURRENT_VERSION: i64 = 2;
/// Oldest schema version able to read stores written by this build.
pub const COMPATIBLE_VERSION: i64 = 1;

const META_SQL: &str = "CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY NOT NULL,
    value INTEGER NOT NULL
)";

const MIGRATION_1: &str = "
CREATE TABLE IF NOT EXISTS Databases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    origin TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    estimated_size INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS origin_index ON Databases (origin);
CREATE UNIQUE INDEX IF NOT EXISTS unique_index ON Databases (origin, name);
";

const MIGRATION_2: &str = "
CREATE TABLE IF NOT EXISTS Quota (
    origin TEXT NOT NULL PRIMARY KEY,
    quota INTEGER NOT NULL
);
";

/// Result of [`MetadataStore::upsert_database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl UpsertOutcome {
    /// Whether the stored row differs from before the call.
    #[must_use]
    pub fn changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

pub struct MetadataStore {
    layout: Option<DatabaseLayout>,
    conn: Option<Connection>,
    lock: Option<ProfileLock>,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("layout", &self.layout)
            .field("initialized", &self.conn.is_some())
            .finish_non_exhaustive()
    }
}

impl MetadataStore {
    /// Store for `profile`; `None` (or an empty path) is an ephemeral profile.
    #[must_use]
    pub fn new(profile: Option<&Path>) -> Self {
        let layout = profile
            .filter(|p| !p.as_os_str().is_empty())
            .map(DatabaseLayout::for_profile);
        Self {
            layout,
            conn: None,
            lock: None,
        }
    }

    #[must_use]
    pub fn layout(&self) -> Option<&DatabaseLayout> {
        self.layout.as_ref()
    }

    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        self.layout.is_none()
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.conn.is_some()
    }

    /// Open the store if it is not open yet.
    pub fn initialize(&mut self) -> Result<(), StorageError> {
        if self.conn.is_some() {
            return Ok(());
        }
        let Some(layout) = self.layout.clone() else {
            return Err(StorageError::Ephemeral);
        };

        let lock = match self.lock.take() {
            Some(lock) => lock,
            None => ProfileLock::try_acquire(&layout.lock_path())?,
        };

        match open_and_migrate(&layout) {
            Ok(conn) => {
                self.conn = Some(conn);
                self.lock = Some(lock);
                Ok(())
            }
            Err(err) => {
                warn!(path = %layout.root().display(), error = %err, "Tracker store initialization failed");
                Err(err)
            }
        }
    }

    /// Close the connection and release the profile lock.
    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            debug!("Tracker store closed");
        }
        self.lock = None;
    }

    fn conn(&self) -> Result<&Connection, StorageError> {
        self.conn.as_ref().ok_or(StorageError::NotInitialized)
    }

    /// Insert a row, or update description and estimate when they differ.
    pub fn upsert_database(
        &self,
        details: &DatabaseDetails,
    ) -> Result<UpsertOutcome, StorageError> {
        let conn = self.conn()?;
        match self.database(&details.origin, &details.name)? {
            None => {
                conn.execute(
                    "INSERT INTO Databases (origin, name, description, estimated_size)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        details.origin.as_str(),
                        details.name,
                        details.description,
                        details.estimated_size
                    ],
                )?;
                Ok(UpsertOutcome::Inserted)
            }
            Some(existing)
                if existing.description == details.description
                    && existing.estimated_size == details.estimated_size =>
            {
                Ok(UpsertOutcome::Unchanged)
            }
            Some(_) => {
                conn.execute(
                    "UPDATE Databases SET description = ?3, estimated_size = ?4
                     WHERE origin = ?1 AND name = ?2",
                    params![
                        details.origin.as_str(),
                        details.name,
                        details.description,
                        details.estimated_size
                    ],
                )?;
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    pub fn database(
        &self,
        origin: &OriginId,
        name: &str,
    ) -> Result<Option<DatabaseDetails>, StorageError> {
        let row = self
            .conn()?
            .query_row(
                "SELECT description, estimated_size FROM Databases
                 WHERE origin = ?1 AND name = ?2",
                params![origin.as_str(), name],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(description, estimated_size)| DatabaseDetails {
            origin: origin.clone(),
            name: name.to_string(),
            description,
            estimated_size,
        }))
    }

    /// Row id of the database, which names its file on disk.
    pub fn database_id(&self, origin: &OriginId, name: &str) -> Result<Option<i64>, StorageError> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT id FROM Databases WHERE origin = ?1 AND name = ?2",
                params![origin.as_str(), name],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// All rows of `origin`, ordered by name.
    pub fn databases_for_origin(
        &self,
        origin: &OriginId,
    ) -> Result<Vec<DatabaseDetails>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, description, estimated_size FROM Databases
             WHERE origin = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![origin.as_str()], |row| {
            Ok(DatabaseDetails {
                origin: origin.clone(),
                name: row.get(0)?,
                description: row.get(1)?,
                estimated_size: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Returns `true` if a row was removed.
    pub fn delete_database_row(&self, origin: &OriginId, name: &str) -> Result<bool, StorageError> {
        let removed = self.conn()?.execute(
            "DELETE FROM Databases WHERE origin = ?1 AND name = ?2",
            params![origin.as_str(), name],
        )?;
        Ok(removed > 0)
    }

    /// Distinct origins with at least one database row.
    pub fn origins(&self) -> Result<Vec<OriginId>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT origin FROM Databases ORDER BY origin")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.map(|r| r.map(OriginId::from).map_err(StorageError::from))
            .collect()
    }

    pub fn origin_quota(&self, origin: &OriginId) -> Result<Option<i64>, StorageError> {
        Ok(self
            .conn()?
            .query_row(
                "SELECT quota FROM Quota WHERE origin = ?1",
                params![origin.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_origin_quota(&self, origin: &OriginId, quota: i64) -> Result<(), StorageError> {
        self.conn()?.execute(
            "INSERT INTO Quota (origin, quota) VALUES (?1, ?2)
             ON CONFLICT(origin) DO UPDATE SET quota = excluded.quota",
            params![origin.as_str(), quota],
        )?;
        Ok(())
    }

    /// Remove every database and quota row of `origin` atomically.
    pub fn delete_origin_rows(&mut self, origin: &OriginId) -> Result<(), StorageError> {
        let conn = self.conn.as_mut().ok_or(StorageError::NotInitialized)?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM Databases WHERE origin = ?1",
            params![origin.as_str()],
        )?;
        tx.execute("DELETE FROM Quota WHERE origin = ?1", params![origin.as_str()])?;
        tx.commit()?;
        Ok(())
    }

    /// On-disk file of a tracked database, `None` if it has no row.
    pub fn database_file_path(
        &self,
        origin: &OriginId,
        name: &str,
    ) -> Result<Option<PathBuf>, StorageError> {
        let layout = self.layout.as_ref().ok_or(StorageError::Ephemeral)?;
        Ok(self
            .database_id(origin, name)?
            .and_then(|id| layout.database_file(origin, id)))
    }
}

fn open_and_migrate(layout: &DatabaseLayout) -> Result<Connection, StorageError> {
    let db_path = layout.tracker_db_path();
    if layout.root().is_dir() && db_path.exists() {
        match open_existing_store(&db_path) {
            Ok(conn) => drop(conn),
            Err(err) => {
                warn!(
                    path = %layout.root().display(),
                    error = %err,
                    "Discarding unreadable tracker store"
                );
                layout::remove_dir_best_effort(layout.root())?;
            }
        }
    }

    std::fs::create_dir_all(layout.root())
        .map_err(|e| StorageError::Database(format!("{}: {e}", layout.root().display())))?;

    let mut conn = Connection::open(&db_path)?;
    migrate(&mut conn)?;
    info!(path = %db_path.display(), version = CURRENT_VERSION, "Tracker store ready");
    Ok(conn)
}

/// Open an existing tracker store, failing with `Corruption` if it cannot be
/// read or has no `meta` table.
pub(crate) fn open_existing_store(path: &Path) -> Result<Connection, StorageError> {
    let corrupt = |details: String| StorageError::Corruption { details };
    let conn = Connection::open(path).map_err(|e| corrupt(e.to_string()))?;
    let has_meta = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
            [],
            |_| Ok(()),
        )
        .optional()
        .map_err(|e| corrupt(e.to_string()))?
        .is_some();
    if !has_meta {
        return Err(corrupt("missing meta table".to_string()));
    }
    Ok(conn)
}

fn meta_value(conn: &Connection, key: &str) -> Result<Option<i64>, StorageError> {
    Ok(conn
        .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
            row.get(0)
        })
        .optional()?)
}

/// Bring the schema up to [`CURRENT_VERSION`] in a single transaction.
pub(crate) fn migrate(conn: &mut Connection) -> Result<(), StorageError> {
    let tx = conn.transaction()?;
    tx.execute_batch(META_SQL)?;

    let version = meta_value(&tx, "version")?.unwrap_or(0);
    let compatible = meta_value(&tx, "last_compatible_version")?.unwrap_or(0);
    if compatible > CURRENT_VERSION {
        return Err(StorageError::SchemaTooNew {
            current: compatible,
            supported: CURRENT_VERSION,
        });
    }

    let migrations: [(i64, &str); 2] = [(1, MIGRATION_1), (2, MIGRATION_2)];
    for (target, sql) in migrations {
        if version < target {
            tx.execute_batch(sql)
                .map_err(|e| StorageError::MigrationFailed(format!("to version {target}: {e}")))?;
            debug!(version = target, "Applied tracker migration");
        }
    }

    if version < CURRENT_VERSION {
        tx.execute(
            "INSERT INTO meta (key, value) VALUES ('version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![CURRENT_VERSION],
        )?;
    }
    if compatible < COMPATIBLE_VERSION {
        tx.execute(
            "INSERT INTO meta (key, value) VALUES ('last_compatible_version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![COMPATIBLE_VERSION],
        )?;
    }

    tx.commit()?;
    Ok(())
}
