//! Tracker façade: open/modify/close notifications, quota queries, deletion
//! requests and observer fan-out.
//!
//! Every operation runs synchronously on the caller's thread. Deferred
//! deletions complete inside a later [`DatabaseTracker::database_closed`] (or
//! [`DatabaseTracker::close_databases`]) call once the last connection of a
//! scheduled database goes away.
//!
//! Store failures never cross this boundary. When the metadata store cannot
//! be initialized (ephemeral profile, locked profile, unreadable store) reads
//! return zero or empty results and deletion requests report
//! [`DeleteStatus::Failed`].

use crate::config::TrackerConfig;
use crate::connections::ConnectionRegistry;
use crate::deletion::{BatchId, BatchResult, CompletedBatch, DeletionCallback, DeletionScheduler};
use crate::error::StorageError;
use crate::layout;
use crate::metadata::MetadataStore;
use crate::observer::{ObserverId, ObserverList, TrackerObserver};
use crate::origin::{DatabaseDetails, DatabaseKey, DatabaseSet, OriginId};
use crate::origin_cache::{CachedOriginInfo, OriginInfoCache};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Result of [`DatabaseTracker::database_opened`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedDatabase {
    /// Current on-disk size of the opened database.
    pub database_size: i64,
    /// Bytes left under the origin's quota.
    pub space_available: i64,
}

/// Outcome of a deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStatus {
    /// Everything requested was deleted before returning.
    Immediate,
    /// Some targets are open; the callback fires once they are all resolved.
    Pending,
    /// The request could not be carried out.
    Failed,
}

impl fmt::Display for DeleteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("immediate"),
            Self::Pending => f.write_str("pending"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

pub struct DatabaseTracker {
    config: TrackerConfig,
    store: MetadataStore,
    connections: ConnectionRegistry,
    cache: OriginInfoCache,
    volatile_quotas: BTreeMap<OriginId, i64>,
    scheduler: DeletionScheduler,
    observers: ObserverList,
}

impl fmt::Debug for DatabaseTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseTracker")
            .field("config", &self.config)
            .field("store", &self.store)
            .field("connections", &self.connections)
            .field("scheduler", &self.scheduler)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl DatabaseTracker {
    /// Create a tracker. Nothing touches disk until the first operation
    /// that needs the metadata store.
    #[must_use]
    pub fn new(config: TrackerConfig) -> Self {
        let store = MetadataStore::new(config.profile_path.as_deref());
        Self {
            config,
            store,
            connections: ConnectionRegistry::new(),
            cache: OriginInfoCache::new(),
            volatile_quotas: BTreeMap::new(),
            scheduler: DeletionScheduler::new(),
            observers: ObserverList::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.store.is_initialized()
    }

    /// Open the metadata store now, reporting why it is unavailable.
    pub fn open_store(&mut self) -> Result<(), StorageError> {
        self.store.initialize()
    }

    /// Open the metadata store on first use.
    ///
    /// Returns `false` while the store is unavailable; a later call retries.
    pub fn lazy_init(&mut self) -> bool {
        match self.open_store() {
            Ok(()) => true,
            Err(StorageError::Ephemeral) => false,
            Err(err) => {
                warn!(error = %err, "Tracker store unavailable");
                false
            }
        }
    }

    // ========================================================================
    // Connection notifications
    // ========================================================================

    /// Record a new connection to a database, creating or refreshing its
    /// metadata row.
    ///
    /// Returns zeros when the store is unavailable.
    pub fn database_opened(
        &mut self,
        origin: &OriginId,
        name: &str,
        description: &str,
        estimated_size: i64,
    ) -> OpenedDatabase {
        if !self.lazy_init() {
            return OpenedDatabase::default();
        }
        self.connections.add_connection(origin, name);

        let details = DatabaseDetails::new(origin.clone(), name, description, estimated_size);
        match self.store.upsert_database(&details) {
            Ok(outcome) if outcome.changed() => self.cache.invalidate(origin),
            Ok(_) => {}
            Err(err) => {
                warn!(origin = %origin, database = name, error = %err, "Failed to record database");
                return OpenedDatabase::default();
            }
        }

        self.origin_info_mut(origin)
            .map(|info| OpenedDatabase {
                database_size: info.database_size(name),
                space_available: info.space_available(),
            })
            .unwrap_or_default()
    }

    /// Re-stat a database after a write and broadcast its new size.
    ///
    /// A database without a metadata row is reported with size 0 and is not
    /// added to the origin's cached aggregate.
    pub fn database_modified(&mut self, origin: &OriginId, name: &str) {
        if !self.lazy_init() {
            return;
        }
        let path = match self.store.database_file_path(origin, name) {
            Ok(path) => path,
            Err(err) => {
                warn!(origin = %origin, database = name, error = %err, "Failed to resolve database file");
                return;
            }
        };
        let size = path.as_deref().map_or(0, layout::file_size);

        let space = {
            let Some(info) = self.origin_info_mut(origin) else {
                return;
            };
            if path.is_some() && !info.set_database_size(name, size) {
                info.set_database(name, String::new(), size);
            }
            info.space_available()
        };
        self.observers.size_changed(origin, name, size, space);
    }

    /// Drop one connection. Runs a deferred deletion once the database has
    /// no connections left.
    pub fn database_closed(&mut self, origin: &OriginId, name: &str) {
        if self.connections.is_empty() {
            return;
        }
        self.connections.remove_connection(origin, name);
        if !self.connections.is_open(origin, name) {
            self.delete_database_if_needed(origin, name);
        }
    }

    /// Drop every connection held by a terminated client.
    pub fn close_databases(&mut self, client: &ConnectionRegistry) {
        if self.connections.is_empty() {
            return;
        }
        for key in self.connections.remove_connections(client) {
            self.delete_database_if_needed(&key.origin, &key.name);
        }
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Register an observer. Clears the whole origin cache.
    pub fn add_observer(&mut self, observer: Arc<dyn TrackerObserver>) -> ObserverId {
        self.cache.invalidate_all();
        self.observers.add(observer)
    }

    /// Unregister an observer. Clears the whole origin cache.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.cache.invalidate_all();
        self.observers.remove(id)
    }

    // ========================================================================
    // Quota
    // ========================================================================

    /// Persist a quota override for `origin`.
    pub fn set_origin_quota(&mut self, origin: &OriginId, quota: i64) -> bool {
        if !self.lazy_init() {
            return false;
        }
        if let Err(err) = self.store.set_origin_quota(origin, quota) {
            warn!(origin = %origin, error = %err, "Failed to persist origin quota");
            return false;
        }
        self.cache.invalidate(origin);
        true
    }

    /// Session-scoped quota override, taking precedence over the persisted
    /// one. Negative values are rejected.
    pub fn set_origin_quota_in_memory(&mut self, origin: &OriginId, quota: i64) -> bool {
        if quota < 0 {
            warn!(origin = %origin, quota, "Rejected negative in-memory quota");
            return false;
        }
        self.volatile_quotas.insert(origin.clone(), quota);
        self.cache.invalidate(origin);
        true
    }

    pub fn reset_origin_quota_in_memory(&mut self, origin: &OriginId) {
        if self.volatile_quotas.remove(origin).is_some() {
            self.cache.invalidate(origin);
        }
    }

    /// Change the quota of origins without an override. Clears the whole
    /// origin cache.
    pub fn set_default_quota(&mut self, quota: i64) -> bool {
        if quota < 0 {
            warn!(quota, "Rejected negative default quota");
            return false;
        }
        self.config.default_quota = quota;
        self.cache.invalidate_all();
        true
    }

    #[must_use]
    pub fn default_quota(&self) -> i64 {
        self.config.default_quota
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Aggregate for `origin`, `None` if it could not be loaded.
    pub fn origin_info(&mut self, origin: &OriginId) -> Option<CachedOriginInfo> {
        self.origin_info_mut(origin).map(|info| info.clone())
    }

    /// Aggregates for every tracked origin, or `None` if any fails to load.
    pub fn all_origins_info(&mut self) -> Option<Vec<CachedOriginInfo>> {
        if !self.lazy_init() {
            return None;
        }
        let origins = match self.store.origins() {
            Ok(origins) => origins,
            Err(err) => {
                warn!(error = %err, "Failed to list origins");
                return None;
            }
        };
        origins
            .iter()
            .map(|origin| self.origin_info(origin))
            .collect()
    }

    /// Bytes left under the quota of `origin`, `None` if the lookup failed.
    pub fn space_available(&mut self, origin: &OriginId) -> Option<i64> {
        self.origin_info_mut(origin)
            .map(|info| info.space_available())
    }

    pub fn database_file_path(&mut self, origin: &OriginId, name: &str) -> Option<PathBuf> {
        if !self.lazy_init() {
            return None;
        }
        self.store
            .database_file_path(origin, name)
            .inspect_err(|err| warn!(origin = %origin, database = name, error = %err, "Failed to resolve database file"))
            .ok()
            .flatten()
    }

    #[must_use]
    pub fn is_database_scheduled_for_deletion(&self, origin: &OriginId, name: &str) -> bool {
        self.scheduler.is_scheduled(origin, name)
    }

    #[must_use]
    pub fn pending_deletions(&self) -> &DatabaseSet {
        self.scheduler.pending()
    }

    fn origin_info_mut(&mut self, origin: &OriginId) -> Option<&mut CachedOriginInfo> {
        if !self.lazy_init() {
            return None;
        }
        let store = &self.store;
        let volatile = &self.volatile_quotas;
        let default_quota = self.config.default_quota;
        match self.cache.get_or_populate(origin, || {
            populate_origin_info(store, volatile, default_quota, origin)
        }) {
            Ok(info) => Some(info),
            Err(err) => {
                warn!(origin = %origin, error = %err, "Failed to load origin info");
                None
            }
        }
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Delete one database now, or once its last connection closes.
    ///
    /// `callback` fires exactly once: right away unless the result is
    /// `Pending`, otherwise when the deferred deletion runs.
    pub fn delete_database(
        &mut self,
        origin: &OriginId,
        name: &str,
        callback: Option<DeletionCallback>,
    ) -> DeleteStatus {
        let key = DatabaseKey::new(origin.clone(), name);
        let mut resolved = BatchResult::default();
        if !self.lazy_init() {
            resolved.failed.push(key);
            complete_now(callback, resolved);
            return DeleteStatus::Failed;
        }
        let mut to_schedule = DatabaseSet::new();
        if self.connections.is_open(origin, name) {
            to_schedule.insert(origin, name);
        } else {
            self.delete_closed_into(&key, &mut resolved);
        }
        self.finish_bulk_request(&to_schedule, callback, resolved)
    }

    /// Delete every database of non-exempt origins whose file was modified
    /// at or after `cutoff`.
    ///
    /// Files modified strictly before `cutoff` are kept; a missing file
    /// counts as modified at the Unix epoch. If any origin's databases cannot
    /// be listed, closed matches are still deleted but nothing is scheduled
    /// and the result is `Failed`.
    pub fn delete_data_modified_since(
        &mut self,
        cutoff: SystemTime,
        callback: Option<DeletionCallback>,
    ) -> DeleteStatus {
        if !self.lazy_init() {
            complete_now(callback, BatchResult::default());
            return DeleteStatus::Failed;
        }
        let origins = match self.store.origins() {
            Ok(origins) => origins,
            Err(err) => {
                warn!(error = %err, "Failed to list origins");
                complete_now(callback, BatchResult::default());
                return DeleteStatus::Failed;
            }
        };

        let mut listing_failed = false;
        let mut resolved = BatchResult::default();
        let mut to_schedule = DatabaseSet::new();
        for origin in origins {
            if origin.is_exempt(&self.config.extension_origin_prefix) {
                continue;
            }
            let databases = match self.store.databases_for_origin(&origin) {
                Ok(databases) => databases,
                Err(err) => {
                    warn!(origin = %origin, error = %err, "Failed to list databases");
                    listing_failed = true;
                    continue;
                }
            };
            for db in databases {
                let modified = self
                    .store
                    .database_file_path(&origin, &db.name)
                    .ok()
                    .flatten()
                    .and_then(|path| layout::last_modified(&path))
                    .unwrap_or(UNIX_EPOCH);
                if modified < cutoff {
                    continue;
                }
                if self.connections.is_open(&origin, &db.name) {
                    to_schedule.insert(&origin, &db.name);
                } else {
                    let key = DatabaseKey::new(origin.clone(), db.name);
                    self.delete_closed_into(&key, &mut resolved);
                }
            }
        }

        if listing_failed {
            complete_now(callback, resolved);
            return DeleteStatus::Failed;
        }
        self.finish_bulk_request(&to_schedule, callback, resolved)
    }

    /// Delete every database of `origin`, then the origin itself.
    pub fn delete_data_for_origin(
        &mut self,
        origin: &OriginId,
        callback: Option<DeletionCallback>,
    ) -> DeleteStatus {
        if !self.lazy_init() {
            complete_now(callback, BatchResult::default());
            return DeleteStatus::Failed;
        }
        let databases = match self.store.databases_for_origin(origin) {
            Ok(databases) => databases,
            Err(err) => {
                warn!(origin = %origin, error = %err, "Failed to list databases");
                complete_now(callback, BatchResult::default());
                return DeleteStatus::Failed;
            }
        };

        if databases.is_empty() {
            let status = match self.delete_origin(origin) {
                Ok(()) => DeleteStatus::Immediate,
                Err(err) => {
                    warn!(origin = %origin, error = %err, "Origin deletion failed");
                    DeleteStatus::Failed
                }
            };
            complete_now(callback, BatchResult::default());
            return status;
        }

        let mut resolved = BatchResult::default();
        let mut to_schedule = DatabaseSet::new();
        for db in databases {
            if self.connections.is_open(origin, &db.name) {
                to_schedule.insert(origin, &db.name);
            } else {
                let key = DatabaseKey::new(origin.clone(), db.name);
                self.delete_closed_into(&key, &mut resolved);
            }
        }
        self.finish_bulk_request(&to_schedule, callback, resolved)
    }

    /// Pending if anything was deferred, else fire `callback` with the
    /// outcome of the pairs handled right away.
    fn finish_bulk_request(
        &mut self,
        to_schedule: &DatabaseSet,
        callback: Option<DeletionCallback>,
        resolved: BatchResult,
    ) -> DeleteStatus {
        if !to_schedule.is_empty() {
            self.schedule_for_deletion(to_schedule, callback, resolved);
            return DeleteStatus::Pending;
        }
        let status = if resolved.is_success() {
            DeleteStatus::Immediate
        } else {
            DeleteStatus::Failed
        };
        complete_now(callback, resolved);
        status
    }

    fn delete_closed_into(&mut self, key: &DatabaseKey, resolved: &mut BatchResult) {
        match self.delete_closed_database(&key.origin, &key.name) {
            Ok(()) => resolved.deleted.push(key.clone()),
            Err(err) => {
                warn!(origin = %key.origin, database = %key.name, error = %err, "Database deletion failed");
                resolved.failed.push(key.clone());
            }
        }
    }

    fn schedule_for_deletion(
        &mut self,
        set: &DatabaseSet,
        callback: Option<DeletionCallback>,
        resolved: BatchResult,
    ) -> Option<BatchId> {
        for (origin, name) in set.iter() {
            debug!(origin = %origin, database = name, "Scheduled database for deletion");
            self.observers.scheduled_for_deletion(origin, name);
        }
        let batch = self.scheduler.schedule_with(set, callback, resolved);
        if let Some(id) = batch {
            debug!(batch_id = id.get(), databases = set.len(), "Registered deletion batch");
        }
        batch
    }

    fn delete_database_if_needed(&mut self, origin: &OriginId, name: &str) {
        if !self.scheduler.is_scheduled(origin, name) {
            return;
        }
        let deleted = match self.delete_closed_database(origin, name) {
            Ok(()) => true,
            Err(err) => {
                warn!(origin = %origin, database = name, error = %err, "Deferred deletion failed");
                false
            }
        };
        let completed = self.scheduler.resolve(origin, name, deleted);
        fire_completed(completed);
    }

    /// Remove a database that has no open connections: file, then row, then
    /// cache entry. Removes the origin as well once it has no databases left.
    fn delete_closed_database(&mut self, origin: &OriginId, name: &str) -> Result<(), StorageError> {
        if !self.lazy_init() {
            return Err(StorageError::NotInitialized);
        }
        if self.connections.is_open(origin, name) {
            return Err(StorageError::StillOpen {
                origin: origin.to_string(),
                name: name.to_string(),
            });
        }

        if let Some(path) = self.store.database_file_path(origin, name)? {
            layout::delete_file_if_exists(&path)?;
            let journal = layout::journal_path(&path);
            if let Err(err) = layout::delete_file_if_exists(&journal) {
                warn!(path = %journal.display(), error = %err, "Failed to delete journal file");
            }
        }

        if !self.store.delete_database_row(origin, name)? {
            debug!(origin = %origin, database = name, "Database not tracked; nothing to delete");
            return Ok(());
        }
        self.cache.invalidate(origin);
        info!(origin = %origin, database = name, "Deleted database");

        match self.store.databases_for_origin(origin) {
            Ok(remaining) if remaining.is_empty() => {
                if let Err(err) = self.delete_origin(origin) {
                    warn!(origin = %origin, error = %err, "Failed to remove empty origin");
                }
            }
            Ok(_) => {}
            Err(err) => {
                warn!(origin = %origin, error = %err, "Failed to check for remaining databases");
            }
        }
        Ok(())
    }

    /// Remove an origin's directory and rows. Fails if any of its databases
    /// is open or the directory cannot be removed.
    fn delete_origin(&mut self, origin: &OriginId) -> Result<(), StorageError> {
        if self.connections.is_origin_in_use(origin) {
            return Err(StorageError::OriginInUse {
                origin: origin.to_string(),
            });
        }
        self.cache.invalidate(origin);

        if let Some(dir) = self.store.layout().and_then(|l| l.origin_dir(origin)) {
            layout::remove_dir_best_effort(&dir)?;
        }
        self.store.delete_origin_rows(origin)?;
        info!(origin = %origin, "Deleted origin");
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Discard cached state and close the metadata store. The next operation
    /// re-opens it. Connections and pending deletions are kept.
    pub fn close_tracker_database_and_clear_caches(&mut self) {
        self.cache.invalidate_all();
        self.store.close();
    }
}

impl Drop for DatabaseTracker {
    fn drop(&mut self) {
        let pending = self.scheduler.pending_count();
        if pending > 0 {
            warn!(
                pending,
                batches = self.scheduler.batch_count(),
                "Tracker dropped with deletions still pending"
            );
        }
    }
}

fn complete_now(callback: Option<DeletionCallback>, result: BatchResult) {
    if let Some(callback) = callback {
        callback.complete(result);
    }
}

fn fire_completed(completed: Vec<CompletedBatch>) {
    for batch in completed {
        info!(
            batch_id = batch.id.get(),
            deleted = batch.result.deleted.len(),
            failed = batch.result.failed.len(),
            "Deletion batch complete"
        );
        batch.fire();
    }
}

/// Quota of `origin`: in-memory override, else a positive persisted override,
/// else the default.
fn resolve_quota(
    store: &MetadataStore,
    volatile: &BTreeMap<OriginId, i64>,
    default_quota: i64,
    origin: &OriginId,
) -> Result<i64, StorageError> {
    if let Some(quota) = volatile.get(origin) {
        return Ok(*quota);
    }
    Ok(store
        .origin_quota(origin)?
        .filter(|quota| *quota > 0)
        .unwrap_or(default_quota))
}

fn populate_origin_info(
    store: &MetadataStore,
    volatile: &BTreeMap<OriginId, i64>,
    default_quota: i64,
    origin: &OriginId,
) -> Result<CachedOriginInfo, StorageError> {
    let databases = store.databases_for_origin(origin)?;
    let quota = resolve_quota(store, volatile, default_quota, origin)?;
    let mut info = CachedOriginInfo::new(origin.clone(), quota);
    for db in databases {
        let size = store
            .database_file_path(origin, &db.name)?
            .map_or(0, |path| layout::file_size(&path));
        info.set_database(&db.name, db.description, size);
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tracker(dir: &std::path::Path) -> DatabaseTracker {
        DatabaseTracker::new(TrackerConfig::with_profile(dir))
    }

    fn o(id: &str) -> OriginId {
        OriginId::new(id)
    }

    fn write_db(t: &mut DatabaseTracker, origin: &OriginId, name: &str, bytes: usize) -> PathBuf {
        let path = t.database_file_path(origin, name).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![0u8; bytes]).unwrap();
        path
    }

    #[derive(Default)]
    struct Events {
        sizes: Mutex<Vec<(String, String, i64, i64)>>,
        scheduled: Mutex<Vec<(String, String)>>,
    }

    impl TrackerObserver for Events {
        fn on_database_size_changed(&self, origin: &OriginId, name: &str, size: i64, space: i64) {
            self.sizes
                .lock()
                .unwrap()
                .push((origin.to_string(), name.to_string(), size, space));
        }

        fn on_database_scheduled_for_deletion(&self, origin: &OriginId, name: &str) {
            self.scheduled
                .lock()
                .unwrap()
                .push((origin.to_string(), name.to_string()));
        }
    }

    #[test]
    fn ephemeral_tracker_degrades_to_zeros() {
        let mut t = DatabaseTracker::new(TrackerConfig::default());
        let opened = t.database_opened(&o("o"), "a", "", 100);
        assert_eq!(opened, OpenedDatabase::default());
        assert!(t.connections().is_empty());
        assert!(t.origin_info(&o("o")).is_none());
        assert!(t.all_origins_info().is_none());
        assert_eq!(t.space_available(&o("o")), None);
        assert_eq!(t.delete_database(&o("o"), "a", None), DeleteStatus::Failed);
        assert!(!t.set_origin_quota(&o("o"), 10));
        t.database_closed(&o("o"), "a");
    }

    #[test]
    fn opened_reports_size_and_space() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let origin = o("o");
        t.database_opened(&origin, "a", "first", 0);
        write_db(&mut t, &origin, "a", 1000);
        t.database_closed(&origin, "a");

        let opened = t.database_opened(&origin, "a", "first", 0);
        // cache still holds the size seen at first open
        assert_eq!(opened.database_size, 0);

        t.database_modified(&origin, "a");
        let info = t.origin_info(&origin).unwrap();
        assert_eq!(info.database_size("a"), 1000);
        assert_eq!(info.space_available(), crate::config::DEFAULT_QUOTA - 1000);
    }

    #[test]
    fn changed_description_refreshes_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let origin = o("o");
        t.database_opened(&origin, "a", "old", 0);
        write_db(&mut t, &origin, "a", 10);
        let opened = t.database_opened(&origin, "a", "new", 0);
        assert_eq!(opened.database_size, 10);
        assert_eq!(
            t.origin_info(&origin).unwrap().database_description("a"),
            Some("new")
        );
    }

    #[test]
    fn modified_broadcasts_to_observers() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let events = Arc::new(Events::default());
        t.add_observer(events.clone());
        let origin = o("o");
        t.set_origin_quota(&origin, 500);

        t.database_opened(&origin, "a", "", 0);
        write_db(&mut t, &origin, "a", 200);
        t.database_modified(&origin, "a");

        assert_eq!(
            *events.sizes.lock().unwrap(),
            vec![("o".to_string(), "a".to_string(), 200, 300)]
        );
    }

    #[test]
    fn quota_resolution_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let origin = o("o");
        t.database_opened(&origin, "a", "", 0);
        assert_eq!(t.space_available(&origin), Some(crate::config::DEFAULT_QUOTA));

        assert!(t.set_origin_quota(&origin, 0));
        assert_eq!(t.space_available(&origin), Some(crate::config::DEFAULT_QUOTA));

        assert!(t.set_origin_quota(&origin, 100));
        assert_eq!(t.space_available(&origin), Some(100));

        assert!(t.set_origin_quota_in_memory(&origin, 7));
        assert_eq!(t.space_available(&origin), Some(7));
        assert!(!t.set_origin_quota_in_memory(&origin, -1));
        assert_eq!(t.space_available(&origin), Some(7));

        t.reset_origin_quota_in_memory(&origin);
        assert_eq!(t.space_available(&origin), Some(100));
    }

    #[test]
    fn default_quota_change_clears_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let origin = o("o");
        t.database_opened(&origin, "a", "", 0);
        assert!(t.set_default_quota(42));
        assert_eq!(t.default_quota(), 42);
        assert_eq!(t.space_available(&origin), Some(42));
        assert!(!t.set_default_quota(-5));
    }

    #[test]
    fn observer_changes_invalidate_whole_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        t.database_opened(&o("a"), "x", "", 0);
        t.database_opened(&o("b"), "y", "", 0);
        assert_eq!(t.cache.len(), 2);

        let id = t.add_observer(Arc::new(Events::default()));
        assert!(t.cache.is_empty());

        t.origin_info(&o("a"));
        assert!(t.remove_observer(id));
        assert!(t.cache.is_empty());
    }

    #[test]
    fn delete_closed_database_is_immediate_and_removes_origin() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let origin = o("o");
        t.database_opened(&origin, "a", "", 0);
        let path = write_db(&mut t, &origin, "a", 10);
        std::fs::write(layout::journal_path(&path), b"j").unwrap();
        t.set_origin_quota(&origin, 1234);
        t.database_closed(&origin, "a");

        assert_eq!(t.delete_database(&origin, "a", None), DeleteStatus::Immediate);
        assert!(!path.exists());
        assert!(!layout::journal_path(&path).exists());
        assert!(!path.parent().unwrap().exists());
        assert_eq!(t.all_origins_info(), Some(Vec::new()));
        assert_eq!(t.store.origin_quota(&origin).unwrap(), None);
    }

    #[test]
    fn open_database_deletion_waits_for_last_close() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let events = Arc::new(Events::default());
        t.add_observer(events.clone());
        let origin = o("o1");
        let fired = Arc::new(AtomicUsize::new(0));

        t.database_opened(&origin, "a", "", 0);
        t.database_opened(&origin, "a", "", 0);
        let path = write_db(&mut t, &origin, "a", 10);

        let counter = Arc::clone(&fired);
        let status = t.delete_database(
            &origin,
            "a",
            Some(DeletionCallback::new(move |result| {
                assert!(result.is_success());
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        assert_eq!(status, DeleteStatus::Pending);
        assert!(t.is_database_scheduled_for_deletion(&origin, "a"));
        assert_eq!(events.scheduled.lock().unwrap().len(), 1);
        assert_eq!(t.connections().count(&origin, "a"), 2);

        t.database_closed(&origin, "a");
        assert!(path.exists());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        t.database_closed(&origin, "a");
        assert!(!path.exists());
        assert!(t.connections().is_empty());
        assert!(!t.is_database_scheduled_for_deletion(&origin, "a"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_databases_runs_deferred_deletions() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let origin = o("o");
        t.database_opened(&origin, "a", "", 0);
        t.database_opened(&origin, "b", "", 0);
        assert_eq!(
            t.delete_data_for_origin(&origin, None),
            DeleteStatus::Pending
        );

        let client: ConnectionRegistry = [
            crate::origin::DatabaseKey::new("o", "a"),
            crate::origin::DatabaseKey::new("o", "b"),
        ]
        .into_iter()
        .collect();
        t.close_databases(&client);
        assert!(t.pending_deletions().is_empty());
        assert_eq!(t.all_origins_info(), Some(Vec::new()));
    }

    fn counting_callback() -> (Arc<Mutex<Vec<BatchResult>>>, DeletionCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let callback = DeletionCallback::new(move |result| sink.lock().unwrap().push(result));
        (log, callback)
    }

    #[test]
    fn fast_path_callback_fires_once_with_deleted_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let origin = o("o");
        t.database_opened(&origin, "a", "", 0);
        t.database_closed(&origin, "a");

        let (log, callback) = counting_callback();
        assert_eq!(
            t.delete_data_for_origin(&origin, Some(callback)),
            DeleteStatus::Immediate
        );
        let results = log.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].deleted, vec![DatabaseKey::new("o", "a")]);
        assert!(results[0].is_success());
        assert_eq!(t.scheduler.batch_count(), 0);
    }

    #[test]
    fn immediate_failure_fires_callback_with_failed_pair() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let origin = o("o");
        t.database_opened(&origin, "a", "", 0);
        t.database_closed(&origin, "a");
        let path = t.database_file_path(&origin, "a").unwrap();
        std::fs::create_dir_all(path.join("blocker")).unwrap();

        let (log, callback) = counting_callback();
        assert_eq!(
            t.delete_database(&origin, "a", Some(callback)),
            DeleteStatus::Failed
        );
        let results = log.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].failed, vec![DatabaseKey::new("o", "a")]);
    }

    #[test]
    fn ephemeral_delete_still_completes_callback() {
        let mut t = DatabaseTracker::new(TrackerConfig::default());
        let (log, callback) = counting_callback();
        assert_eq!(
            t.delete_data_for_origin(&o("o"), Some(callback)),
            DeleteStatus::Failed
        );
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn deleting_untracked_database_keeps_origin_quota() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let origin = o("o");
        assert!(t.set_origin_quota(&origin, 100));

        assert_eq!(
            t.delete_database(&origin, "never-existed", None),
            DeleteStatus::Immediate
        );
        assert_eq!(t.store.origin_quota(&origin).unwrap(), Some(100));

        t.database_opened(&origin, "a", "", 0);
        assert_eq!(t.space_available(&origin), Some(100));
    }

    #[test]
    fn delete_succeeds_when_remaining_rows_are_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let origin = o("o");
        t.database_opened(&origin, "a", "", 0);
        t.database_closed(&origin, "a");

        let db_path = t.store.layout().unwrap().tracker_db_path();
        let raw = rusqlite::Connection::open(db_path).unwrap();
        raw.execute(
            "INSERT INTO Databases (origin, name, description, estimated_size)
             VALUES ('o', 'bad', X'00', 'abc')",
            [],
        )
        .unwrap();
        drop(raw);

        assert_eq!(t.delete_database(&origin, "a", None), DeleteStatus::Immediate);
        assert!(t.database_file_path(&origin, "a").is_none());
    }

    #[test]
    fn modified_untracked_database_broadcasts_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        let events = Arc::new(Events::default());
        t.add_observer(events.clone());
        let origin = o("o");
        t.set_origin_quota(&origin, 500);

        t.database_modified(&origin, "ghost");

        assert_eq!(
            *events.sizes.lock().unwrap(),
            vec![("o".to_string(), "ghost".to_string(), 0, 500)]
        );
        assert!(t.origin_info(&origin).unwrap().databases.is_empty());
    }

    #[test]
    fn reset_reopens_store_on_next_use() {
        let dir = tempfile::tempdir().unwrap();
        let mut t = tracker(dir.path());
        t.database_opened(&o("o"), "a", "", 0);
        assert!(t.is_initialized());

        t.close_tracker_database_and_clear_caches();
        assert!(!t.is_initialized());
        assert!(t.cache.is_empty());
        assert_eq!(t.connections().count(&o("o"), "a"), 1);

        assert!(t.origin_info(&o("o")).is_some());
        assert!(t.is_initialized());
    }

    #[test]
    fn second_tracker_on_same_profile_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = tracker(dir.path());
        first.database_opened(&o("o"), "a", "", 0);

        let mut second = tracker(dir.path());
        assert!(second.origin_info(&o("o")).is_none());

        drop(first);
        assert!(second.origin_info(&o("o")).is_some());
    }
}
