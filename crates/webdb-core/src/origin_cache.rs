//! Memoized per-origin aggregates.
//!
//! Entries are whole or absent: a population closure that fails inserts
//! nothing. Invalidation is either per-origin or the whole map.

use crate::origin::OriginId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// Size and description of one database inside a cached aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDatabase {
    pub description: String,
    pub size: i64,
}

/// Aggregate view of an origin's databases and quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedOriginInfo {
    pub origin: OriginId,
    pub quota: i64,
    pub databases: BTreeMap<String, CachedDatabase>,
}

impl CachedOriginInfo {
    #[must_use]
    pub fn new(origin: OriginId, quota: i64) -> Self {
        Self {
            origin,
            quota,
            databases: BTreeMap::new(),
        }
    }

    /// Total on-disk size across all databases.
    #[must_use]
    pub fn total_size(&self) -> i64 {
        self.databases
            .values()
            .fold(0i64, |acc, db| acc.saturating_add(db.size))
    }

    /// Size of `name`, 0 if unknown.
    #[must_use]
    pub fn database_size(&self, name: &str) -> i64 {
        self.databases.get(name).map_or(0, |db| db.size)
    }

    #[must_use]
    pub fn database_description(&self, name: &str) -> Option<&str> {
        self.databases.get(name).map(|db| db.description.as_str())
    }

    pub fn database_names(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }

    /// `max(0, quota - total_size)`.
    #[must_use]
    pub fn space_available(&self) -> i64 {
        self.quota.saturating_sub(self.total_size()).max(0)
    }

    pub fn set_database(&mut self, name: &str, description: impl Into<String>, size: i64) {
        self.databases.insert(
            name.to_string(),
            CachedDatabase {
                description: description.into(),
                size,
            },
        );
    }

    /// Update the size of a known database; unknown names are ignored.
    pub fn set_database_size(&mut self, name: &str, size: i64) -> bool {
        match self.databases.get_mut(name) {
            Some(db) => {
                db.size = size;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct OriginInfoCache {
    entries: BTreeMap<OriginId, CachedOriginInfo>,
}

impl OriginInfoCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached entry for `origin`, populating it with `populate` on a miss.
    ///
    /// A failing `populate` leaves the cache untouched and returns its error.
    pub fn get_or_populate<E, F>(
        &mut self,
        origin: &OriginId,
        populate: F,
    ) -> Result<&mut CachedOriginInfo, E>
    where
        F: FnOnce() -> Result<CachedOriginInfo, E>,
    {
        match self.entries.entry(origin.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let info = populate()?;
                tracing::debug!(origin = %origin, databases = info.databases.len(), "Populated origin cache");
                Ok(entry.insert(info))
            }
        }
    }

    pub fn invalidate(&mut self, origin: &OriginId) {
        if self.entries.remove(origin).is_some() {
            tracing::debug!(origin = %origin, "Invalidated origin cache entry");
        }
    }

    pub fn invalidate_all(&mut self) {
        if !self.entries.is_empty() {
            tracing::debug!(entries = self.entries.len(), "Invalidated origin cache");
            self.entries.clear();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(origin: &str, quota: i64, sizes: &[(&str, i64)]) -> CachedOriginInfo {
        let mut info = CachedOriginInfo::new(OriginId::new(origin), quota);
        for (name, size) in sizes {
            info.set_database(name, "", *size);
        }
        info
    }

    #[test]
    fn space_available_never_negative() {
        assert_eq!(info("o", 100, &[("a", 30), ("b", 20)]).space_available(), 50);
        assert_eq!(info("o", 100, &[("a", 300)]).space_available(), 0);
        assert_eq!(info("o", 0, &[]).space_available(), 0);
    }

    #[test]
    fn totals_and_lookups() {
        let mut i = info("o", 10, &[("a", 3), ("b", 4)]);
        assert_eq!(i.total_size(), 7);
        assert_eq!(i.database_size("a"), 3);
        assert_eq!(i.database_size("missing"), 0);
        assert!(i.set_database_size("a", 5));
        assert!(!i.set_database_size("missing", 5));
        assert_eq!(i.total_size(), 9);
        assert_eq!(i.database_names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn failed_population_leaves_no_entry() {
        let mut cache = OriginInfoCache::new();
        let o = OriginId::new("o");
        let result: Result<&mut CachedOriginInfo, &str> =
            cache.get_or_populate(&o, || Err("store unavailable"));
        assert!(result.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn population_runs_once_until_invalidated() {
        let mut cache = OriginInfoCache::new();
        let o = OriginId::new("o");
        let mut calls = 0;
        for _ in 0..3 {
            let entry: Result<_, ()> = cache.get_or_populate(&o, || {
                calls += 1;
                Ok(info("o", 1, &[]))
            });
            assert!(entry.is_ok());
        }
        assert_eq!(calls, 1);

        cache.invalidate(&o);
        let _: Result<_, ()> = cache.get_or_populate(&o, || {
            calls += 1;
            Ok(info("o", 1, &[]))
        });
        assert_eq!(calls, 2);
    }

    #[test]
    fn invalidate_all_clears_every_origin() {
        let mut cache = OriginInfoCache::new();
        for id in ["a", "b"] {
            let _: Result<_, ()> = cache.get_or_populate(&OriginId::new(id), || Ok(info(id, 1, &[])));
        }
        assert_eq!(cache.len(), 2);
        cache.invalidate_all();
        assert!(cache.is_empty());
    }
}
