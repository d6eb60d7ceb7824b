//! Open-connection multiset keyed by (origin, database name).
//!
//! A pair is open iff its count is above zero. Counts never go negative and
//! zero-count entries are never retained, so [`ConnectionRegistry::is_empty`]
//! is exact.

use crate::origin::{DatabaseKey, OriginId};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionRegistry {
    counts: BTreeMap<OriginId, BTreeMap<String, u32>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_connection(&mut self, origin: &OriginId, name: &str) {
        self.add_connections(origin, name, 1);
    }

    fn add_connections(&mut self, origin: &OriginId, name: &str, n: u32) {
        if n == 0 {
            return;
        }
        let count = self
            .counts
            .entry(origin.clone())
            .or_default()
            .entry(name.to_string())
            .or_insert(0);
        *count = count.saturating_add(n);
    }

    /// Drop one connection; a pair with no connections is left untouched.
    pub fn remove_connection(&mut self, origin: &OriginId, name: &str) {
        self.remove_n(origin, name, 1);
    }

    /// Remove up to `n` connections, returning `true` if the pair closed.
    fn remove_n(&mut self, origin: &OriginId, name: &str, n: u32) -> bool {
        let Some(names) = self.counts.get_mut(origin) else {
            return false;
        };
        let Some(count) = names.get_mut(name) else {
            return false;
        };
        *count = count.saturating_sub(n);
        let closed = *count == 0;
        if closed {
            names.remove(name);
            if names.is_empty() {
                self.counts.remove(origin);
            }
        }
        closed
    }

    /// Forget every connection of the pair. Returns `true` if it was open.
    pub fn remove_all(&mut self, origin: &OriginId, name: &str) -> bool {
        let Some(names) = self.counts.get_mut(origin) else {
            return false;
        };
        let removed = names.remove(name).is_some();
        if names.is_empty() {
            self.counts.remove(origin);
        }
        removed
    }

    #[must_use]
    pub fn is_open(&self, origin: &OriginId, name: &str) -> bool {
        self.count(origin, name) > 0
    }

    #[must_use]
    pub fn count(&self, origin: &OriginId, name: &str) -> u32 {
        self.counts
            .get(origin)
            .and_then(|names| names.get(name))
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn is_origin_in_use(&self, origin: &OriginId) -> bool {
        self.counts.contains_key(origin)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Open pairs with their counts, in (origin, name) order.
    pub fn iter(&self) -> impl Iterator<Item = (DatabaseKey, u32)> + '_ {
        self.counts.iter().flat_map(|(origin, names)| {
            names
                .iter()
                .map(move |(name, count)| (DatabaseKey::new(origin.clone(), name.clone()), *count))
        })
    }

    /// Subtract every count in `other` from this registry.
    ///
    /// Returns exactly the pairs whose count went from above zero to zero.
    pub fn remove_connections(&mut self, other: &Self) -> Vec<DatabaseKey> {
        let mut closed = Vec::new();
        for (key, count) in other.iter() {
            if self.is_open(&key.origin, &key.name) && self.remove_n(&key.origin, &key.name, count)
            {
                closed.push(key);
            }
        }
        closed
    }
}

impl FromIterator<DatabaseKey> for ConnectionRegistry {
    fn from_iter<I: IntoIterator<Item = DatabaseKey>>(iter: I) -> Self {
        let mut registry = Self::new();
        for key in iter {
            registry.add_connections(&key.origin, &key.name, 1);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn o(id: &str) -> OriginId {
        OriginId::new(id)
    }

    #[test]
    fn counts_add_and_remove_with_floor() {
        let mut reg = ConnectionRegistry::new();
        reg.add_connection(&o("o1"), "a");
        reg.add_connection(&o("o1"), "a");
        assert_eq!(reg.count(&o("o1"), "a"), 2);

        reg.remove_connection(&o("o1"), "a");
        assert!(reg.is_open(&o("o1"), "a"));
        reg.remove_connection(&o("o1"), "a");
        assert!(!reg.is_open(&o("o1"), "a"));
        reg.remove_connection(&o("o1"), "a");
        assert_eq!(reg.count(&o("o1"), "a"), 0);
        assert!(reg.is_empty());
    }

    #[test]
    fn origin_in_use_tracks_any_open_database() {
        let mut reg = ConnectionRegistry::new();
        reg.add_connection(&o("o1"), "a");
        reg.add_connection(&o("o1"), "b");
        assert!(reg.is_origin_in_use(&o("o1")));
        assert!(!reg.is_origin_in_use(&o("o2")));

        assert!(reg.remove_all(&o("o1"), "a"));
        assert!(!reg.remove_all(&o("o1"), "a"));
        assert!(reg.is_origin_in_use(&o("o1")));
        reg.remove_connection(&o("o1"), "b");
        assert!(!reg.is_origin_in_use(&o("o1")));
    }

    #[test]
    fn remove_connections_reports_only_closed_pairs() {
        let mut reg = ConnectionRegistry::new();
        for _ in 0..3 {
            reg.add_connection(&o("o1"), "a");
        }
        reg.add_connection(&o("o1"), "b");
        reg.add_connection(&o("o2"), "c");

        let client: ConnectionRegistry = [
            DatabaseKey::new("o1", "a"),
            DatabaseKey::new("o1", "b"),
            DatabaseKey::new("o2", "c"),
            DatabaseKey::new("o3", "never-open"),
        ]
        .into_iter()
        .collect();

        let closed = reg.remove_connections(&client);
        assert_eq!(
            closed,
            vec![DatabaseKey::new("o1", "b"), DatabaseKey::new("o2", "c")]
        );
        assert_eq!(reg.count(&o("o1"), "a"), 2);
    }

    #[test]
    fn remove_connections_floors_excess_counts() {
        let mut reg = ConnectionRegistry::new();
        reg.add_connection(&o("o"), "a");
        let client: ConnectionRegistry =
            std::iter::repeat_n(DatabaseKey::new("o", "a"), 4).collect();
        assert_eq!(reg.remove_connections(&client), vec![DatabaseKey::new("o", "a")]);
        assert!(reg.is_empty());
    }
}
