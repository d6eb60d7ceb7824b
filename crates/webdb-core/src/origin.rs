//! Origin and database identity types.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Opaque, stable identifier of a web or extension origin.
///
/// Ordering and equality are by byte value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OriginId(String);

impl OriginId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this origin is exempt from bulk sweeps under `prefix`.
    #[must_use]
    pub fn is_exempt(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OriginId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for OriginId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for OriginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// (origin, database name) pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatabaseKey {
    pub origin: OriginId,
    pub name: String,
}

impl DatabaseKey {
    #[must_use]
    pub fn new(origin: impl Into<OriginId>, name: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for DatabaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.origin, self.name)
    }
}

/// Set of database names grouped by origin.
///
/// Empty origin entries are never retained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseSet {
    inner: BTreeMap<OriginId, BTreeSet<String>>,
}

impl DatabaseSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the pair was not already present.
    pub fn insert(&mut self, origin: &OriginId, name: &str) -> bool {
        self.inner
            .entry(origin.clone())
            .or_default()
            .insert(name.to_string())
    }

    #[must_use]
    pub fn contains(&self, origin: &OriginId, name: &str) -> bool {
        self.inner
            .get(origin)
            .is_some_and(|names| names.contains(name))
    }

    /// Returns `true` if the pair was present.
    pub fn remove(&mut self, origin: &OriginId, name: &str) -> bool {
        let Some(names) = self.inner.get_mut(origin) else {
            return false;
        };
        let removed = names.remove(name);
        if names.is_empty() {
            self.inner.remove(origin);
        }
        removed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Number of (origin, name) pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.values().map(BTreeSet::len).sum()
    }

    /// Names recorded for `origin`.
    #[must_use]
    pub fn names(&self, origin: &OriginId) -> Option<&BTreeSet<String>> {
        self.inner.get(origin)
    }

    pub fn origins(&self) -> impl Iterator<Item = &OriginId> {
        self.inner.keys()
    }

    /// Iterate pairs in (origin, name) order.
    pub fn iter(&self) -> impl Iterator<Item = (&OriginId, &str)> {
        self.inner
            .iter()
            .flat_map(|(origin, names)| names.iter().map(move |name| (origin, name.as_str())))
    }
}

impl FromIterator<DatabaseKey> for DatabaseSet {
    fn from_iter<I: IntoIterator<Item = DatabaseKey>>(iter: I) -> Self {
        let mut set = Self::new();
        for key in iter {
            set.insert(&key.origin, &key.name);
        }
        set
    }
}

/// Persisted metadata of one tracked database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseDetails {
    pub origin: OriginId,
    pub name: String,
    pub description: String,
    /// Caller-supplied size hint recorded at creation.
    pub estimated_size: i64,
}

impl DatabaseDetails {
    #[must_use]
    pub fn new(
        origin: impl Into<OriginId>,
        name: impl Into<String>,
        description: impl Into<String>,
        estimated_size: i64,
    ) -> Self {
        Self {
            origin: origin.into(),
            name: name.into(),
            description: description.into(),
            estimated_size,
        }
    }

    #[must_use]
    pub fn key(&self) -> DatabaseKey {
        DatabaseKey::new(self.origin.clone(), self.name.clone())
    }
}
