//! Per-origin usage summed across storage types.

use crate::origin::OriginId;
use crate::origin_cache::CachedOriginInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Temporary,
    Persistent,
}

/// Bytes used by one origin in one storage type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginUsage {
    pub origin: OriginId,
    pub storage_type: StorageType,
    pub usage: i64,
}

impl OriginUsage {
    #[must_use]
    pub fn new(origin: impl Into<OriginId>, storage_type: StorageType, usage: i64) -> Self {
        Self {
            origin: origin.into(),
            storage_type,
            usage,
        }
    }

    /// Tracked databases count as temporary storage.
    #[must_use]
    pub fn from_origin_info(info: &CachedOriginInfo) -> Self {
        Self::new(info.origin.clone(), StorageType::Temporary, info.total_size())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub temporary: i64,
    pub persistent: i64,
}

impl UsageSummary {
    #[must_use]
    pub fn total(&self) -> i64 {
        self.temporary.saturating_add(self.persistent)
    }

    fn add(&mut self, storage_type: StorageType, usage: i64) {
        let slot = match storage_type {
            StorageType::Temporary => &mut self.temporary,
            StorageType::Persistent => &mut self.persistent,
        };
        *slot = slot.saturating_add(usage);
    }
}

/// Fold usage records into one summary per origin. Records sharing an
/// (origin, type) are summed.
pub fn aggregate_usage<I>(records: I) -> BTreeMap<OriginId, UsageSummary>
where
    I: IntoIterator<Item = OriginUsage>,
{
    let mut summaries: BTreeMap<OriginId, UsageSummary> = BTreeMap::new();
    for record in records {
        summaries
            .entry(record.origin)
            .or_default()
            .add(record.storage_type, record.usage);
    }
    summaries
}
