//! Deferred deletion of databases that are still open.
//!
//! Per (origin, database) pair:
//!
//! ```text
//! NotScheduled ──schedule──► ScheduledPending ──resolve(deleted)──► Deleted
//!                                    │
//!                                    └────────resolve(failed)─────► Failed
//! ```
//!
//! A batch groups the pairs of one request with an optional completion
//! callback. The callback is a move-only value consumed when the last pair of
//! its batch resolves, so it runs exactly once and never early. Batches are
//! keyed by a scheduler-minted [`BatchId`], never by callback identity.

use crate::origin::{DatabaseKey, DatabaseSet, OriginId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a registered deletion batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchId(u64);

impl BatchId {
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// Outcome of every pair in a completed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub deleted: Vec<DatabaseKey>,
    pub failed: Vec<DatabaseKey>,
}

impl BatchResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Completion notification of a deletion batch.
pub struct DeletionCallback(Box<dyn FnOnce(BatchResult) + Send>);

impl DeletionCallback {
    pub fn new(f: impl FnOnce(BatchResult) + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    pub fn complete(self, result: BatchResult) {
        (self.0)(result);
    }
}

impl fmt::Debug for DeletionCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeletionCallback(..)")
    }
}

struct PendingBatch {
    remaining: DatabaseSet,
    result: BatchResult,
    callback: DeletionCallback,
}

/// A batch whose last pair has resolved. Call [`CompletedBatch::fire`].
#[derive(Debug)]
pub struct CompletedBatch {
    pub id: BatchId,
    pub result: BatchResult,
    callback: DeletionCallback,
}

impl CompletedBatch {
    pub fn fire(self) {
        self.callback.complete(self.result);
    }
}

#[derive(Default)]
pub struct DeletionScheduler {
    pending: DatabaseSet,
    batches: BTreeMap<BatchId, PendingBatch>,
    next_batch_id: u64,
}

impl fmt::Debug for DeletionScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionScheduler")
            .field("pending", &self.pending.len())
            .field("batches", &self.batches.len())
            .finish()
    }
}

impl DeletionScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every pair of `set` pending.
    ///
    /// With a callback and a non-empty set, registers a batch and returns its
    /// id. A callback passed with an empty set is dropped unfired.
    pub fn schedule(
        &mut self,
        set: &DatabaseSet,
        callback: Option<DeletionCallback>,
    ) -> Option<BatchId> {
        self.schedule_with(set, callback, BatchResult::default())
    }

    /// Like [`schedule`](Self::schedule), for a request whose other pairs
    /// already resolved. `resolved` seeds the batch result.
    pub fn schedule_with(
        &mut self,
        set: &DatabaseSet,
        callback: Option<DeletionCallback>,
        resolved: BatchResult,
    ) -> Option<BatchId> {
        for (origin, name) in set.iter() {
            self.pending.insert(origin, name);
        }
        let callback = callback?;
        if set.is_empty() {
            return None;
        }
        let id = BatchId(self.next_batch_id);
        self.next_batch_id += 1;
        self.batches.insert(
            id,
            PendingBatch {
                remaining: set.clone(),
                result: resolved,
                callback,
            },
        );
        Some(id)
    }

    #[must_use]
    pub fn is_scheduled(&self, origin: &OriginId, name: &str) -> bool {
        self.pending.contains(origin, name)
    }

    #[must_use]
    pub fn pending(&self) -> &DatabaseSet {
        &self.pending
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Record the outcome of a pending pair.
    ///
    /// The pair leaves the pending set either way. Returns the batches that
    /// this resolution completed, in id order.
    pub fn resolve(&mut self, origin: &OriginId, name: &str, deleted: bool) -> Vec<CompletedBatch> {
        if !self.pending.remove(origin, name) {
            return Vec::new();
        }
        let key = DatabaseKey::new(origin.clone(), name);

        let mut done = Vec::new();
        for (id, batch) in &mut self.batches {
            if batch.remaining.remove(origin, name) {
                if deleted {
                    batch.result.deleted.push(key.clone());
                } else {
                    batch.result.failed.push(key.clone());
                }
                if batch.remaining.is_empty() {
                    done.push(*id);
                }
            }
        }

        done.into_iter()
            .filter_map(|id| {
                self.batches.remove(&id).map(|batch| CompletedBatch {
                    id,
                    result: batch.result,
                    callback: batch.callback,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<BatchResult>>>;

    fn recorder() -> (Log, impl Fn() -> DeletionCallback) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move || {
                let log = Arc::clone(&log);
                DeletionCallback::new(move |result| log.lock().unwrap().push(result))
            }
        };
        (log, make)
    }

    fn set(pairs: &[(&str, &str)]) -> DatabaseSet {
        pairs.iter().map(|(o, n)| DatabaseKey::new(*o, *n)).collect()
    }

    fn fire_all(done: Vec<CompletedBatch>) -> usize {
        let n = done.len();
        for batch in done {
            batch.fire();
        }
        n
    }

    #[test]
    fn batch_fires_once_after_all_pairs_resolve() {
        let (log, make) = recorder();
        let mut sched = DeletionScheduler::new();
        let id = sched
            .schedule(&set(&[("o1", "a"), ("o1", "b")]), Some(make()))
            .unwrap();
        assert_eq!(id.get(), 0);
        assert!(sched.is_scheduled(&OriginId::new("o1"), "a"));

        assert_eq!(fire_all(sched.resolve(&OriginId::new("o1"), "a", true)), 0);
        assert!(log.lock().unwrap().is_empty());

        assert_eq!(fire_all(sched.resolve(&OriginId::new("o1"), "b", false)), 1);
        assert_eq!(fire_all(sched.resolve(&OriginId::new("o1"), "b", true)), 0);

        let results = log.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].deleted, vec![DatabaseKey::new("o1", "a")]);
        assert_eq!(results[0].failed, vec![DatabaseKey::new("o1", "b")]);
        assert!(!results[0].is_success());
        assert_eq!(sched.pending_count(), 0);
        assert_eq!(sched.batch_count(), 0);
    }

    #[test]
    fn overlapping_batches_complete_independently() {
        let (log, make) = recorder();
        let mut sched = DeletionScheduler::new();
        let first = sched.schedule(&set(&[("o", "a")]), Some(make())).unwrap();
        let second = sched
            .schedule(&set(&[("o", "a"), ("o", "b")]), Some(make()))
            .unwrap();
        assert_ne!(first, second);

        let done = sched.resolve(&OriginId::new("o"), "a", true);
        assert_eq!(done.iter().map(|b| b.id).collect::<Vec<_>>(), vec![first]);
        fire_all(done);
        assert_eq!(log.lock().unwrap().len(), 1);

        fire_all(sched.resolve(&OriginId::new("o"), "b", true));
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn schedule_without_callback_only_marks_pending() {
        let mut sched = DeletionScheduler::new();
        assert!(sched.schedule(&set(&[("o", "a")]), None).is_none());
        assert_eq!(sched.batch_count(), 0);
        assert!(sched.is_scheduled(&OriginId::new("o"), "a"));
        assert!(sched.resolve(&OriginId::new("o"), "a", true).is_empty());
        assert!(!sched.is_scheduled(&OriginId::new("o"), "a"));
    }

    #[test]
    fn empty_set_registers_no_batch() {
        let (log, make) = recorder();
        let mut sched = DeletionScheduler::new();
        assert!(sched.schedule(&DatabaseSet::new(), Some(make())).is_none());
        assert_eq!(sched.batch_count(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn seeded_result_is_reported_with_deferred_pairs() {
        let (log, make) = recorder();
        let mut sched = DeletionScheduler::new();
        let resolved = BatchResult {
            deleted: vec![DatabaseKey::new("o", "closed")],
            failed: vec![DatabaseKey::new("o", "stuck")],
        };
        sched.schedule_with(&set(&[("o", "open")]), Some(make()), resolved);
        fire_all(sched.resolve(&OriginId::new("o"), "open", true));

        let results = log.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].deleted,
            vec![DatabaseKey::new("o", "closed"), DatabaseKey::new("o", "open")]
        );
        assert_eq!(results[0].failed, vec![DatabaseKey::new("o", "stuck")]);
    }

    #[test]
    fn resolving_unscheduled_pair_is_noop() {
        let mut sched = DeletionScheduler::new();
        assert!(sched.resolve(&OriginId::new("o"), "a", true).is_empty());
    }
}
