//! Lifecycle observers notified synchronously by the tracker.

use crate::origin::OriginId;
use std::sync::Arc;

/// Receives size changes and pending-deletion notices.
///
/// Callbacks run inside the tracker call that triggered them.
pub trait TrackerObserver: Send + Sync {
    fn on_database_size_changed(
        &self,
        origin: &OriginId,
        name: &str,
        size: i64,
        space_available: i64,
    );

    fn on_database_scheduled_for_deletion(&self, origin: &OriginId, name: &str);
}

/// Handle returned when registering an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
pub(crate) struct ObserverList {
    observers: Vec<(ObserverId, Arc<dyn TrackerObserver>)>,
    next_id: u64,
}

impl ObserverList {
    pub(crate) fn add(&mut self, observer: Arc<dyn TrackerObserver>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;
        self.observers.push((id, observer));
        id
    }

    pub(crate) fn remove(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(existing, _)| *existing != id);
        self.observers.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn size_changed(&self, origin: &OriginId, name: &str, size: i64, space: i64) {
        for (_, observer) in &self.observers {
            observer.on_database_size_changed(origin, name, size, space);
        }
    }

    pub(crate) fn scheduled_for_deletion(&self, origin: &OriginId, name: &str) {
        for (_, observer) in &self.observers {
            observer.on_database_scheduled_for_deletion(origin, name);
        }
    }
}
