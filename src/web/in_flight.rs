use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::gateway::RecordId;

type Key = (&'static str, RecordId);

/// Records currently being moderated. A second action on the same record is refused
/// until the first one finishes.
#[derive(Clone, Default)]
pub struct InFlight {
    active: Arc<Mutex<HashSet<Key>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when an action for `(domain, id)` is already running.
    pub fn acquire(&self, domain: &'static str, id: &RecordId) -> Option<InFlightGuard> {
        let key = (domain, id.clone());
        if !lock(&self.active).insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            active: self.active.clone(),
            key,
        })
    }
}

fn lock(active: &Mutex<HashSet<Key>>) -> MutexGuard<'_, HashSet<Key>> {
    active.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the record when dropped.
pub struct InFlightGuard {
    active: Arc<Mutex<HashSet<Key>>>,
    key: Key,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.key);
    }
}
