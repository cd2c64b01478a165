use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use serde_json::Value;
use tokio::{sync::RwLock, time::Instant};
use tracing::debug;

pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30);

/// Views the console caches between mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Payments,
    CertificateApplications,
    Grievances,
    News,
    Events,
    Photos,
    Dashboard,
}

impl CacheKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheKey::Payments => "taxPayments",
            CacheKey::CertificateApplications => "certificateApplications",
            CacheKey::Grievances => "grievances",
            CacheKey::News => "news",
            CacheKey::Events => "events",
            CacheKey::Photos => "photos",
            CacheKey::Dashboard => "dashboard",
        }
    }
}

#[derive(Default)]
struct Slot {
    value: Option<(Arc<Value>, Instant)>,
    generation: u64,
}

impl Slot {
    fn fresh(&self, max_age: Duration) -> Option<Arc<Value>> {
        self.value
            .as_ref()
            .filter(|(_, fetched_at)| fetched_at.elapsed() < max_age)
            .map(|(value, _)| value.clone())
    }
}

/// Key → fetched view store with manual invalidation and a max age.
///
/// Rows also change outside the console (citizen submissions), so an entry older
/// than `max_age` counts as a miss. Each key carries a generation counter bumped by
/// every invalidation; a load that started before an invalidation never overwrites
/// the slot with its stale result.
#[derive(Clone)]
pub struct ViewCache {
    slots: Arc<RwLock<HashMap<CacheKey, Slot>>>,
    max_age: Duration,
}

impl Default for ViewCache {
    fn default() -> Self {
        Self::with_max_age(DEFAULT_MAX_AGE)
    }
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            slots: Arc::default(),
            max_age,
        }
    }

    #[cfg(test)]
    pub async fn get(&self, key: CacheKey) -> Option<Arc<Value>> {
        let slots = self.slots.read().await;
        slots.get(&key).and_then(|slot| slot.fresh(self.max_age))
    }

    pub async fn get_or_load<F, Fut, E>(&self, key: CacheKey, load: F) -> Result<Arc<Value>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        let generation = {
            let slots = self.slots.read().await;
            match slots.get(&key) {
                Some(slot) => match slot.fresh(self.max_age) {
                    Some(value) => return Ok(value),
                    None => slot.generation,
                },
                None => 0,
            }
        };

        debug!(key = key.as_str(), "view cache miss");
        let value = Arc::new(load().await?);

        let mut slots = self.slots.write().await;
        let slot = slots.entry(key).or_default();
        if slot.generation == generation {
            slot.value = Some((value.clone(), Instant::now()));
        }
        Ok(value)
    }

    pub async fn invalidate(&self, keys: &[CacheKey]) {
        let mut slots = self.slots.write().await;
        for key in keys {
            let slot = slots.entry(*key).or_default();
            slot.value = None;
            slot.generation += 1;
        }
        debug!(keys = ?keys.iter().map(CacheKey::as_str).collect::<Vec<_>>(), "view cache invalidated");
    }

    /// Mutate a cached view in place with server-confirmed data. No-op when not cached.
    pub async fn patch(&self, key: CacheKey, apply: impl FnOnce(&mut Value)) -> bool {
        let mut slots = self.slots.write().await;
        let Some(slot) = slots.get_mut(&key) else {
            return false;
        };
        let Some(current) = slot.fresh(self.max_age) else {
            return false;
        };
        let mut next = current.as_ref().clone();
        apply(&mut next);
        slot.value = Some((Arc::new(next), Instant::now()));
        slot.generation += 1;
        true
    }
}
