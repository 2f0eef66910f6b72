use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::aggregate::AggregatedResponse;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Canonical text of the command and its node subset
    pub identity: String,
    pub generation: u64,
}

/// Broadcast results reused within one view generation.
///
/// The map is replaced whole on every change, so a reader holding a snapshot
/// never sees a half-applied update. Entries from older generations are
/// dropped whenever something is stored.
#[derive(Default)]
pub struct SessionCache {
    entries: ArcSwap<HashMap<CacheKey, Arc<AggregatedResponse>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &str, generation: u64) -> Option<Arc<AggregatedResponse>> {
        let key = CacheKey {
            identity: identity.to_string(),
            generation,
        };
        self.entries.load().get(&key).cloned()
    }

    /// Stores `response` unless it was collected under a generation other
    /// than `current_generation`. Returns whether it was stored.
    pub fn insert(&self, identity: &str, response: Arc<AggregatedResponse>, current_generation: u64) -> bool {
        if response.generation() != current_generation {
            tracing::debug!(
                identity,
                stale = response.generation(),
                current = current_generation,
                "discarding stale cache insert"
            );
            return false;
        }

        let key = CacheKey {
            identity: identity.to_string(),
            generation: current_generation,
        };
        self.entries.rcu(|old| {
            let mut next: HashMap<CacheKey, Arc<AggregatedResponse>> = old
                .iter()
                .filter(|(k, _)| k.generation == current_generation)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            next.insert(key.clone(), response.clone());
            next
        });
        true
    }

    pub fn clear(&self) {
        self.entries.store(Arc::new(HashMap::new()));
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}
