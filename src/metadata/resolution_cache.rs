//! Bounded in-memory cache of resolved links with least-recently-used eviction.

use moka::policy::EvictionPolicy;
use moka::sync::Cache as MokaCache;

use crate::protocol::{ResolvedLinks, TrackKey};

/// Process-scoped memo of resolver results. Negative results are stored too.
pub struct ResolutionCache {
    entries: MokaCache<TrackKey, ResolvedLinks>,
}

impl ResolutionCache {
    pub fn new(capacity: usize) -> Self {
        let entries = MokaCache::builder()
            .max_capacity(capacity.max(1) as u64)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        Self { entries }
    }

    /// Returns a copy of the cached links and marks the entry as recently used.
    pub fn get(&self, key: &TrackKey) -> Option<ResolvedLinks> {
        self.entries.get(key)
    }

    pub fn insert(&self, key: TrackKey, links: ResolvedLinks) {
        self.entries.insert(key, links);
    }

    /// Number of live entries, after applying pending evictions.
    pub fn len(&self) -> usize {
        self.entries.run_pending_tasks();
        self.entries.entry_count() as usize
    }
}
