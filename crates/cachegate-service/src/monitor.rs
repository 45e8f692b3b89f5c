use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::CacheKey;

/// External instrumentation observing cache hits and misses.
///
/// Monitors are best-effort: the orchestrator dispatches to them outside the request's
/// critical path, with no ordering guarantee relative to the caller's continuation, and
/// a panicking monitor affects neither the caller nor other monitors.
pub trait CacheMonitor: Send + Sync {
    /// Called after a read was served from the cache.
    fn on_cache_hit(&self, key: &CacheKey);

    /// Called after a read found nothing usable in the cache.
    fn on_cache_miss(&self, key: &CacheKey);
}

/// A monitor counting hits and misses.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of hits observed so far.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// The number of misses observed so far.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl CacheMonitor for CacheStats {
    fn on_cache_hit(&self, _key: &CacheKey) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn on_cache_miss(&self, _key: &CacheKey) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}
