//! Loader statistics DTO.

use crate::infrastructure::cache::CacheStats;

/// Snapshot of the engine returned by `ImageLoader::stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Cache tier occupancy and counters.
    pub cache: CacheStats,
    /// Preload tasks waiting in the queue.
    pub queue_depth: usize,
    /// Preload workers currently fetching.
    pub active_workers: usize,
    /// Fetches currently in flight, preload or foreground.
    pub in_flight: usize,
    /// Keys marked permanently failed.
    pub failed_keys: usize,
}

impl std::fmt::Display for LoaderStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | Queue: {} waiting, {} active | {} in flight, {} failed",
            self.cache, self.queue_depth, self.active_workers, self.in_flight, self.failed_keys
        )
    }
}
