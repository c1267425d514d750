//! Two-tier image cache.

mod manager;
mod memory_tier;
mod persistent_store;

pub use manager::{CacheHit, CacheManager, CacheStats, CacheTier};
pub use memory_tier::{EvictionPolicy, MemoryTier, RECENCY_HALF_LIFE_SECS};
pub use persistent_store::{PersistentLimits, PersistentStore, QUOTA_CLEANUP_FRACTION};
