//! In-memory cache tier with byte and item ceilings.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, CacheRecord};
use crate::domain::errors::{CacheError, ConfigError};

/// Idle time after which a record's frequency weight is halved.
pub const RECENCY_HALF_LIFE_SECS: f64 = 60.0;

/// How the memory tier picks eviction victims.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Access count discounted by idle time.
    #[default]
    FrequencyWeighted,
    /// Least recently used first.
    Lru,
}

impl EvictionPolicy {
    /// Retention score; the lowest score is evicted first.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(self, record: &CacheRecord, now: DateTime<Utc>) -> f64 {
        match self {
            Self::FrequencyWeighted => {
                let weight = (record.access_count as f64) + 1.0;
                weight / (1.0 + record.idle_secs(now) / RECENCY_HALF_LIFE_SECS)
            }
            // Candidates are visited least recently used first, so a flat
            // score always picks the LRU record.
            Self::Lru => 0.0,
        }
    }
}

impl std::fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FrequencyWeighted => f.write_str("frequency_weighted"),
            Self::Lru => f.write_str("lru"),
        }
    }
}

struct TierState {
    entries: LruCache<CacheKey, CacheRecord>,
    occupied: u64,
}

/// Fast cache tier.
///
/// Every read-modify-write runs under one lock, so the byte and item
/// ceilings hold whenever the lock is free.
pub struct MemoryTier {
    state: Mutex<TierState>,
    max_bytes: u64,
    max_items: usize,
    policy: EvictionPolicy,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryTier {
    /// Creates a tier with the given ceilings.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` if either ceiling is zero.
    pub fn new(
        max_bytes: u64,
        max_items: usize,
        policy: EvictionPolicy,
    ) -> Result<Self, ConfigError> {
        if max_bytes == 0 {
            return Err(ConfigError::invalid(
                "cache.memory_ceiling_bytes",
                "must be greater than zero",
            ));
        }
        if max_items == 0 {
            return Err(ConfigError::invalid(
                "cache.memory_ceiling_items",
                "must be greater than zero",
            ));
        }

        Ok(Self {
            state: Mutex::new(TierState {
                entries: LruCache::unbounded(),
                occupied: 0,
            }),
            max_bytes,
            max_items,
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    /// Returns a record and records the access.
    pub fn get(&self, key: &CacheKey) -> Option<CacheRecord> {
        let mut state = self.state.lock();
        if let Some(record) = state.entries.get_mut(key) {
            record.touch();
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory tier hit");
            Some(record.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory tier miss");
            None
        }
    }

    /// Returns a record without touching it.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheRecord> {
        self.state.lock().entries.peek(key).cloned()
    }

    /// Returns true if the key is resident.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state.lock().entries.contains(key)
    }

    /// Stores a record, evicting others until both ceilings hold.
    ///
    /// # Errors
    /// Returns `CacheError::CapacityExceeded` if the record alone is larger
    /// than the byte ceiling; nothing is stored in that case.
    pub fn set(&self, record: CacheRecord) -> Result<(), CacheError> {
        let size = record.size_bytes();
        if size > self.max_bytes {
            return Err(CacheError::CapacityExceeded {
                size,
                ceiling: self.max_bytes,
            });
        }

        let key = record.key.clone();
        let mut state = self.state.lock();
        if let Some(previous) = state.entries.put(key.clone(), record) {
            state.occupied = state.occupied.saturating_sub(previous.size_bytes());
        }
        state.occupied += size;
        debug!(key = %key, size, "Stored record in memory tier");

        self.evict_locked(&mut state, Some(&key));
        Ok(())
    }

    /// Removes a record.
    pub fn delete(&self, key: &CacheKey) -> Option<CacheRecord> {
        let mut state = self.state.lock();
        let removed = state.entries.pop(key)?;
        state.occupied = state.occupied.saturating_sub(removed.size_bytes());
        debug!(key = %key, "Removed record from memory tier");
        Some(removed)
    }

    /// Evicts until both ceilings hold. Returns the number evicted.
    pub fn evict_if_over_capacity(&self) -> usize {
        let mut state = self.state.lock();
        self.evict_locked(&mut state, None)
    }

    fn evict_locked(&self, state: &mut TierState, protected: Option<&CacheKey>) -> usize {
        let mut evicted = 0;
        while state.occupied > self.max_bytes || state.entries.len() > self.max_items {
            let Some(victim) = self.pick_victim(state, protected) else {
                break;
            };
            if let Some(record) = state.entries.pop(&victim) {
                state.occupied = state.occupied.saturating_sub(record.size_bytes());
                evicted += 1;
                debug!(key = %victim, size = record.size_bytes(), "Evicted record from memory tier");
            }
        }
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    fn pick_victim(&self, state: &TierState, protected: Option<&CacheKey>) -> Option<CacheKey> {
        let now = Utc::now();
        let mut best: Option<(&CacheKey, f64)> = None;
        for (key, record) in state.entries.iter().rev() {
            if protected == Some(key) {
                continue;
            }
            let score = self.policy.score(record, now);
            if best.is_none_or(|(_, lowest)| score < lowest) {
                best = Some((key, score));
            }
        }
        best.map(|(key, _)| key.clone())
    }

    /// Removes every record.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.occupied = 0;
        debug!("Cleared memory tier");
    }

    /// Number of resident records.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if no record is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes held by resident records.
    pub fn occupied_bytes(&self) -> u64 {
        self.state.lock().occupied
    }

    /// Byte ceiling.
    #[must_use]
    pub const fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Item ceiling.
    #[must_use]
    pub const fn max_items(&self) -> usize {
        self.max_items
    }

    /// Number of read hits.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of read misses.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of records evicted for capacity.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTier")
            .field("max_bytes", &self.max_bytes)
            .field("max_items", &self.max_items)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn record(name: &str, size: usize) -> CacheRecord {
        CacheRecord::new(
            CacheKey::from_raw(name),
            Bytes::from(vec![0u8; size]),
            format!("https://example.com/{name}.png"),
            "image/png",
        )
    }

    fn key(name: &str) -> CacheKey {
        CacheKey::from_raw(name)
    }

    #[test]
    fn test_set_and_get() {
        let tier = MemoryTier::new(1024, 10, EvictionPolicy::default()).unwrap();
        tier.set(record("a", 10)).unwrap();

        let hit = tier.get(&key("a")).unwrap();
        assert_eq!(hit.access_count, 1);
        assert_eq!(tier.occupied_bytes(), 10);
        assert_eq!(tier.hits(), 1);
    }

    #[test]
    fn test_miss_is_counted() {
        let tier = MemoryTier::new(1024, 10, EvictionPolicy::default()).unwrap();
        assert!(tier.get(&key("missing")).is_none());
        assert_eq!(tier.misses(), 1);
    }

    #[test]
    fn test_peek_does_not_touch() {
        let tier = MemoryTier::new(1024, 10, EvictionPolicy::default()).unwrap();
        tier.set(record("a", 10)).unwrap();

        let peeked = tier.peek(&key("a")).unwrap();
        assert_eq!(peeked.access_count, 0);
        assert_eq!(tier.peek(&key("a")).unwrap().access_count, 0);
    }

    #[test]
    fn test_byte_ceiling_holds_after_every_set() {
        let tier = MemoryTier::new(100, 100, EvictionPolicy::default()).unwrap();
        for i in 0..20 {
            tier.set(record(&format!("r{i}"), 30)).unwrap();
            assert!(tier.occupied_bytes() <= 100);
        }
        assert_eq!(tier.len(), 3);
        assert!(tier.contains(&key("r19")));
        assert_eq!(tier.evictions(), 17);
    }

    #[test]
    fn test_item_ceiling_holds() {
        let tier = MemoryTier::new(10_000, 2, EvictionPolicy::Lru).unwrap();
        tier.set(record("a", 1)).unwrap();
        tier.set(record("b", 1)).unwrap();
        tier.set(record("c", 1)).unwrap();

        assert_eq!(tier.len(), 2);
        assert!(!tier.contains(&key("a")));
    }

    #[test]
    fn test_oversized_record_is_rejected() {
        let tier = MemoryTier::new(50, 10, EvictionPolicy::default()).unwrap();
        tier.set(record("small", 10)).unwrap();

        let err = tier.set(record("huge", 51)).unwrap_err();
        assert!(err.is_capacity());
        assert!(!tier.contains(&key("huge")));
        assert!(tier.contains(&key("small")));
    }

    #[test]
    fn test_zero_ceilings_are_rejected() {
        assert!(MemoryTier::new(0, 10, EvictionPolicy::default()).is_err());
        assert!(MemoryTier::new(10, 0, EvictionPolicy::default()).is_err());
    }

    #[test]
    fn test_frequency_weighted_keeps_hot_record() {
        let tier = MemoryTier::new(10_000, 2, EvictionPolicy::FrequencyWeighted).unwrap();
        tier.set(record("hot", 1)).unwrap();
        for _ in 0..5 {
            tier.get(&key("hot"));
        }
        tier.set(record("cold", 1)).unwrap();
        tier.get(&key("cold"));

        tier.set(record("new", 1)).unwrap();

        assert!(tier.contains(&key("hot")));
        assert!(!tier.contains(&key("cold")));
        assert!(tier.contains(&key("new")));
    }

    #[test]
    fn test_lru_policy_evicts_least_recent() {
        let tier = MemoryTier::new(10_000, 2, EvictionPolicy::Lru).unwrap();
        tier.set(record("hot", 1)).unwrap();
        for _ in 0..5 {
            tier.get(&key("hot"));
        }
        tier.set(record("cold", 1)).unwrap();
        tier.get(&key("cold"));

        tier.set(record("new", 1)).unwrap();

        assert!(!tier.contains(&key("hot")));
        assert!(tier.contains(&key("cold")));
    }

    #[test]
    fn test_new_record_is_never_its_own_victim() {
        let tier = MemoryTier::new(100, 1, EvictionPolicy::FrequencyWeighted).unwrap();
        tier.set(record("old", 10)).unwrap();
        for _ in 0..50 {
            tier.get(&key("old"));
        }
        tier.set(record("fresh", 10)).unwrap();

        assert!(tier.contains(&key("fresh")));
        assert!(!tier.contains(&key("old")));
    }

    #[test]
    fn test_replacing_key_adjusts_occupancy() {
        let tier = MemoryTier::new(1000, 10, EvictionPolicy::default()).unwrap();
        tier.set(record("a", 100)).unwrap();
        tier.set(record("a", 40)).unwrap();

        assert_eq!(tier.len(), 1);
        assert_eq!(tier.occupied_bytes(), 40);
    }

    #[test]
    fn test_delete_and_clear() {
        let tier = MemoryTier::new(1000, 10, EvictionPolicy::default()).unwrap();
        tier.set(record("a", 10)).unwrap();
        tier.set(record("b", 20)).unwrap();

        assert!(tier.delete(&key("a")).is_some());
        assert!(tier.delete(&key("a")).is_none());
        assert_eq!(tier.occupied_bytes(), 20);

        tier.clear();
        assert!(tier.is_empty());
        assert_eq!(tier.occupied_bytes(), 0);
    }

    #[test]
    fn test_evict_if_over_capacity_is_noop_within_limits() {
        let tier = MemoryTier::new(1000, 10, EvictionPolicy::default()).unwrap();
        tier.set(record("a", 10)).unwrap();
        assert_eq!(tier.evict_if_over_capacity(), 0);
        assert_eq!(tier.len(), 1);
    }
}
