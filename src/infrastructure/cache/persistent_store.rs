//! Persistent cache tier over a `DurableStore`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{CacheKey, CacheRecord};
use crate::domain::errors::{CacheError, StoreError};
use crate::domain::ports::DurableStore;

/// Share of entries dropped when the medium reports its quota is full.
pub const QUOTA_CLEANUP_FRACTION: f64 = 0.25;

/// Ceilings of the persistent tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistentLimits {
    /// Maximum payload bytes kept.
    pub max_bytes: u64,
    /// Age after which a record expires.
    pub ttl: Duration,
}

#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    size: u64,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
}

impl IndexEntry {
    fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        chrono::Duration::from_std(ttl)
            .is_ok_and(|ttl| now.signed_duration_since(self.created_at) > ttl)
    }
}

impl From<&CacheRecord> for IndexEntry {
    fn from(record: &CacheRecord) -> Self {
        Self {
            size: record.size_bytes(),
            created_at: record.created_at,
            last_accessed_at: record.last_accessed_at,
        }
    }
}

/// Slower, durable cache tier.
///
/// Records are stored as JSON; an in-process index tracks sizes and access
/// times so eviction never has to read payloads back.
pub struct PersistentStore {
    store: Arc<dyn DurableStore>,
    index: Mutex<HashMap<CacheKey, IndexEntry>>,
    // Bumped under the index lock whenever entries leave the index; a read
    // that raced a removal must not re-index the key.
    removals: AtomicU64,
    limits: PersistentLimits,
}

impl PersistentStore {
    /// Opens the tier and indexes whatever a previous session left behind.
    ///
    /// Unreadable and expired entries are removed while indexing.
    ///
    /// # Errors
    /// Returns error if the medium cannot list its keys.
    pub async fn open(
        store: Arc<dyn DurableStore>,
        limits: PersistentLimits,
    ) -> Result<Self, StoreError> {
        let tier = Self {
            store,
            index: Mutex::new(HashMap::new()),
            removals: AtomicU64::new(0),
            limits,
        };
        tier.rebuild_index().await?;
        Ok(tier)
    }

    async fn rebuild_index(&self) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut dropped = 0usize;

        for key in self.store.keys().await? {
            match self.read_record(&key).await {
                Ok(Some(record)) if !record.is_expired_at(now, self.limits.ttl) => {
                    self.index.lock().insert(key, IndexEntry::from(&record));
                }
                Ok(Some(_)) | Err(_) => {
                    dropped += 1;
                    self.discard(&key).await;
                }
                Ok(None) => {}
            }
        }

        info!(
            entries = self.len(),
            bytes = self.occupied_bytes(),
            dropped,
            "Indexed persistent tier"
        );
        Ok(())
    }

    async fn read_record(&self, key: &CacheKey) -> Result<Option<CacheRecord>, StoreError> {
        let Some(payload) = self.store.read(key).await? else {
            return Ok(None);
        };
        let record: CacheRecord = serde_json::from_slice(&payload)?;
        if record.key != *key {
            return Err(StoreError::corrupted(key.as_str(), "key mismatch"));
        }
        if !record.is_consistent() {
            return Err(StoreError::corrupted(key.as_str(), "size mismatch"));
        }
        Ok(Some(record))
    }

    async fn discard(&self, key: &CacheKey) {
        if let Err(e) = self.store.remove(key).await {
            warn!(key = %key, error = %e, "Failed to remove persistent entry");
        }
        self.forget(key);
    }

    fn forget(&self, key: &CacheKey) {
        let mut index = self.index.lock();
        index.remove(key);
        self.removals.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns a record, or `None` if it is missing, unreadable or expired.
    ///
    /// Corrupt and expired entries are removed on the way out.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheRecord> {
        let removals = self.removals.load(Ordering::SeqCst);
        let mut record = match self.read_record(key).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.forget(key);
                trace!(key = %key, "Persistent tier miss");
                return None;
            }
            Err(e) if e.is_corruption() => {
                warn!(key = %key, error = %e, "Discarding corrupt persistent entry");
                self.discard(key).await;
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Persistent tier read failed");
                return None;
            }
        };

        let now = Utc::now();
        if record.is_expired_at(now, self.limits.ttl) {
            debug!(key = %key, "Persistent entry expired");
            self.discard(key).await;
            return None;
        }

        record.touch_at(now);
        {
            let mut index = self.index.lock();
            if self.removals.load(Ordering::SeqCst) != removals && !index.contains_key(key) {
                debug!(key = %key, "Persistent entry removed during read");
                return None;
            }
            index.insert(key.clone(), IndexEntry::from(&record));
        }
        trace!(key = %key, "Persistent tier hit");
        Some(record)
    }

    /// Writes a record, evicting older entries to stay under the ceiling.
    ///
    /// # Errors
    /// Returns `CacheError::CapacityExceeded` for records larger than the
    /// ceiling, or the storage error if a write still fails after the quota
    /// cleanup pass.
    pub async fn set(&self, record: &CacheRecord) -> Result<(), CacheError> {
        let size = record.size_bytes();
        if size > self.limits.max_bytes {
            return Err(CacheError::CapacityExceeded {
                size,
                ceiling: self.limits.max_bytes,
            });
        }

        let payload = serde_json::to_vec(record).map_err(StoreError::from)?;
        self.make_room(&record.key, size).await?;

        match self.store.write(&record.key, &payload).await {
            Ok(()) => {}
            Err(StoreError::QuotaExceeded) => {
                let freed = self.cleanup_for_quota(&record.key).await;
                warn!(key = %record.key, freed, "Persistent quota exceeded, retrying write");
                self.store.write(&record.key, &payload).await?;
            }
            Err(e) => return Err(e.into()),
        }

        self.index
            .lock()
            .insert(record.key.clone(), IndexEntry::from(record));
        debug!(key = %record.key, size, "Stored record in persistent tier");
        Ok(())
    }

    async fn make_room(&self, key: &CacheKey, incoming: u64) -> Result<(), StoreError> {
        let victims = {
            let index = self.index.lock();
            let mut occupied: u64 = index
                .iter()
                .filter(|(k, _)| *k != key)
                .map(|(_, e)| e.size)
                .sum();
            let mut victims = Vec::new();
            for (victim, size) in Self::oldest_first(&index, key) {
                if occupied + incoming <= self.limits.max_bytes {
                    break;
                }
                occupied = occupied.saturating_sub(size);
                victims.push(victim);
            }
            victims
        };

        for victim in victims {
            self.remove(&victim).await?;
            debug!(key = %victim, "Evicted record from persistent tier");
        }
        Ok(())
    }

    async fn cleanup_for_quota(&self, key: &CacheKey) -> usize {
        let victims: Vec<CacheKey> = {
            let index = self.index.lock();
            let candidates = Self::oldest_first(&index, key);
            let count = quota_cleanup_count(candidates.len());
            candidates.into_iter().take(count).map(|(k, _)| k).collect()
        };

        let freed = victims.len();
        for victim in victims {
            self.discard(&victim).await;
        }
        freed
    }

    fn oldest_first(
        index: &HashMap<CacheKey, IndexEntry>,
        exclude: &CacheKey,
    ) -> Vec<(CacheKey, u64)> {
        let mut entries: Vec<_> = index.iter().filter(|(k, _)| *k != exclude).collect();
        entries.sort_by_key(|(_, e)| e.last_accessed_at);
        entries
            .into_iter()
            .map(|(k, e)| (k.clone(), e.size))
            .collect()
    }

    /// Removes one record.
    ///
    /// # Errors
    /// Returns error if the medium fails to remove it.
    pub async fn remove(&self, key: &CacheKey) -> Result<(), StoreError> {
        self.store.remove(key).await?;
        self.forget(key);
        Ok(())
    }

    /// Removes every record.
    ///
    /// # Errors
    /// Returns error if the medium fails to clear.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.clear().await?;
        {
            let mut index = self.index.lock();
            index.clear();
            self.removals.fetch_add(1, Ordering::SeqCst);
        }
        debug!("Cleared persistent tier");
        Ok(())
    }

    /// Removes records older than the TTL. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now()).await
    }

    /// Removes records that are expired at `now`.
    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<CacheKey> = self
            .index
            .lock()
            .iter()
            .filter(|(_, e)| e.is_expired_at(now, self.limits.ttl))
            .map(|(k, _)| k.clone())
            .collect();

        let count = expired.len();
        for key in expired {
            self.discard(&key).await;
        }
        if count > 0 {
            info!(count, "Swept expired persistent entries");
        }
        count
    }

    /// Returns true if the key is indexed and not yet expired.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = Utc::now();
        self.index
            .lock()
            .get(key)
            .is_some_and(|e| !e.is_expired_at(now, self.limits.ttl))
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.index.lock().len()
    }

    /// Returns true if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Payload bytes held.
    pub fn occupied_bytes(&self) -> u64 {
        self.index.lock().values().map(|e| e.size).sum()
    }

    /// Configured ceilings.
    #[must_use]
    pub const fn limits(&self) -> PersistentLimits {
        self.limits
    }
}

impl std::fmt::Debug for PersistentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentStore")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn quota_cleanup_count(entries: usize) -> usize {
    if entries == 0 {
        return 0;
    }
    ((entries as f64) * QUOTA_CLEANUP_FRACTION).ceil().max(1.0) as usize
}
