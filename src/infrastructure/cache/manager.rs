//! Two-tier cache coordination.
//!
//! Memory first, persistent second. Memory writes are synchronous; persistent
//! writes go through a background writer so `save` never waits on I/O.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::memory_tier::MemoryTier;
use super::persistent_store::PersistentStore;
use crate::domain::entities::{CacheKey, CacheRecord};
use crate::domain::errors::CacheError;

/// Tier a cache hit was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// In-memory tier.
    Memory,
    /// Persistent tier.
    Persistent,
}

/// A record found by `CacheManager::get`.
#[derive(Debug, Clone)]
pub struct CacheHit {
    /// The record.
    pub record: CacheRecord,
    /// Where it was found.
    pub tier: CacheTier,
}

#[derive(Debug)]
enum PersistCommand {
    Write(CacheRecord),
    Remove {
        key: CacheKey,
        done: oneshot::Sender<()>,
    },
    Clear {
        done: oneshot::Sender<()>,
    },
    Flush {
        done: oneshot::Sender<()>,
    },
}

/// Owns both cache tiers.
pub struct CacheManager {
    memory: MemoryTier,
    persistent: Option<Arc<PersistentStore>>,
    persist_tx: Option<mpsc::UnboundedSender<PersistCommand>>,
    sweeper: Option<JoinHandle<()>>,
    // Bumped by invalidate and clear_all; a persistent read that started in
    // an older epoch must not be promoted into memory.
    epoch: AtomicU64,
    persistent_hits: AtomicU64,
    persistent_misses: AtomicU64,
    dropped_writes: Arc<AtomicU64>,
}

impl CacheManager {
    /// Creates a manager over a memory tier and an optional persistent tier.
    ///
    /// With a persistent tier, spawns its background writer and, when
    /// `sweep_interval` is set, a periodic TTL sweep. Must be called inside a
    /// tokio runtime.
    #[must_use]
    pub fn new(
        memory: MemoryTier,
        persistent: Option<Arc<PersistentStore>>,
        sweep_interval: Option<Duration>,
    ) -> Self {
        let dropped_writes = Arc::new(AtomicU64::new(0));

        let (persist_tx, sweeper) = match &persistent {
            Some(store) => {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(Self::run_persist_loop(
                    store.clone(),
                    rx,
                    dropped_writes.clone(),
                ));
                let sweeper = sweep_interval
                    .filter(|period| !period.is_zero())
                    .map(|period| tokio::spawn(Self::run_sweep_loop(store.clone(), period)));
                (Some(tx), sweeper)
            }
            None => (None, None),
        };

        Self {
            memory,
            persistent,
            persist_tx,
            sweeper,
            epoch: AtomicU64::new(0),
            persistent_hits: AtomicU64::new(0),
            persistent_misses: AtomicU64::new(0),
            dropped_writes,
        }
    }

    /// Creates a manager without a persistent tier.
    #[must_use]
    pub fn memory_only(memory: MemoryTier) -> Self {
        Self::new(memory, None, None)
    }

    async fn run_persist_loop(
        store: Arc<PersistentStore>,
        mut rx: mpsc::UnboundedReceiver<PersistCommand>,
        dropped_writes: Arc<AtomicU64>,
    ) {
        while let Some(command) = rx.recv().await {
            match command {
                PersistCommand::Write(record) => {
                    if let Err(e) = store.set(&record).await {
                        dropped_writes.fetch_add(1, Ordering::Relaxed);
                        warn!(key = %record.key, error = %e, "Dropped persistent write");
                    }
                }
                PersistCommand::Remove { key, done } => {
                    if let Err(e) = store.remove(&key).await {
                        warn!(key = %key, error = %e, "Failed to remove persistent entry");
                    }
                    let _ = done.send(());
                }
                PersistCommand::Clear { done } => {
                    if let Err(e) = store.clear().await {
                        warn!(error = %e, "Failed to clear persistent tier");
                    }
                    let _ = done.send(());
                }
                PersistCommand::Flush { done } => {
                    let _ = done.send(());
                }
            }
        }
        debug!("Persistent writer stopped");
    }

    async fn run_sweep_loop(store: Arc<PersistentStore>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            store.sweep_expired().await;
        }
    }

    /// Looks a key up in memory, then in the persistent tier.
    ///
    /// Persistent hits are promoted into memory before returning.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheHit> {
        if let Some(record) = self.memory.get(key) {
            return Some(CacheHit {
                record,
                tier: CacheTier::Memory,
            });
        }

        let persistent = self.persistent.as_ref()?;
        let epoch = self.epoch.load(Ordering::SeqCst);

        let Some(record) = persistent.get(key).await else {
            self.persistent_misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        self.persistent_hits.fetch_add(1, Ordering::Relaxed);

        if self.epoch.load(Ordering::SeqCst) == epoch {
            match self.memory.set(record.clone()) {
                Ok(()) => trace!(key = %key, "Promoted persistent hit into memory"),
                Err(e) => debug!(key = %key, error = %e, "Skipped promotion"),
            }
        }

        Some(CacheHit {
            record,
            tier: CacheTier::Persistent,
        })
    }

    /// Stores a record in memory now and queues the persistent write.
    ///
    /// # Errors
    /// Returns `CacheError::CapacityExceeded` if the memory tier rejects the
    /// record. The persistent write is queued either way and its failures
    /// are only logged.
    pub fn save(&self, record: CacheRecord) -> Result<(), CacheError> {
        let memory_result = self.memory.set(record.clone());

        if let Some(tx) = &self.persist_tx
            && tx.send(PersistCommand::Write(record)).is_err()
        {
            warn!("Persistent writer is gone, write dropped");
            self.dropped_writes.fetch_add(1, Ordering::Relaxed);
        }

        memory_result
    }

    /// Removes a key from both tiers. Idempotent.
    ///
    /// Returns once the persistent removal has been applied, so a write
    /// queued earlier cannot bring the key back.
    pub async fn invalidate(&self, key: &CacheKey) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.memory.delete(key);

        if let Some(tx) = &self.persist_tx {
            let (done, wait) = oneshot::channel();
            if tx
                .send(PersistCommand::Remove {
                    key: key.clone(),
                    done,
                })
                .is_ok()
            {
                let _ = wait.await;
            }
        }
        debug!(key = %key, "Invalidated cache entry");
    }

    /// Empties both tiers.
    pub async fn clear_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.memory.clear();

        if let Some(tx) = &self.persist_tx {
            let (done, wait) = oneshot::channel();
            if tx.send(PersistCommand::Clear { done }).is_ok() {
                let _ = wait.await;
            }
        }
        info!("Cleared all cache tiers");
    }

    /// Waits until every queued persistent write has been applied.
    pub async fn flush(&self) {
        if let Some(tx) = &self.persist_tx {
            let (done, wait) = oneshot::channel();
            if tx.send(PersistCommand::Flush { done }).is_ok() {
                let _ = wait.await;
            }
        }
    }

    /// Returns a memory-resident record without touching it.
    pub fn peek_memory(&self, key: &CacheKey) -> Option<CacheRecord> {
        self.memory.peek(key)
    }

    /// Returns true if either tier holds the key.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.memory.contains(key) || self.persistent.as_ref().is_some_and(|p| p.contains(key))
    }

    /// Runs a TTL sweep over the persistent tier now.
    pub async fn sweep_expired(&self) -> usize {
        match &self.persistent {
            Some(store) => store.sweep_expired().await,
            None => 0,
        }
    }

    /// Returns true if a persistent tier is configured.
    #[must_use]
    pub const fn has_persistent_tier(&self) -> bool {
        self.persistent.is_some()
    }

    /// Returns cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_items: self.memory.len(),
            memory_bytes: self.memory.occupied_bytes(),
            memory_ceiling_bytes: self.memory.max_bytes(),
            memory_hits: self.memory.hits(),
            memory_misses: self.memory.misses(),
            memory_evictions: self.memory.evictions(),
            persistent_items: self.persistent.as_ref().map_or(0, |p| p.len()),
            persistent_bytes: self.persistent.as_ref().map_or(0, |p| p.occupied_bytes()),
            persistent_hits: self.persistent_hits.load(Ordering::Relaxed),
            persistent_misses: self.persistent_misses.load(Ordering::Relaxed),
            dropped_writes: self.dropped_writes.load(Ordering::Relaxed),
        }
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("memory", &self.memory)
            .field("persistent", &self.persistent)
            .finish_non_exhaustive()
    }
}

/// Statistics about cache occupancy and performance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Records in memory.
    pub memory_items: usize,
    /// Bytes in memory.
    pub memory_bytes: u64,
    /// Memory byte ceiling.
    pub memory_ceiling_bytes: u64,
    /// Memory hits.
    pub memory_hits: u64,
    /// Memory misses.
    pub memory_misses: u64,
    /// Records evicted from memory for capacity.
    pub memory_evictions: u64,
    /// Records in the persistent tier.
    pub persistent_items: usize,
    /// Bytes in the persistent tier.
    pub persistent_bytes: u64,
    /// Persistent hits.
    pub persistent_hits: u64,
    /// Persistent misses.
    pub persistent_misses: u64,
    /// Persistent writes that failed and were dropped.
    pub dropped_writes: u64,
}

impl CacheStats {
    /// Hit rate across both tiers as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.persistent_hits;
        let total = self.memory_hits + self.memory_misses;
        if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Memory: {} images, {}/{} bytes | Persistent: {} images, {} bytes | {:.1}% hit rate",
            self.memory_items,
            self.memory_bytes,
            self.memory_ceiling_bytes,
            self.persistent_items,
            self.persistent_bytes,
            self.hit_rate()
        )
    }
}
