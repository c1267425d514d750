//! Cached image payload with its access bookkeeping.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cache_key::CacheKey;
use crate::domain::serde_utils::base64_bytes;

/// One cached image variant.
///
/// The same shape lives in the memory tier and, serialized, in the
/// persistent tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Key this record is stored under.
    pub key: CacheKey,
    #[serde(with = "base64_bytes")]
    data: Bytes,
    /// When the payload was first fetched.
    pub created_at: DateTime<Utc>,
    /// Last read hit.
    pub last_accessed_at: DateTime<Utc>,
    /// Number of read hits.
    pub access_count: u64,
    size_bytes: u64,
    /// Locator the payload was fetched from.
    pub source_locator: String,
    /// Content type reported or sniffed at fetch time.
    pub content_format: String,
}

impl CacheRecord {
    /// Creates a freshly fetched record.
    #[must_use]
    pub fn new(
        key: CacheKey,
        data: Bytes,
        source_locator: impl Into<String>,
        content_format: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let size_bytes = data.len() as u64;
        Self {
            key,
            data,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            size_bytes,
            source_locator: source_locator.into(),
            content_format: content_format.into(),
        }
    }

    /// Overrides the creation time.
    #[must_use]
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self.last_accessed_at = created_at;
        self
    }

    /// Returns the payload.
    #[must_use]
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Returns the recorded payload size.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Records a read hit now.
    pub fn touch(&mut self) {
        self.touch_at(Utc::now());
    }

    /// Records a read hit at the given instant.
    pub fn touch_at(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = now;
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Returns false if the stored size disagrees with the payload.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.size_bytes == self.data.len() as u64
    }

    /// Returns true once the record is older than `ttl`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        now.signed_duration_since(self.created_at) > ttl
    }

    /// Seconds since the last read hit, never negative.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn idle_secs(&self, now: DateTime<Utc>) -> f64 {
        let idle = now.signed_duration_since(self.last_accessed_at);
        (idle.num_milliseconds().max(0) as f64) / 1000.0
    }
}
