//! Persistent key-value medium port.

use async_trait::async_trait;

use crate::domain::entities::CacheKey;
use crate::domain::errors::StoreError;

/// Port for the medium backing the persistent tier.
///
/// Payloads are opaque bytes; the persistent store owns their encoding.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Reads the payload stored under `key`.
    async fn read(&self, key: &CacheKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes a payload, replacing any previous one.
    ///
    /// Returns `StoreError::QuotaExceeded` when the medium is full.
    async fn write(&self, key: &CacheKey, payload: &[u8]) -> Result<(), StoreError>;

    /// Removes a payload. Removing a missing key is not an error.
    async fn remove(&self, key: &CacheKey) -> Result<(), StoreError>;

    /// Lists every stored key.
    async fn keys(&self) -> Result<Vec<CacheKey>, StoreError>;

    /// Removes every payload.
    async fn clear(&self) -> Result<(), StoreError>;
}
