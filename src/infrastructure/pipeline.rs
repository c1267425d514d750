//! Cache lookup, guarded fetch and write-back for one image request.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::entities::{
    CacheKey, CacheRecord, ImageSource, ImageStatus, LoadedImage, TransformOptions,
};
use crate::domain::errors::LoadError;
use crate::infrastructure::cache::{CacheManager, CacheTier};
use crate::infrastructure::network::apply_transform;
use crate::infrastructure::retry::RetryHandler;

/// The path every load and preload takes.
#[derive(Debug)]
pub struct LoadPipeline {
    cache: CacheManager,
    retry: RetryHandler,
    transform_hosts: Vec<String>,
    fallback_locator: Option<String>,
}

impl LoadPipeline {
    /// Creates a pipeline.
    #[must_use]
    pub fn new(
        cache: CacheManager,
        retry: RetryHandler,
        transform_hosts: Vec<String>,
        fallback_locator: Option<String>,
    ) -> Self {
        Self {
            cache,
            retry,
            transform_hosts,
            fallback_locator,
        }
    }

    /// Loads an image, from cache when possible.
    ///
    /// # Errors
    /// Returns `InvalidLocator`, `PermanentFetch` (after the fallback, if
    /// any, also failed) or `Cancelled`.
    pub async fn load(
        &self,
        locator: &str,
        options: &TransformOptions,
        cancel: &CancellationToken,
    ) -> Result<LoadedImage, LoadError> {
        let key = CacheKey::derive(locator, options)?;
        self.load_keyed(&key, locator, options, cancel).await
    }

    /// Loads an image whose key is already derived.
    ///
    /// # Errors
    /// See [`LoadPipeline::load`].
    pub async fn load_keyed(
        &self,
        key: &CacheKey,
        locator: &str,
        options: &TransformOptions,
        cancel: &CancellationToken,
    ) -> Result<LoadedImage, LoadError> {
        match self.load_single(key, locator, options, cancel).await {
            Err(primary) if primary.is_permanent() => {
                self.load_fallback(key, locator, options, cancel, primary)
                    .await
            }
            other => other,
        }
    }

    async fn load_fallback(
        &self,
        key: &CacheKey,
        locator: &str,
        options: &TransformOptions,
        cancel: &CancellationToken,
        primary: LoadError,
    ) -> Result<LoadedImage, LoadError> {
        let Some(fallback) = self.fallback_locator.as_deref() else {
            return Err(primary);
        };
        let fallback_key = match CacheKey::derive(fallback, options) {
            Ok(fallback_key) if fallback_key != *key => fallback_key,
            Ok(_) => return Err(primary),
            Err(e) => {
                warn!(fallback = %fallback, error = %e, "Configured fallback locator is invalid");
                return Err(primary);
            }
        };

        info!(key = %key, locator = %locator, fallback = %fallback, "Serving fallback image");
        match self.load_single(&fallback_key, fallback, options, cancel).await {
            Ok(mut image) => {
                image.is_fallback = true;
                Ok(image)
            }
            Err(LoadError::Cancelled) => Err(LoadError::Cancelled),
            Err(e) => {
                warn!(fallback = %fallback, error = %e, "Fallback image failed too");
                Err(primary)
            }
        }
    }

    async fn load_single(
        &self,
        key: &CacheKey,
        locator: &str,
        options: &TransformOptions,
        cancel: &CancellationToken,
    ) -> Result<LoadedImage, LoadError> {
        if let Some(hit) = self.cache.get(key).await {
            let source = match hit.tier {
                CacheTier::Memory => ImageSource::MemoryCache,
                CacheTier::Persistent => ImageSource::PersistentCache,
            };
            return Ok(LoadedImage::from_record(&hit.record, source, false));
        }

        let fetch_locator = apply_transform(locator, options, &self.transform_hosts);
        debug!(key = %key, url = %fetch_locator, "Fetching image");
        let (fetched, owner) = self
            .retry
            .execute_shared(key, &fetch_locator, cancel)
            .await?;

        let record = CacheRecord::new(key.clone(), fetched.bytes, locator, fetched.content_type);
        let image = LoadedImage::from_record(&record, ImageSource::Network, false);

        // Callers that joined the same fetch leave the write-back to its owner.
        if owner && let Err(e) = self.cache.save(record) {
            debug!(key = %key, error = %e, "Image not kept in memory tier");
        }

        Ok(image)
    }

    /// Returns true if either cache tier holds the key.
    pub fn is_cached(&self, key: &CacheKey) -> bool {
        self.cache.contains(key)
    }

    /// Returns true if a fetch for the key is running.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.retry.is_in_flight(key)
    }

    /// Status for placeholder rendering.
    pub fn status(&self, key: &CacheKey) -> ImageStatus {
        if self.cache.contains(key) {
            ImageStatus::Ready
        } else if self.retry.is_in_flight(key) {
            ImageStatus::Loading
        } else if self.retry.is_permanently_failed(key) {
            ImageStatus::PermanentlyFailed
        } else {
            ImageStatus::NotStarted
        }
    }

    /// The cache manager.
    #[must_use]
    pub const fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// The retry handler.
    #[must_use]
    pub const fn retry(&self) -> &RetryHandler {
        &self.retry
    }
}
