//! Image loader facade.
//!
//! One `ImageLoader` is built by the composition root and shared by every
//! consumer. It ties together the cache tiers, the guarded fetch path, the
//! preload scheduler, the access predictor and visibility tracking.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::dto::LoaderStats;
use crate::domain::entities::{
    CacheKey, ImageStatus, LoadedImage, PreloadPriority, PreloadTask, TransformOptions,
    normalize_locator,
};
use crate::domain::errors::{InitError, LoadError};
use crate::domain::ports::{
    DurableStore, ElementId, Fetcher, VisibilityEvent, VisibilityObserver,
};
use crate::infrastructure::cache::{CacheManager, MemoryTier, PersistentStore};
use crate::infrastructure::config::EngineConfig;
use crate::infrastructure::network::HttpFetcher;
use crate::infrastructure::pipeline::LoadPipeline;
use crate::infrastructure::preload::{
    AccessPredictor, PreloadEvent, PreloadScheduler, Prediction, RelatedImage,
};
use crate::infrastructure::retry::RetryHandler;
use crate::infrastructure::storage::{DEFAULT_DISK_QUOTA, DiskStore, default_cache_dir};

/// Assembles an [`ImageLoader`] from configuration and optional adapters.
pub struct ImageLoaderBuilder {
    config: EngineConfig,
    fetcher: Option<Arc<dyn Fetcher>>,
    store: Option<Arc<dyn DurableStore>>,
    observer: Option<(
        Arc<dyn VisibilityObserver>,
        mpsc::UnboundedReceiver<VisibilityEvent>,
    )>,
    preload_events: Option<mpsc::UnboundedSender<PreloadEvent>>,
}

impl ImageLoaderBuilder {
    /// Starts a builder. Without further calls the loader fetches over HTTP
    /// and keeps images in memory only.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            fetcher: None,
            store: None,
            observer: None,
            preload_events: None,
        }
    }

    /// Uses a custom fetcher.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Backs the persistent tier with a durable store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Enables visibility-driven preloading.
    ///
    /// `events` must receive the transitions reported by `observer`.
    #[must_use]
    pub fn with_observer(
        mut self,
        observer: Arc<dyn VisibilityObserver>,
        events: mpsc::UnboundedReceiver<VisibilityEvent>,
    ) -> Self {
        self.observer = Some((observer, events));
        self
    }

    /// Reports every finished preload on `events`.
    #[must_use]
    pub fn with_preload_events(mut self, events: mpsc::UnboundedSender<PreloadEvent>) -> Self {
        self.preload_events = Some(events);
        self
    }

    /// Builds the loader. Must be called inside a tokio runtime.
    ///
    /// # Errors
    /// Returns `InitError` if the configuration is invalid, the persistent
    /// store cannot be opened or the HTTP client cannot be built.
    pub async fn build(self) -> Result<ImageLoader, InitError> {
        let config = self.config;
        config.validate()?;

        let memory = MemoryTier::new(
            config.cache.memory_ceiling_bytes,
            config.cache.memory_ceiling_items,
            config.cache.eviction_policy,
        )?;
        let persistent = match self.store {
            Some(store) => Some(Arc::new(
                PersistentStore::open(store, config.cache.persistent_limits()).await?,
            )),
            None => None,
        };
        let cache = CacheManager::new(memory, persistent, config.cache.sweep_interval());

        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(
                config.network.timeout(),
                config.network.probe_with_head,
            )?),
        };
        let retry = RetryHandler::new(fetcher, config.retry.policy());

        let pipeline = Arc::new(LoadPipeline::new(
            cache,
            retry,
            config.network.transform_hosts.clone(),
            config.network.fallback_locator.clone(),
        ));
        let scheduler = PreloadScheduler::spawn(
            pipeline.clone(),
            config.preload.concurrency,
            self.preload_events,
        );
        let predictor = config
            .preload
            .prediction_enabled
            .then(|| AccessPredictor::new(config.preload.learning_threshold));

        let (observer, visibility_rx) = match self.observer {
            Some((observer, rx)) => (Some(observer), Some(rx)),
            None => (None, None),
        };

        let shared = Arc::new(LoaderShared {
            pipeline,
            scheduler,
            predictor,
            observer,
            observed: Mutex::new(HashMap::new()),
            preload_distance: config.preload.distance_px,
            keep_observing: config.preload.keep_observing,
        });

        let visibility_task = visibility_rx.map(|rx| {
            tokio::spawn(LoaderShared::run_visibility_loop(
                Arc::downgrade(&shared),
                rx,
            ))
        });

        info!(
            memory_ceiling_bytes = config.cache.memory_ceiling_bytes,
            memory_ceiling_items = config.cache.memory_ceiling_items,
            persistent = shared.pipeline.cache().has_persistent_tier(),
            concurrency = config.preload.concurrency,
            "Image loader ready"
        );

        Ok(ImageLoader {
            shared,
            visibility_task,
        })
    }
}

#[derive(Debug, Clone)]
struct ObservedImage {
    locator: String,
    options: TransformOptions,
}

struct LoaderShared {
    pipeline: Arc<LoadPipeline>,
    scheduler: PreloadScheduler,
    predictor: Option<AccessPredictor>,
    observer: Option<Arc<dyn VisibilityObserver>>,
    observed: Mutex<HashMap<ElementId, ObservedImage>>,
    preload_distance: u32,
    keep_observing: bool,
}

impl LoaderShared {
    async fn run_visibility_loop(
        shared: Weak<Self>,
        mut rx: mpsc::UnboundedReceiver<VisibilityEvent>,
    ) {
        while let Some(event) = rx.recv().await {
            let Some(shared) = shared.upgrade() else {
                break;
            };
            shared.handle_visibility(&event);
        }
        debug!("Visibility loop stopped");
    }

    fn handle_visibility(&self, event: &VisibilityEvent) {
        let image = {
            let mut observed = self.observed.lock();
            let Some(image) = observed.get(&event.element).cloned() else {
                return;
            };
            if event.visible && !self.keep_observing {
                observed.remove(&event.element);
            }
            image
        };

        self.record_access(&image.locator);
        if !event.visible {
            return;
        }

        if !self.keep_observing
            && let Some(observer) = &self.observer
        {
            observer.unobserve(&event.element);
        }
        debug!(element = %event.element, locator = %image.locator, "Element near viewport");
        self.enqueue(&image.locator, image.options, PreloadPriority::High);
    }

    fn record_access(&self, locator: &str) {
        let Some(predictor) = &self.predictor else {
            return;
        };
        if normalize_locator(locator).is_err() {
            return;
        }
        for related in predictor.record(locator) {
            self.enqueue(&related.locator, related.options, PreloadPriority::Low);
        }
    }

    fn enqueue(&self, locator: &str, options: TransformOptions, priority: PreloadPriority) {
        match CacheKey::derive(locator, &options) {
            Ok(key) => self
                .scheduler
                .enqueue(PreloadTask::new(locator, options, key, priority)),
            Err(e) => debug!(locator = %locator, error = %e, "Ignoring preload request"),
        }
    }
}

/// Entry point for consumers: loads, preloads and tracks images.
pub struct ImageLoader {
    shared: Arc<LoaderShared>,
    visibility_task: Option<JoinHandle<()>>,
}

impl ImageLoader {
    /// Starts a builder.
    #[must_use]
    pub fn builder(config: EngineConfig) -> ImageLoaderBuilder {
        ImageLoaderBuilder::new(config)
    }

    /// Builds a loader that fetches over HTTP and persists to the cache
    /// directory on disk.
    ///
    /// # Errors
    /// See [`ImageLoaderBuilder::build`].
    pub async fn with_defaults(config: EngineConfig) -> Result<Self, InitError> {
        let root = config
            .cache
            .cache_dir
            .clone()
            .unwrap_or_else(default_cache_dir);
        let quota = DEFAULT_DISK_QUOTA.max(config.cache.persistent_ceiling_bytes);
        let store = DiskStore::new(root, quota).await?;
        ImageLoaderBuilder::new(config)
            .with_store(Arc::new(store))
            .build()
            .await
    }

    /// Loads an image, from cache when possible.
    ///
    /// # Errors
    /// Returns `InvalidLocator` for malformed locators and `PermanentFetch`
    /// once retries (and the fallback image, if configured) are exhausted.
    pub async fn load(
        &self,
        locator: &str,
        options: &TransformOptions,
    ) -> Result<LoadedImage, LoadError> {
        self.load_with_cancel(locator, options, &CancellationToken::new())
            .await
    }

    /// Loads an image and gives up when `cancel` fires.
    ///
    /// # Errors
    /// As [`ImageLoader::load`], plus `Cancelled`.
    pub async fn load_with_cancel(
        &self,
        locator: &str,
        options: &TransformOptions,
        cancel: &CancellationToken,
    ) -> Result<LoadedImage, LoadError> {
        let key = CacheKey::derive(locator, options)?;
        self.shared.record_access(locator);
        self.shared
            .pipeline
            .load_keyed(&key, locator, options, cancel)
            .await
    }

    /// Queues a background load at normal priority.
    pub fn preload(&self, locator: &str, options: TransformOptions) {
        self.preload_with_priority(locator, options, PreloadPriority::Normal);
    }

    /// Queues a background load. Invalid locators are ignored.
    pub fn preload_with_priority(
        &self,
        locator: &str,
        options: TransformOptions,
        priority: PreloadPriority,
    ) {
        self.shared.record_access(locator);
        self.shared.enqueue(locator, options, priority);
    }

    /// Drops a queued preload. A fetch already running is not interrupted.
    pub fn cancel_preload(&self, locator: &str, options: &TransformOptions) {
        if let Ok(key) = CacheKey::derive(locator, options) {
            self.shared.scheduler.remove(&key);
        }
    }

    /// Removes an image from both cache tiers.
    pub async fn invalidate(&self, locator: &str, options: &TransformOptions) {
        if let Ok(key) = CacheKey::derive(locator, options) {
            self.shared.pipeline.cache().invalidate(&key).await;
        }
    }

    /// Empties both cache tiers and the preload queue.
    pub async fn clear_all(&self) {
        self.shared.scheduler.clear();
        self.shared.pipeline.cache().clear_all().await;
    }

    /// Lifts the permanent failure of a locator so it can be fetched again.
    pub fn reset_url(&self, locator: &str, options: &TransformOptions) {
        if let Ok(key) = CacheKey::derive(locator, options) {
            self.shared.pipeline.retry().reset(&key);
        }
    }

    /// Current status of an image.
    pub fn status(&self, locator: &str, options: &TransformOptions) -> ImageStatus {
        CacheKey::derive(locator, options)
            .map_or(ImageStatus::PermanentlyFailed, |key| {
                self.shared.pipeline.status(&key)
            })
    }

    /// Engine statistics.
    pub fn stats(&self) -> LoaderStats {
        let retry = self.shared.pipeline.retry();
        LoaderStats {
            cache: self.shared.pipeline.cache().stats(),
            queue_depth: self.shared.scheduler.queue_depth(),
            active_workers: self.shared.scheduler.active_workers(),
            in_flight: retry.in_flight_count(),
            failed_keys: retry.failed_count(),
        }
    }

    /// Preloads `locator` once `element` comes within the preload distance
    /// of the viewport.
    pub fn observe_element(&self, element: ElementId, locator: &str, options: TransformOptions) {
        let Some(observer) = &self.shared.observer else {
            warn!(element = %element, "No visibility observer configured");
            return;
        };
        self.shared.observed.lock().insert(
            element.clone(),
            ObservedImage {
                locator: locator.to_string(),
                options,
            },
        );
        observer.observe(&element, self.shared.preload_distance);
    }

    /// Stops watching an element.
    pub fn unobserve_element(&self, element: &ElementId) {
        let removed = self.shared.observed.lock().remove(element).is_some();
        if removed && let Some(observer) = &self.shared.observer {
            observer.unobserve(element);
        }
    }

    /// Locators accessed often enough to be predicted, most accessed first.
    pub fn predictions(&self) -> Vec<Prediction> {
        self.shared
            .predictor
            .as_ref()
            .map(AccessPredictor::predictions)
            .unwrap_or_default()
    }

    /// Registers images to preload whenever `locator` is a prediction.
    pub fn relate(&self, locator: &str, related: impl IntoIterator<Item = RelatedImage>) {
        if let Some(predictor) = &self.shared.predictor {
            predictor.relate(locator, related);
        }
    }

    /// Waits until no preload is queued or running.
    pub async fn wait_idle(&self) {
        self.shared.scheduler.wait_idle().await;
    }

    /// Waits until queued persistent writes are applied.
    pub async fn flush(&self) {
        self.shared.pipeline.cache().flush().await;
    }

    /// Removes expired persistent entries now.
    pub async fn sweep_expired(&self) -> usize {
        self.shared.pipeline.cache().sweep_expired().await
    }
}

impl Drop for ImageLoader {
    fn drop(&mut self) {
        if let Some(task) = self.visibility_task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLoader")
            .field("pipeline", &self.shared.pipeline)
            .field("scheduler", &self.shared.scheduler)
            .finish_non_exhaustive()
    }
}
