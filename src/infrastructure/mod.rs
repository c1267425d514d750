//! Infrastructure layer with cache tiers and external service adapters.

/// Memory and persistent cache tiers.
pub mod cache;
/// Application configuration.
pub mod config;
/// Upstream fetch adapters.
pub mod network;
/// Cache, retry and write-back path for a single image.
pub mod pipeline;
/// Background preloading.
pub mod preload;
/// Retry and backoff.
pub mod retry;
/// Durable storage adapters.
pub mod storage;
/// Viewport visibility tracking.
pub mod visibility;

pub use cache::{CacheManager, CacheStats, EvictionPolicy, MemoryTier, PersistentStore};
pub use config::{AppConfig, CliArgs, ConfigStore, EngineConfig, LogLevel};
pub use network::HttpFetcher;
pub use pipeline::LoadPipeline;
pub use preload::{AccessPredictor, PreloadEvent, PreloadScheduler};
pub use retry::{RetryHandler, RetryPolicy};
pub use storage::DiskStore;
pub use visibility::{Rect, ViewportObserver};
