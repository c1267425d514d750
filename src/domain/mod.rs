//! Domain layer with core entities, errors and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;
/// Serde utilities.
pub mod serde_utils;

pub use entities::{CacheKey, CacheRecord, LoadedImage, TransformOptions};
pub use errors::LoadError;
pub use ports::{DurableStore, Fetcher, VisibilityObserver};
