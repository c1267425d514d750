//! Domain entity definitions.

mod cache_key;
mod cache_record;
mod image;
mod preload;

pub use cache_key::{CacheKey, ImageFormat, TransformOptions, normalize_locator};
pub use cache_record::CacheRecord;
pub use image::{ImageSource, ImageStatus, LoadedImage};
pub use preload::{PreloadPriority, PreloadTask};
