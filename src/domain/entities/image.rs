//! Loaded image handle and load status types.

use std::io::Cursor;

use bytes::Bytes;

use super::cache_key::CacheKey;
use super::cache_record::CacheRecord;

/// Where a loaded image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Served from the in-memory tier.
    MemoryCache,
    /// Served from the persistent tier.
    PersistentCache,
    /// Fetched from the network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::MemoryCache => "memory",
            Self::PersistentCache => "persistent",
            Self::Network => "network",
        };
        f.write_str(label)
    }
}

/// Status of an image as seen by a consumer rendering placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageStatus {
    /// Not cached and no load running.
    #[default]
    NotStarted,
    /// A fetch is in flight.
    Loading,
    /// Cached and ready for display.
    Ready,
    /// Retries exhausted; blocked until reset.
    PermanentlyFailed,
}

impl ImageStatus {
    /// Returns true if the image is ready for rendering.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns true if the image is currently being loaded.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// Returns true if loading failed for good.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::PermanentlyFailed)
    }
}

/// A ready-to-use image returned by `load`.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Key the image is cached under.
    pub key: CacheKey,
    /// Locator the bytes came from.
    pub locator: String,
    /// Encoded image bytes.
    pub data: Bytes,
    /// Content type of `data`.
    pub content_type: String,
    /// Where the bytes were served from.
    pub source: ImageSource,
    /// True when the configured fallback was served instead.
    pub is_fallback: bool,
}

impl LoadedImage {
    /// Builds a handle from a cache record.
    #[must_use]
    pub fn from_record(record: &CacheRecord, source: ImageSource, is_fallback: bool) -> Self {
        Self {
            key: record.key.clone(),
            locator: record.source_locator.clone(),
            data: record.data().clone(),
            content_type: record.content_format.clone(),
            source,
            is_fallback,
        }
    }

    /// Returns the payload size in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// Reads pixel dimensions from the image header without decoding.
    #[must_use]
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        image::ImageReader::new(Cursor::new(self.data.as_ref()))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::TransformOptions;

    fn png_bytes(width: u32, height: u32) -> Bytes {
        let img = image::DynamicImage::new_rgb8(width, height);
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        Bytes::from(out.into_inner())
    }

    #[test]
    fn test_dimensions_from_header() {
        let key = CacheKey::derive("https://example.com/a.png", &TransformOptions::new()).unwrap();
        let record = CacheRecord::new(key, png_bytes(12, 7), "https://example.com/a.png", "image/png");
        let loaded = LoadedImage::from_record(&record, ImageSource::Network, false);

        assert_eq!(loaded.dimensions(), Some((12, 7)));
        assert_eq!(loaded.source, ImageSource::Network);
    }

    #[test]
    fn test_dimensions_of_garbage_is_none() {
        let key = CacheKey::from_raw("k");
        let record = CacheRecord::new(key, Bytes::from_static(b"nope"), "x", "image/png");
        let loaded = LoadedImage::from_record(&record, ImageSource::MemoryCache, false);
        assert_eq!(loaded.dimensions(), None);
    }

    #[test]
    fn test_status_predicates() {
        assert!(ImageStatus::Ready.is_ready());
        assert!(ImageStatus::Loading.is_loading());
        assert!(ImageStatus::PermanentlyFailed.is_failed());
        assert_eq!(ImageStatus::default(), ImageStatus::NotStarted);
    }
}
