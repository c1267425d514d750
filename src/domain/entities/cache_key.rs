//! Cache key derivation from a locator and its transform options.

use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::domain::errors::LoadError;

/// Schemes the engine knows how to fetch.
const SUPPORTED_SCHEMES: [&str; 4] = ["http", "https", "file", "data"];

/// Output format requested from the image host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// WebP.
    Webp,
    /// AVIF.
    Avif,
    /// JPEG.
    Jpeg,
    /// PNG.
    Png,
    /// GIF.
    Gif,
}

impl ImageFormat {
    /// Returns the short name used in keys and query parameters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Webp => "webp",
            Self::Avif => "avif",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Gif => "gif",
        }
    }

    /// Returns the MIME type for this format.
    #[must_use]
    pub const fn mime_type(self) -> &'static str {
        match self {
            Self::Webp => "image/webp",
            Self::Avif => "image/avif",
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ImageFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "webp" => Ok(Self::Webp),
            "avif" => Ok(Self::Avif),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "gif" => Ok(Self::Gif),
            other => Err(format!("unknown image format `{other}`")),
        }
    }
}

/// Size, quality and format variant of an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformOptions {
    /// Target width in pixels.
    pub width: Option<u32>,
    /// Target height in pixels.
    pub height: Option<u32>,
    /// Encoder quality, 1-100.
    pub quality: Option<u8>,
    /// Output format.
    pub format: Option<ImageFormat>,
}

impl TransformOptions {
    /// Creates options requesting the original image.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            width: None,
            height: None,
            quality: None,
            format: None,
        }
    }

    /// Sets the target width.
    #[must_use]
    pub const fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    /// Sets the target height.
    #[must_use]
    pub const fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    /// Sets the quality, clamped to 100.
    #[must_use]
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = Some(quality.min(100));
        self
    }

    /// Sets the output format.
    #[must_use]
    pub const fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Returns true if no transform is requested.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width.is_none()
            && self.height.is_none()
            && self.quality.is_none()
            && self.format.is_none()
    }
}

/// Stable identifier of one cached image variant.
///
/// Derived from the normalized locator and the transform options, so the
/// same request maps to the same key in every process run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for a locator and its transform options.
    ///
    /// # Errors
    /// Returns `LoadError::InvalidLocator` if the locator is empty, cannot be
    /// parsed, or uses an unsupported scheme.
    pub fn derive(locator: &str, options: &TransformOptions) -> Result<Self, LoadError> {
        let normalized = normalize_locator(locator)?;
        Ok(Self::from_canonical(&canonical_form(&normalized, options)))
    }

    /// Wraps a key read back from storage.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    fn from_canonical(canonical: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let digest = hasher.finalize();
        Self(hex::encode(&digest[..16]))
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Normalizes a locator so that equivalent spellings share one key.
///
/// Scheme and host are lower-cased, default ports and the fragment are
/// dropped, and query pairs are sorted. `data:` locators are kept verbatim.
///
/// # Errors
/// Returns `LoadError::InvalidLocator` for malformed or unsupported locators.
pub fn normalize_locator(locator: &str) -> Result<String, LoadError> {
    let trimmed = locator.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid_locator(locator, "empty locator"));
    }

    let mut url =
        Url::parse(trimmed).map_err(|e| LoadError::invalid_locator(locator, e.to_string()))?;

    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(LoadError::invalid_locator(
            locator,
            format!("unsupported scheme `{}`", url.scheme()),
        ));
    }

    if url.scheme() == "data" {
        return Ok(url.into());
    }

    if matches!(url.scheme(), "http" | "https") && url.host_str().is_none_or(str::is_empty) {
        return Err(LoadError::invalid_locator(locator, "missing host"));
    }

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(&pairs);
    }

    Ok(url.into())
}

fn canonical_form(normalized: &str, options: &TransformOptions) -> String {
    format!(
        "{normalized}|w={}|h={}|q={}|f={}",
        render(options.width),
        render(options.height),
        render(options.quality),
        render(options.format),
    )
}

fn render<T: Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}
