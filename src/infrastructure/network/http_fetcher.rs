//! reqwest-backed `Fetcher`, with local handling of `data:` and `file:`.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use tracing::{debug, trace};
use url::Url;

use super::inspect::{rejects_image, resolve_content_type};
use crate::domain::errors::{InitError, LoadError};
use crate::domain::ports::{FetchedImage, Fetcher};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetches images over HTTP(S), from `data:` URLs and from local files.
pub struct HttpFetcher {
    client: reqwest::Client,
    probe_with_head: bool,
}

impl HttpFetcher {
    /// Creates a fetcher.
    ///
    /// With `probe_with_head`, a HEAD request checks the content type before
    /// the body is downloaded.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(timeout: Duration, probe_with_head: bool) -> Result<Self, InitError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(format!("{}/{}", crate::NAME, crate::VERSION))
            .build()
            .map_err(|e| InitError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            probe_with_head,
        })
    }

    async fn probe(&self, url: &str) -> Result<(), LoadError> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| LoadError::transient(format!("HEAD request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(LoadError::transient(format!(
                "HEAD {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        if rejects_image(content_type) {
            return Err(LoadError::transient(format!(
                "probe reported non-image content type `{}`",
                content_type.unwrap_or_default()
            )));
        }
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<FetchedImage, LoadError> {
        if self.probe_with_head {
            self.probe(url).await?;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| LoadError::transient(format!("Request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(LoadError::transient(format!(
                "HTTP {}: {}",
                response.status(),
                response.status().canonical_reason().unwrap_or("Unknown")
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let bytes = response
            .bytes()
            .await
            .map_err(|e| LoadError::transient(format!("Failed to read body: {e}")))?;

        let content_type = resolve_content_type(content_type.as_deref(), &bytes)?;
        debug!(url = %url, size = bytes.len(), content_type = %content_type, "Downloaded image");
        Ok(FetchedImage::new(bytes, content_type))
    }

    async fn read_file(url: &Url) -> Result<FetchedImage, LoadError> {
        let path = url
            .to_file_path()
            .map_err(|()| LoadError::invalid_locator(url.as_str(), "not a local file path"))?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| LoadError::transient(format!("Failed to read {}: {e}", path.display())))?;
        let content_type = resolve_content_type(None, &bytes)?;
        trace!(path = %path.display(), "Read image from file");
        Ok(FetchedImage::new(bytes, content_type))
    }
}

/// Decodes a `data:` locator.
///
/// # Errors
/// Returns `InvalidLocator` for malformed URLs and `TransientFetch` if the
/// payload is not an image.
pub fn decode_data_url(locator: &str) -> Result<FetchedImage, LoadError> {
    let rest = locator
        .strip_prefix("data:")
        .ok_or_else(|| LoadError::invalid_locator(locator, "not a data URL"))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| LoadError::invalid_locator(locator, "missing payload separator"))?;

    let (media_type, is_base64) = match meta.strip_suffix(";base64") {
        Some(media_type) => (media_type, true),
        None => (meta, false),
    };

    let bytes = if is_base64 {
        STANDARD
            .decode(payload.trim())
            .map(Bytes::from)
            .map_err(|e| LoadError::invalid_locator(locator, format!("invalid base64: {e}")))?
    } else {
        Bytes::copy_from_slice(payload.as_bytes())
    };

    let header = (!media_type.is_empty()).then_some(media_type);
    let content_type = resolve_content_type(header, &bytes)?;
    Ok(FetchedImage::new(bytes, content_type))
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<FetchedImage, LoadError> {
        if locator.starts_with("data:") {
            return decode_data_url(locator);
        }

        let url = Url::parse(locator).map_err(|e| LoadError::invalid_locator(locator, e.to_string()))?;
        match url.scheme() {
            "http" | "https" => self.download(url.as_str()).await,
            "file" => Self::read_file(&url).await,
            other => Err(LoadError::invalid_locator(
                locator,
                format!("unsupported scheme `{other}`"),
            )),
        }
    }
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("probe_with_head", &self.probe_with_head)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::sample_png;

    fn png_data_url() -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(sample_png()))
    }

    #[test]
    fn test_decode_base64_data_url() {
        let fetched = decode_data_url(&png_data_url()).unwrap();
        assert_eq!(fetched.content_type, "image/png");
        assert_eq!(fetched.bytes, sample_png());
    }

    #[test]
    fn test_data_url_without_media_type_is_sniffed() {
        let locator = format!("data:;base64,{}", STANDARD.encode(sample_png()));
        assert_eq!(decode_data_url(&locator).unwrap().content_type, "image/png");
    }

    #[test]
    fn test_malformed_data_urls() {
        assert!(matches!(
            decode_data_url("data:image/png;base64"),
            Err(LoadError::InvalidLocator { .. })
        ));
        assert!(matches!(
            decode_data_url("data:image/png;base64,@@@"),
            Err(LoadError::InvalidLocator { .. })
        ));
    }

    #[test]
    fn test_non_image_data_url_is_transient() {
        let err = decode_data_url("data:text/plain,hello").unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_data_url() {
        let fetcher = HttpFetcher::new(DEFAULT_TIMEOUT, false).unwrap();
        let fetched = fetcher.fetch(&png_data_url()).await.unwrap();
        assert_eq!(fetched.content_type, "image/png");
    }

    #[tokio::test]
    async fn test_fetch_local_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("pic.png");
        std::fs::write(&path, sample_png()).unwrap();
        let locator = Url::from_file_path(&path).unwrap().to_string();

        let fetcher = HttpFetcher::new(DEFAULT_TIMEOUT, false).unwrap();
        let fetched = fetcher.fetch(&locator).await.unwrap();

        assert_eq!(fetched.bytes, sample_png());
        assert_eq!(fetched.content_type, "image/png");
    }

    #[tokio::test]
    async fn test_missing_local_file_is_transient() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let locator = Url::from_file_path(temp_dir.path().join("gone.png"))
            .unwrap()
            .to_string();

        let fetcher = HttpFetcher::new(DEFAULT_TIMEOUT, false).unwrap();
        let err = fetcher.fetch(&locator).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let fetcher = HttpFetcher::new(DEFAULT_TIMEOUT, true).unwrap();
        let err = fetcher.fetch("ftp://example.com/a.png").await.unwrap_err();
        assert!(matches!(err, LoadError::InvalidLocator { .. }));
    }
}
