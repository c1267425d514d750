//! Upstream image fetch port.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::errors::LoadError;

/// Bytes returned by a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    /// Encoded image payload.
    pub bytes: Bytes,
    /// Content type of the payload.
    pub content_type: String,
}

impl FetchedImage {
    /// Creates a fetched payload.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }
}

/// Port for retrieving image bytes from their source.
///
/// Every failure is reported as a `LoadError`; implementations map network
/// and content problems to `TransientFetch` so the retry layer can act on
/// them.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches the payload behind `locator`.
    async fn fetch(&self, locator: &str) -> Result<FetchedImage, LoadError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{HashSet, VecDeque};
    use std::io::Cursor;
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::time::Instant;

    /// Encodes a small PNG for use as a fetch result.
    pub fn sample_png() -> Bytes {
        let img = image::DynamicImage::new_rgb8(4, 3);
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png)
            .expect("encode sample png");
        Bytes::from(out.into_inner())
    }

    #[derive(Default)]
    struct State {
        calls: Vec<(String, Instant)>,
        script: VecDeque<Result<FetchedImage, LoadError>>,
        failing: HashSet<String>,
    }

    /// Scriptable fetcher that records every call.
    pub struct MockFetcher {
        state: Mutex<State>,
        always_fail: bool,
        latency: Option<Duration>,
    }

    impl MockFetcher {
        /// Creates a fetcher that returns `sample_png()` for every locator.
        pub fn new() -> Self {
            Self {
                state: Mutex::new(State::default()),
                always_fail: false,
                latency: None,
            }
        }

        /// Creates a fetcher whose every call fails transiently.
        pub fn failing() -> Self {
            Self {
                always_fail: true,
                ..Self::new()
            }
        }

        /// Delays every response.
        #[must_use]
        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = Some(latency);
            self
        }

        /// Makes every call for `locator` fail transiently.
        #[must_use]
        pub fn fail_for(self, locator: &str) -> Self {
            self.state.lock().failing.insert(locator.to_string());
            self
        }

        /// Queues a result returned by the next unscripted call.
        pub fn push_result(&self, result: Result<FetchedImage, LoadError>) {
            self.state.lock().script.push_back(result);
        }

        /// Total number of fetches.
        pub fn call_count(&self) -> usize {
            self.state.lock().calls.len()
        }

        /// Number of fetches for one locator.
        pub fn calls_for(&self, locator: &str) -> usize {
            self.state
                .lock()
                .calls
                .iter()
                .filter(|(l, _)| l == locator)
                .count()
        }

        /// Instants at which fetches started.
        pub fn call_times(&self) -> Vec<Instant> {
            self.state.lock().calls.iter().map(|(_, t)| *t).collect()
        }

        /// Locators in call order.
        pub fn called_locators(&self) -> Vec<String> {
            self.state
                .lock()
                .calls
                .iter()
                .map(|(l, _)| l.clone())
                .collect()
        }
    }

    impl Default for MockFetcher {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl Fetcher for MockFetcher {
        async fn fetch(&self, locator: &str) -> Result<FetchedImage, LoadError> {
            let outcome = {
                let mut state = self.state.lock();
                state.calls.push((locator.to_string(), Instant::now()));
                if self.always_fail || state.failing.contains(locator) {
                    Some(Err(LoadError::transient(format!("mock failure for {locator}"))))
                } else {
                    state.script.pop_front()
                }
            };

            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }

            outcome.unwrap_or_else(|| Ok(FetchedImage::new(sample_png(), "image/png")))
        }
    }
}
