//! Usage-frequency predictor for speculative preloads.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::domain::entities::{TransformOptions, normalize_locator};

/// Default number of accesses after which a locator becomes a prediction.
pub const DEFAULT_LEARNING_THRESHOLD: u32 = 3;

/// Default number of distinct locators whose accesses are counted.
pub const DEFAULT_TRACKED_LOCATORS: usize = 4096;

/// An image worth preloading alongside another one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelatedImage {
    /// Locator to preload.
    pub locator: String,
    /// Variant to preload.
    pub options: TransformOptions,
}

impl RelatedImage {
    /// Creates a related image entry.
    #[must_use]
    pub fn new(locator: impl Into<String>, options: TransformOptions) -> Self {
        Self {
            locator: locator.into(),
            options,
        }
    }
}

/// A locator accessed often enough to be predicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    /// The locator.
    pub locator: String,
    /// Accesses observed so far.
    pub accesses: u32,
}

struct PredictorState {
    counts: LruCache<String, u32>,
    related: HashMap<String, Vec<RelatedImage>>,
}

/// Counts accesses per locator and tracks which images travel together.
pub struct AccessPredictor {
    threshold: u32,
    state: Mutex<PredictorState>,
}

impl AccessPredictor {
    /// Creates a predictor; a zero threshold is treated as one.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self::with_capacity(threshold, DEFAULT_TRACKED_LOCATORS)
    }

    /// Creates a predictor that counts at most `capacity` locators,
    /// forgetting the least recently accessed one beyond that.
    #[must_use]
    pub fn with_capacity(threshold: u32, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            threshold: threshold.max(1),
            state: Mutex::new(PredictorState {
                counts: LruCache::new(capacity),
                related: HashMap::new(),
            }),
        }
    }

    fn canonical(locator: &str) -> String {
        normalize_locator(locator).unwrap_or_else(|_| locator.trim().to_string())
    }

    /// Records one access.
    ///
    /// Returns the related images to preload once the locator has reached
    /// the learning threshold.
    pub fn record(&self, locator: &str) -> Vec<RelatedImage> {
        let locator = Self::canonical(locator);
        let mut state = self.state.lock();
        let count = state.counts.get_or_insert_mut(locator.clone(), || 0);
        *count = count.saturating_add(1);
        let count = *count;

        if count < self.threshold {
            return Vec::new();
        }
        if count == self.threshold {
            debug!(locator = %locator, accesses = count, "Locator became a prediction");
        }
        state.related.get(&locator).cloned().unwrap_or_default()
    }

    /// Registers images that tend to be needed after `locator`.
    pub fn relate(&self, locator: &str, related: impl IntoIterator<Item = RelatedImage>) {
        let locator = Self::canonical(locator);
        let mut state = self.state.lock();
        let entries = state.related.entry(locator).or_default();
        for image in related {
            if !entries.contains(&image) {
                entries.push(image);
            }
        }
    }

    /// Images registered as related to `locator`.
    pub fn related(&self, locator: &str) -> Vec<RelatedImage> {
        let locator = Self::canonical(locator);
        self.state
            .lock()
            .related
            .get(&locator)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns true once the locator reached the threshold.
    pub fn is_predicted(&self, locator: &str) -> bool {
        self.count(locator) >= self.threshold
    }

    /// Accesses recorded for a locator.
    pub fn count(&self, locator: &str) -> u32 {
        let locator = Self::canonical(locator);
        self.state.lock().counts.peek(&locator).copied().unwrap_or(0)
    }

    /// Current predictions, most accessed first.
    pub fn predictions(&self) -> Vec<Prediction> {
        let state = self.state.lock();
        let mut predictions: Vec<Prediction> = state
            .counts
            .iter()
            .filter(|(_, count)| **count >= self.threshold)
            .map(|(locator, count)| Prediction {
                locator: locator.clone(),
                accesses: *count,
            })
            .collect();
        predictions.sort_by(|a, b| {
            b.accesses
                .cmp(&a.accesses)
                .then_with(|| a.locator.cmp(&b.locator))
        });
        predictions
    }

    /// Learning threshold in use.
    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }
}

impl std::fmt::Debug for AccessPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessPredictor")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GALLERY: &str = "https://example.com/gallery/1.png";

    #[test]
    fn test_prediction_after_threshold() {
        let predictor = AccessPredictor::new(3);
        predictor.relate(
            GALLERY,
            [RelatedImage::new("https://example.com/gallery/2.png", TransformOptions::new())],
        );

        assert!(predictor.record(GALLERY).is_empty());
        assert!(predictor.record(GALLERY).is_empty());
        let related = predictor.record(GALLERY);

        assert_eq!(related.len(), 1);
        assert_eq!(related[0].locator, "https://example.com/gallery/2.png");
        assert!(predictor.is_predicted(GALLERY));
    }

    #[test]
    fn test_equivalent_spellings_share_a_counter() {
        let predictor = AccessPredictor::new(2);
        predictor.record("https://EXAMPLE.com/gallery/1.png");
        predictor.record("https://example.com/gallery/1.png#top");

        assert_eq!(predictor.count(GALLERY), 2);
        assert!(predictor.is_predicted(GALLERY));
    }

    #[test]
    fn test_predictions_sorted_by_accesses() {
        let predictor = AccessPredictor::new(2);
        for _ in 0..4 {
            predictor.record("https://example.com/a.png");
        }
        for _ in 0..2 {
            predictor.record("https://example.com/b.png");
        }
        predictor.record("https://example.com/c.png");

        let predictions = predictor.predictions();
        assert_eq!(
            predictions,
            vec![
                Prediction {
                    locator: "https://example.com/a.png".to_string(),
                    accesses: 4
                },
                Prediction {
                    locator: "https://example.com/b.png".to_string(),
                    accesses: 2
                },
            ]
        );
    }

    #[test]
    fn test_relate_deduplicates() {
        let predictor = AccessPredictor::new(1);
        let image = RelatedImage::new("https://example.com/2.png", TransformOptions::new());
        predictor.relate(GALLERY, [image.clone()]);
        predictor.relate(GALLERY, [image]);

        assert_eq!(predictor.related(GALLERY).len(), 1);
    }

    #[test]
    fn test_counters_are_bounded() {
        let predictor = AccessPredictor::with_capacity(2, 2);
        predictor.record("https://example.com/a.png");
        predictor.record("https://example.com/b.png");
        predictor.record("https://example.com/a.png");
        predictor.record("https://example.com/c.png");

        assert_eq!(predictor.count("https://example.com/b.png"), 0);
        assert_eq!(predictor.count("https://example.com/a.png"), 2);
        assert_eq!(predictor.count("https://example.com/c.png"), 1);
        assert_eq!(predictor.predictions().len(), 1);
    }

    #[test]
    fn test_zero_threshold_is_one() {
        let predictor = AccessPredictor::new(0);
        assert_eq!(predictor.threshold(), 1);
        assert!(!predictor.is_predicted(GALLERY));
    }
}
