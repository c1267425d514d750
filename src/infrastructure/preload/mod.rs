//! Background preloading: queue, worker loop and access predictor.

mod predictor;
mod queue;
mod scheduler;

pub use predictor::{AccessPredictor, DEFAULT_LEARNING_THRESHOLD, Prediction, RelatedImage};
pub use queue::{Enqueued, PreloadQueue};
pub use scheduler::{DEFAULT_PRELOAD_CONCURRENCY, PreloadEvent, PreloadScheduler};
