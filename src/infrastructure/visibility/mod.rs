//! Geometric visibility tracking.

mod viewport;

pub use viewport::{Rect, ViewportObserver};
