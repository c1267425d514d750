//! Data transfer objects for the application layer.

mod stats;

pub use stats::LoaderStats;
