//! Application layer with the loader facade and DTOs.

/// Data transfer objects.
pub mod dto;
/// Application services.
pub mod services;

pub use dto::LoaderStats;
pub use services::{ImageLoader, ImageLoaderBuilder};
