//! imgwarm - client-side image cache and preload engine.
//!
//! Images are served from a memory tier over a persistent tier, fetched
//! with bounded retries when missing, and warmed in the background by a
//! priority-ordered preload scheduler driven by viewport visibility and
//! learned access patterns.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Application layer containing the loader facade and DTOs.
pub mod application;
/// Domain layer containing entities, errors, and port definitions.
pub mod domain;
/// Infrastructure layer containing cache tiers and adapters.
pub mod infrastructure;

/// Current version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name, used in the HTTP user agent.
pub const NAME: &str = "imgwarm";
