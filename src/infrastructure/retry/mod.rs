//! Retry and backoff for upstream fetches.

mod handler;
mod policy;

pub use handler::{RetryHandler, RetryState};
pub use policy::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, RetryPolicy};
