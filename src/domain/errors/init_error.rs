//! Engine construction error types.

use thiserror::Error;

use super::{ConfigError, StoreError};

/// Errors raised while assembling an image loader.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum InitError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to open persistent store: {0}")]
    Storage(#[from] StoreError),

    #[error("failed to build HTTP client: {0}")]
    Http(String),
}
