//! Cache tier and storage medium error types.

use thiserror::Error;

/// Storage medium error variants.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum StoreError {
    #[error("storage medium unavailable: {0}")]
    Unavailable(String),

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("corrupted entry `{key}`: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Creates corrupted entry error.
    #[must_use]
    pub fn corrupted(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Returns whether the stored bytes themselves are unusable.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Corrupted { .. } | Self::Serialization(_))
    }
}

/// Cache tier error variants.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum CacheError {
    #[error("record of {size} bytes exceeds tier ceiling of {ceiling} bytes")]
    CapacityExceeded { size: u64, ceiling: u64 },

    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl CacheError {
    /// Returns whether the record was rejected for its size alone.
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}
