//! Errors surfaced to callers of the image loader.

use thiserror::Error;

/// Load error variants.
///
/// Only these reach a `load` caller; cache and storage failures are absorbed
/// inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum LoadError {
    #[error("invalid locator `{locator}`: {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("fetch failed: {message}")]
    TransientFetch { message: String },

    #[error("giving up on `{locator}` after {attempts} failed attempts")]
    PermanentFetch { locator: String, attempts: u32 },

    #[error("load cancelled")]
    Cancelled,
}

impl LoadError {
    /// Creates invalid locator error.
    #[must_use]
    pub fn invalid_locator(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLocator {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    /// Creates transient fetch error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientFetch {
            message: message.into(),
        }
    }

    /// Creates permanent fetch error.
    #[must_use]
    pub fn permanent(locator: impl Into<String>, attempts: u32) -> Self {
        Self::PermanentFetch {
            locator: locator.into(),
            attempts,
        }
    }

    /// Returns whether another attempt may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientFetch { .. })
    }

    /// Returns whether the retry budget for the locator is exhausted.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::PermanentFetch { .. })
    }

    /// Returns whether the load was cancelled by the caller.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_failures_are_retryable() {
        assert!(LoadError::transient("HTTP 503").is_retryable());
        assert!(!LoadError::invalid_locator("nope", "relative URL").is_retryable());
        assert!(!LoadError::permanent("https://example.com/a.png", 3).is_retryable());
        assert!(!LoadError::Cancelled.is_retryable());
    }

    #[test]
    fn test_display_includes_attempts() {
        let error = LoadError::permanent("https://example.com/a.png", 3);
        assert_eq!(
            error.to_string(),
            "giving up on `https://example.com/a.png` after 3 failed attempts"
        );
    }
}
