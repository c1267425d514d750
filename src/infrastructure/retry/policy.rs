//! Backoff policy.

use std::time::Duration;

/// Default number of attempts before a key is marked permanently failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay after the first failure.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Default upper bound on any single delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);

/// Bounded retry with optional exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Double the delay after each failure instead of keeping it fixed.
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            exponential: true,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after `failures` consecutive failed attempts.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let delay = if self.exponential {
            let exponent = failures.saturating_sub(1).min(32);
            base.saturating_mul(2_u64.saturating_pow(exponent))
        } else {
            base
        };
        Duration::from_millis(delay).min(self.max_delay)
    }
}
