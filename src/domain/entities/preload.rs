//! Preload task and priority types.

use tokio::time::Instant;

use super::cache_key::{CacheKey, TransformOptions};

/// Preload urgency. Higher variants are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum PreloadPriority {
    /// Speculative work, e.g. predicted neighbours.
    Low,
    /// Explicit preload requests.
    #[default]
    Normal,
    /// Elements about to scroll into view.
    High,
    /// Needed right now.
    Immediate,
}

impl From<u8> for PreloadPriority {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Low,
            1 => Self::Normal,
            2 => Self::High,
            _ => Self::Immediate,
        }
    }
}

impl std::fmt::Display for PreloadPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Immediate => "immediate",
        };
        f.write_str(label)
    }
}

/// A queued preload.
#[derive(Debug, Clone)]
pub struct PreloadTask {
    /// Locator to fetch.
    pub locator: String,
    /// Requested variant.
    pub options: TransformOptions,
    /// Derived cache key.
    pub key: CacheKey,
    /// Current priority.
    pub priority: PreloadPriority,
    /// When the task was first queued.
    pub enqueued_at: Instant,
    /// Enqueue order, used to keep equal priorities FIFO.
    pub seq: u64,
}

impl PreloadTask {
    /// Creates a task; `seq` is assigned by the queue.
    #[must_use]
    pub fn new(
        locator: impl Into<String>,
        options: TransformOptions,
        key: CacheKey,
        priority: PreloadPriority,
    ) -> Self {
        Self {
            locator: locator.into(),
            options,
            key,
            priority,
            enqueued_at: Instant::now(),
            seq: 0,
        }
    }
}
