//! Element visibility port.

/// Identifier of an element tracked for visibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub String);

impl ElementId {
    /// Creates a new `ElementId`.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ElementId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A visibility transition reported by an observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityEvent {
    /// Element whose visibility changed.
    pub element: ElementId,
    /// True when the element entered the expanded viewport.
    pub visible: bool,
}

/// Port for whatever tracks element positions against the viewport.
///
/// Implementations deliver `VisibilityEvent`s on the channel handed to the
/// image loader when it is built.
#[cfg_attr(test, mockall::automock)]
pub trait VisibilityObserver: Send + Sync {
    /// Starts watching an element with a margin around the viewport.
    fn observe(&self, element: &ElementId, margin_px: u32);

    /// Stops watching an element.
    fn unobserve(&self, element: &ElementId);
}
