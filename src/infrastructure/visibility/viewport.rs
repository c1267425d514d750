//! Viewport intersection observer.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::domain::ports::{ElementId, VisibilityEvent, VisibilityObserver};

/// Axis-aligned rectangle in layout pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Rect {
    /// Creates a rectangle.
    #[must_use]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    fn edges(self, margin: u32) -> (i64, i64, i64, i64) {
        let margin = i64::from(margin);
        let left = i64::from(self.x) - margin;
        let top = i64::from(self.y) - margin;
        let right = i64::from(self.x) + i64::from(self.width) + margin;
        let bottom = i64::from(self.y) + i64::from(self.height) + margin;
        (left, top, right, bottom)
    }

    /// Returns true if `other` touches this rectangle grown by `margin` on every side.
    #[must_use]
    pub fn intersects_within(self, other: Self, margin: u32) -> bool {
        let (l1, t1, r1, b1) = self.edges(margin);
        let (l2, t2, r2, b2) = other.edges(0);
        l1 <= r2 && l2 <= r1 && t1 <= b2 && t2 <= b1
    }
}

#[derive(Debug, Default)]
struct Tracked {
    bounds: Option<Rect>,
    margin: Option<u32>,
    visible: bool,
}

#[derive(Debug, Default)]
struct ViewportState {
    viewport: Rect,
    elements: HashMap<ElementId, Tracked>,
}

impl ViewportState {
    fn evaluate(&mut self, element: &ElementId) -> Option<VisibilityEvent> {
        let viewport = self.viewport;
        let tracked = self.elements.get_mut(element)?;
        let margin = tracked.margin?;
        let visible = tracked
            .bounds
            .is_some_and(|bounds| viewport.intersects_within(bounds, margin));
        if visible == tracked.visible {
            return None;
        }
        tracked.visible = visible;
        Some(VisibilityEvent {
            element: element.clone(),
            visible,
        })
    }
}

/// Tracks element rectangles against a viewport and reports transitions.
#[derive(Debug)]
pub struct ViewportObserver {
    state: Mutex<ViewportState>,
    events: mpsc::UnboundedSender<VisibilityEvent>,
}

impl ViewportObserver {
    /// Creates an observer that reports on `events`.
    #[must_use]
    pub fn new(events: mpsc::UnboundedSender<VisibilityEvent>) -> Self {
        Self {
            state: Mutex::new(ViewportState::default()),
            events,
        }
    }

    /// Creates an observer together with its event receiver.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<VisibilityEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Moves or resizes the viewport and re-evaluates every observed element.
    pub fn set_viewport(&self, viewport: Rect) {
        let events: Vec<VisibilityEvent> = {
            let mut state = self.state.lock();
            state.viewport = viewport;
            let observed: Vec<ElementId> = state
                .elements
                .iter()
                .filter(|(_, tracked)| tracked.margin.is_some())
                .map(|(id, _)| id.clone())
                .collect();
            observed
                .iter()
                .filter_map(|id| state.evaluate(id))
                .collect()
        };
        self.emit(events);
    }

    /// Records the layout rectangle of an element.
    pub fn set_bounds(&self, element: &ElementId, bounds: Rect) {
        let event = {
            let mut state = self.state.lock();
            state.elements.entry(element.clone()).or_default().bounds = Some(bounds);
            state.evaluate(element)
        };
        self.emit(event);
    }

    /// Forgets an element entirely.
    pub fn remove_element(&self, element: &ElementId) {
        self.state.lock().elements.remove(element);
    }

    /// Current viewport.
    pub fn viewport(&self) -> Rect {
        self.state.lock().viewport
    }

    /// Returns true if the element is observed and currently visible.
    pub fn is_visible(&self, element: &ElementId) -> bool {
        self.state
            .lock()
            .elements
            .get(element)
            .is_some_and(|tracked| tracked.visible)
    }

    /// Number of observed elements.
    pub fn observed_count(&self) -> usize {
        self.state
            .lock()
            .elements
            .values()
            .filter(|tracked| tracked.margin.is_some())
            .count()
    }

    fn emit(&self, events: impl IntoIterator<Item = VisibilityEvent>) {
        for event in events {
            trace!(element = %event.element, visible = event.visible, "Visibility changed");
            if self.events.send(event).is_err() {
                trace!("Visibility receiver dropped");
                return;
            }
        }
    }
}

impl VisibilityObserver for ViewportObserver {
    fn observe(&self, element: &ElementId, margin_px: u32) {
        let event = {
            let mut state = self.state.lock();
            let tracked = state.elements.entry(element.clone()).or_default();
            tracked.margin = Some(margin_px);
            tracked.visible = false;
            state.evaluate(element)
        };
        self.emit(event);
    }

    fn unobserve(&self, element: &ElementId) {
        let mut state = self.state.lock();
        if let Some(tracked) = state.elements.get_mut(element) {
            tracked.margin = None;
            tracked.visible = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const VIEWPORT: Rect = Rect::new(0, 0, 800, 600);

    #[test_case(Rect::new(100, 100, 50, 50), 0, true ; "inside")]
    #[test_case(Rect::new(0, 700, 50, 50), 0, false ; "below")]
    #[test_case(Rect::new(0, 700, 50, 50), 100, true ; "below within margin")]
    #[test_case(Rect::new(0, 701, 50, 50), 100, false ; "just past margin")]
    #[test_case(Rect::new(-60, 10, 50, 50), 10, true ; "left within margin")]
    #[test_case(Rect::new(900, 0, 10, 10), 50, false ; "right beyond margin")]
    fn test_intersects_within(element: Rect, margin: u32, expected: bool) {
        assert_eq!(VIEWPORT.intersects_within(element, margin), expected);
    }

    #[test]
    fn test_observe_visible_element_emits_immediately() {
        let (observer, mut rx) = ViewportObserver::channel();
        let id = ElementId::from("hero");
        observer.set_viewport(VIEWPORT);
        observer.set_bounds(&id, Rect::new(10, 10, 100, 100));
        assert!(rx.try_recv().is_err());

        observer.observe(&id, 0);

        assert_eq!(
            rx.try_recv().unwrap(),
            VisibilityEvent {
                element: id.clone(),
                visible: true
            }
        );
        assert!(observer.is_visible(&id));
    }

    #[test]
    fn test_scrolling_reports_transitions_once() {
        let (observer, mut rx) = ViewportObserver::channel();
        let id = ElementId::from("card-9");
        observer.set_viewport(VIEWPORT);
        observer.set_bounds(&id, Rect::new(0, 1000, 200, 200));
        observer.observe(&id, 200);
        assert!(rx.try_recv().is_err());

        observer.set_viewport(Rect::new(0, 150, 800, 600));
        assert!(rx.try_recv().is_err());

        observer.set_viewport(Rect::new(0, 250, 800, 600));
        assert!(rx.try_recv().unwrap().visible);

        observer.set_viewport(Rect::new(0, 300, 800, 600));
        assert!(rx.try_recv().is_err());

        observer.set_viewport(Rect::new(0, 0, 800, 100));
        assert!(!rx.try_recv().unwrap().visible);
    }

    #[test]
    fn test_unobserved_elements_stay_silent() {
        let (observer, mut rx) = ViewportObserver::channel();
        let id = ElementId::from("thumb");
        observer.set_viewport(VIEWPORT);
        observer.set_bounds(&id, Rect::new(0, 900, 10, 10));
        observer.observe(&id, 0);
        observer.unobserve(&id);

        observer.set_viewport(Rect::new(0, 800, 800, 600));
        assert!(rx.try_recv().is_err());
        assert_eq!(observer.observed_count(), 0);

        observer.remove_element(&id);
        observer.set_bounds(&id, Rect::new(0, 0, 10, 10));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_element_without_bounds_is_not_visible() {
        let (observer, mut rx) = ViewportObserver::channel();
        let id = ElementId::from("lazy");
        observer.set_viewport(VIEWPORT);
        observer.observe(&id, 1000);

        assert!(rx.try_recv().is_err());
        observer.set_bounds(&id, Rect::new(0, 0, 1, 1));
        assert!(rx.try_recv().unwrap().visible);
    }
}
