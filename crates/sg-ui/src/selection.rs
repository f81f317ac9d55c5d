//! Byte-range selection, cursor, and cursor-driven auto-scroll.

use serde::{Deserialize, Serialize};
use sg_core::Viewport;

/// Raw selection endpoints. `start` may exceed `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SelectionState {
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub cursor: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct SelectionModel {
    state: SelectionState,
    dragging: bool,
}

impl SelectionModel {
    /// Pointer down on a byte.
    pub fn begin_selection(&mut self, index: u64) {
        self.state = SelectionState { start: Some(index), end: Some(index), cursor: Some(index) };
        self.dragging = true;
    }

    /// Pointer drag over a byte. Starts a selection if none exists.
    pub fn extend_selection(&mut self, index: u64) {
        if self.state.start.is_none() {
            self.begin_selection(index);
            return;
        }
        self.state.end = Some(index);
        self.state.cursor = Some(index);
    }

    pub fn end_drag(&mut self) {
        self.dragging = false;
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Programmatic selection (offset jumps, match navigation). The cursor
    /// lands on `start`.
    pub fn set_selection(&mut self, start: u64, end: u64) {
        self.state = SelectionState { start: Some(start), end: Some(end), cursor: Some(start) };
        self.dragging = false;
    }

    pub fn clear(&mut self) {
        self.state = SelectionState::default();
        self.dragging = false;
    }

    /// Effective selection `[min, max]`, inclusive.
    pub fn range(&self) -> Option<(u64, u64)> {
        match (self.state.start, self.state.end) {
            (Some(a), Some(b)) => Some((a.min(b), a.max(b))),
            _ => None,
        }
    }

    pub fn len(&self) -> u64 {
        self.range().map_or(0, |(lo, hi)| hi - lo + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.range().is_none()
    }

    pub fn contains(&self, index: u64) -> bool {
        self.range().is_some_and(|(lo, hi)| index >= lo && index <= hi)
    }

    pub fn cursor(&self) -> Option<u64> {
        self.state.cursor
    }

    pub fn state(&self) -> SelectionState {
        self.state
    }
}

/// Brings a programmatically moved cursor into view exactly once. The
/// marker of the last cursor scrolled to is cleared only by a manual scroll.
#[derive(Debug, Clone, Default)]
pub struct AutoScroll {
    pending: Option<u64>,
    last_scrolled: Option<u64>,
}

impl AutoScroll {
    pub fn request(&mut self, cursor: u64) {
        if self.last_scrolled != Some(cursor) {
            self.pending = Some(cursor);
        }
    }

    /// New first row if the pending cursor is off screen. Scrolls the
    /// minimal amount: up to the cursor row, or down until it is the last
    /// fully visible row.
    pub fn resolve(&mut self, viewport: Viewport, bytes_per_row: u64) -> Option<u64> {
        let cursor = self.pending.take()?;
        self.last_scrolled = Some(cursor);
        let row = cursor / bytes_per_row.max(1);
        if viewport.contains_row(row) {
            return None;
        }
        if row < viewport.first_visible_row {
            Some(row)
        } else {
            Some((row + 1).saturating_sub(viewport.visible_row_count.max(1) as u64))
        }
    }

    pub fn on_manual_scroll(&mut self) {
        self.last_scrolled = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_order_independent() {
        let mut sel = SelectionModel::default();
        sel.set_selection(5, 2);
        assert_eq!(sel.range(), Some((2, 5)));
        assert_eq!(sel.len(), 4);
        assert!(sel.contains(2) && sel.contains(5));
        assert!(!sel.contains(6));
        assert_eq!(sel.cursor(), Some(5));
    }

    #[test]
    fn drag_extends_from_anchor() {
        let mut sel = SelectionModel::default();
        sel.begin_selection(10);
        assert!(sel.is_dragging());
        sel.extend_selection(4);
        assert_eq!(sel.range(), Some((4, 10)));
        assert_eq!(sel.state().start, Some(10));
        assert_eq!(sel.cursor(), Some(4));
        sel.end_drag();
        assert!(!sel.is_dragging());

        sel.clear();
        assert!(sel.is_empty());
        assert_eq!(sel.cursor(), None);
    }

    #[test]
    fn extend_without_anchor_begins() {
        let mut sel = SelectionModel::default();
        sel.extend_selection(7);
        assert_eq!(sel.range(), Some((7, 7)));
    }

    #[test]
    fn auto_scroll_moves_minimally() {
        let viewport = Viewport::new(100, 10);
        let mut auto = AutoScroll::default();

        auto.request(105 * 16);
        assert_eq!(auto.resolve(viewport, 16), None);

        auto.request(50 * 16 + 3);
        assert_eq!(auto.resolve(viewport, 16), Some(50));

        auto.request(200 * 16);
        assert_eq!(auto.resolve(viewport, 16), Some(191));
    }

    #[test]
    fn auto_scroll_does_not_retrigger_until_manual_scroll() {
        let viewport = Viewport::new(0, 10);
        let mut auto = AutoScroll::default();

        auto.request(500 * 16);
        assert_eq!(auto.resolve(viewport, 16), Some(491));
        // Same cursor again, e.g. re-requested every frame.
        auto.request(500 * 16);
        assert!(!auto.is_pending());
        assert_eq!(auto.resolve(viewport, 16), None);

        auto.on_manual_scroll();
        auto.request(500 * 16);
        assert_eq!(auto.resolve(viewport, 16), Some(491));
    }
}
