use egui::{Color32, FontId, Key, Sense, Ui};

use crate::renderer::FONT_SIZE;
use crate::state::AppState;
use crate::viewer::ViewerPhase;

/// Pixels of wheel travel per scrolled row.
const WHEEL_STEP: f32 = 18.0;

/// Hex grid panel. The grid is painted straight onto the panel's painter
/// from the chunk store; scrolling is virtual and row-based.
pub struct HexPanel;

impl HexPanel {
    pub fn show(ui: &mut Ui, state: &mut AppState) {
        let Some(tab) = state.active_tab() else {
            ui.centered_and_justified(|ui| ui.label("Open a file to view its contents."));
            return;
        };
        let phase = tab.phase();
        let bpr = state.config().bytes_per_row;
        let total_rows = tab.total_rows(bpr);

        let char_width = ui.fonts(|fonts| fonts.glyph_width(&FontId::monospace(FONT_SIZE), '0'));
        state.set_char_width(char_width);

        let (response, mut painter) = ui.allocate_painter(ui.available_size(), Sense::click_and_drag());
        let rect = response.rect;
        state.set_canvas(rect.min, rect.height());
        painter.rect_filled(rect, 0.0, state.renderer.theme.background);

        if response.hovered() {
            Self::handle_scroll(ui, state);
            Self::handle_keys(ui, state, total_rows);
        }

        if let Some(pos) = response.interact_pointer_pos() {
            if response.drag_started() || response.clicked() {
                state.pointer_down(pos);
            } else if response.dragged() {
                state.pointer_drag(pos);
            }
        }
        if response.drag_stopped() || response.clicked() {
            state.pointer_up();
        }

        if !phase.paints() {
            let label = match phase {
                ViewerPhase::Disposed => "Closed",
                _ => "Loading…",
            };
            painter.text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                label,
                FontId::proportional(14.0),
                Color32::GRAY,
            );
            return;
        }

        let stats = state.paint(&mut painter);
        log::trace!("Painted {} rows, {} placeholders", stats.rows, stats.placeholders);
    }

    fn handle_scroll(ui: &Ui, state: &mut AppState) {
        let delta = ui.input(|i| i.raw_scroll_delta.y);
        if delta.abs() < f32::EPSILON {
            return;
        }
        let rows = (-delta / WHEEL_STEP).round() as i64;
        let rows = if rows == 0 { -(delta.signum() as i64) } else { rows };
        state.scroll_rows(rows);
    }

    fn handle_keys(ui: &Ui, state: &mut AppState, total_rows: u64) {
        let page = state
            .active_tab()
            .map_or(1, |tab| tab.viewport.visible_row_count.max(1) as i64);
        let (up, down, page_up, page_down, home, end) = ui.input(|i| {
            (
                i.key_pressed(Key::ArrowUp),
                i.key_pressed(Key::ArrowDown),
                i.key_pressed(Key::PageUp),
                i.key_pressed(Key::PageDown),
                i.key_pressed(Key::Home),
                i.key_pressed(Key::End),
            )
        });
        if up {
            state.scroll_rows(-1);
        }
        if down {
            state.scroll_rows(1);
        }
        if page_up {
            state.scroll_rows(-page);
        }
        if page_down {
            state.scroll_rows(page);
        }
        if home {
            state.scroll_to_row(0);
        }
        if end {
            state.scroll_to_row(total_rows);
        }
    }
}
