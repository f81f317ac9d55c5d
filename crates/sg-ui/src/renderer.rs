//! Hex grid painting. The renderer reads bytes through [`ByteSource`] and
//! draws onto any [`Canvas`]; it never waits for missing chunks.

use egui::{Align2, Color32, FontId, Pos2, Rect, Vec2};
use sg_core::format::{
    ascii_char, format_offset, hex_pair_string, offset_digits, PLACEHOLDER_CHAR, PLACEHOLDER_HEX,
};
use sg_core::Viewport;
use sg_engine::ByteSource;

pub const FONT_SIZE: f32 = 13.0;
/// Height of one monospace row in pixels.
pub const ROW_HEIGHT: f32 = 18.0;
/// Monospace advance used until the host measures the real font.
pub const DEFAULT_CHAR_WIDTH: f32 = 8.0;

/// Minimal drawing surface.
pub trait Canvas {
    fn fill_rect(&mut self, rect: Rect, color: Color32);
    fn text(&mut self, pos: Pos2, text: &str, color: Color32);
}

impl Canvas for egui::Painter {
    fn fill_rect(&mut self, rect: Rect, color: Color32) {
        self.rect_filled(rect, 0.0, color);
    }

    fn text(&mut self, pos: Pos2, text: &str, color: Color32) {
        egui::Painter::text(self, pos, Align2::LEFT_TOP, text, FontId::monospace(FONT_SIZE), color);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Theme {
    pub background: Color32,
    pub offset_fg: Color32,
    /// Alternating per-column foreground for hex cells.
    pub hex_fg: [Color32; 2],
    pub ascii_fg: Color32,
    /// Alternating per-column background.
    pub column_bg: [Color32; 2],
    pub placeholder_fg: Color32,
    pub selection_fg: Color32,
    pub selection_bg: Color32,
    pub cursor_bg: Color32,
    pub match_fg: Color32,
    pub match_bg: Color32,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            background: Color32::from_rgb(24, 24, 28),
            offset_fg: Color32::from_rgb(100, 140, 180),
            hex_fg: [Color32::from_rgb(220, 220, 220), Color32::from_rgb(185, 190, 200)],
            ascii_fg: Color32::from_rgb(160, 200, 140),
            column_bg: [Color32::TRANSPARENT, Color32::from_rgb(32, 32, 38)],
            placeholder_fg: Color32::from_rgb(90, 90, 100),
            selection_fg: Color32::from_rgb(255, 255, 100),
            selection_bg: Color32::from_rgb(80, 80, 0),
            cursor_bg: Color32::from_rgb(60, 60, 90),
            match_fg: Color32::from_rgb(255, 255, 80),
            match_bg: Color32::from_rgb(50, 50, 0),
        }
    }
}

/// Fixed column geometry of the grid: offset column, hex cells with a gap
/// after the middle column, then the character cells.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    pub origin: Pos2,
    pub bytes_per_row: u64,
    pub row_height: f32,
    pub char_width: f32,
    pub offset_digits: usize,
}

impl GridLayout {
    pub fn new(bytes_per_row: u64) -> Self {
        Self {
            origin: Pos2::ZERO,
            bytes_per_row: bytes_per_row.max(1),
            row_height: ROW_HEIGHT,
            char_width: DEFAULT_CHAR_WIDTH,
            offset_digits: 8,
        }
    }

    /// The same layout with the offset column wide enough for `file_size`.
    pub fn sized_for(mut self, file_size: u64) -> Self {
        self.offset_digits = offset_digits(file_size);
        self
    }

    pub fn offset_x(&self) -> f32 {
        self.origin.x
    }

    fn hex_start(&self) -> f32 {
        self.origin.x + (self.offset_digits as f32 + 2.0) * self.char_width
    }

    pub fn hex_x(&self, col: u64) -> f32 {
        let gap = if col >= self.bytes_per_row / 2 { self.char_width } else { 0.0 };
        self.hex_start() + col as f32 * 3.0 * self.char_width + gap
    }

    fn ascii_start(&self) -> f32 {
        self.hex_start() + (self.bytes_per_row as f32 * 3.0 + 3.0) * self.char_width
    }

    pub fn ascii_x(&self, col: u64) -> f32 {
        self.ascii_start() + col as f32 * self.char_width
    }

    /// Top edge of the `n`th painted row.
    pub fn row_y(&self, n: u64) -> f32 {
        self.origin.y + n as f32 * self.row_height
    }

    pub fn width(&self) -> f32 {
        self.ascii_x(self.bytes_per_row) - self.origin.x
    }

    fn column_at(&self, x: f32) -> Option<u64> {
        let cw = self.char_width;
        if let Some(col) = (0..self.bytes_per_row)
            .find(|&col| x >= self.hex_x(col) && x < self.hex_x(col) + 3.0 * cw)
        {
            return Some(col);
        }
        let ascii = self.ascii_start();
        if x >= ascii && x < self.ascii_x(self.bytes_per_row) {
            return Some(((x - ascii) / cw) as u64);
        }
        None
    }

    /// Byte under a pointer position, given the first visible row. `None`
    /// outside the cells or past the end of the file.
    pub fn byte_at(&self, pos: Pos2, first_row: u64, file_size: u64) -> Option<u64> {
        if pos.y < self.origin.y || self.row_height <= 0.0 {
            return None;
        }
        let row = ((pos.y - self.origin.y) / self.row_height) as u64;
        let col = self.column_at(pos.x)?;
        let index = (first_row + row).checked_mul(self.bytes_per_row)? + col;
        (index < file_size).then_some(index)
    }
}

/// Per-paint overlay state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Highlights<'a> {
    /// Ordered inclusive range.
    pub selection: Option<(u64, u64)>,
    pub cursor: Option<u64>,
    /// Sorted match starts.
    pub matches: &'a [u64],
    pub match_len: u64,
}

impl Highlights<'_> {
    fn selected(&self, index: u64) -> bool {
        self.selection.is_some_and(|(lo, hi)| index >= lo && index <= hi)
    }

    fn in_match(&self, index: u64) -> bool {
        let n = self.matches.partition_point(|&m| m <= index);
        n > 0 && index < self.matches[n - 1] + self.match_len
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PaintStats {
    pub rows: u64,
    pub cells: u64,
    pub placeholders: u64,
}

struct CellStyle {
    hex_fg: Color32,
    ascii_fg: Color32,
    bg: Color32,
}

pub struct ViewportRenderer {
    pub layout: GridLayout,
    pub theme: Theme,
}

impl ViewportRenderer {
    pub fn new(layout: GridLayout, theme: Theme) -> Self {
        Self { layout, theme }
    }

    fn cell_style(&self, index: u64, col: u64, highlights: &Highlights, loaded: bool) -> CellStyle {
        let theme = &self.theme;
        let parity = (col % 2) as usize;
        let mut style = if highlights.selected(index) {
            CellStyle { hex_fg: theme.selection_fg, ascii_fg: theme.selection_fg, bg: theme.selection_bg }
        } else if highlights.in_match(index) {
            CellStyle { hex_fg: theme.match_fg, ascii_fg: theme.match_fg, bg: theme.match_bg }
        } else {
            let bg = if highlights.cursor == Some(index) { theme.cursor_bg } else { theme.column_bg[parity] };
            CellStyle { hex_fg: theme.hex_fg[parity], ascii_fg: theme.ascii_fg, bg }
        };
        if !loaded && !highlights.selected(index) {
            style.hex_fg = theme.placeholder_fg;
            style.ascii_fg = theme.placeholder_fg;
        }
        style
    }

    /// Paint rows `first..=first + count` (the extra row is the partial one
    /// at the bottom edge).
    pub fn paint<C, S>(&self, canvas: &mut C, source: &S, viewport: Viewport, highlights: &Highlights) -> PaintStats
    where
        C: Canvas + ?Sized,
        S: ByteSource + ?Sized,
    {
        let mut stats = PaintStats::default();
        let file_size = source.len();
        let layout = &self.layout.sized_for(file_size);
        let bpr = layout.bytes_per_row;
        let total_rows = file_size.div_ceil(bpr);
        let first = viewport.first_visible_row;
        if first >= total_rows {
            return stats;
        }
        let last = viewport.end_row().min(total_rows - 1);
        let cw = layout.char_width;

        for row in first..=last {
            let y = layout.row_y(row - first);
            let row_start = row * bpr;
            canvas.text(Pos2::new(layout.offset_x(), y), &format_offset(row_start, layout.offset_digits), self.theme.offset_fg);

            for col in 0..bpr {
                let index = row_start + col;
                if index >= file_size {
                    break;
                }
                let value = source.byte_at(index);
                let style = self.cell_style(index, col, highlights, value.is_some());

                let hex_pos = Pos2::new(layout.hex_x(col), y);
                let ascii_pos = Pos2::new(layout.ascii_x(col), y);
                if style.bg != Color32::TRANSPARENT {
                    canvas.fill_rect(Rect::from_min_size(hex_pos, Vec2::new(2.0 * cw, layout.row_height)), style.bg);
                    canvas.fill_rect(Rect::from_min_size(ascii_pos, Vec2::new(cw, layout.row_height)), style.bg);
                }

                match value {
                    Some(byte) => {
                        canvas.text(hex_pos, &hex_pair_string(byte), style.hex_fg);
                        canvas.text(ascii_pos, &ascii_char(byte).to_string(), style.ascii_fg);
                    }
                    None => {
                        canvas.text(hex_pos, PLACEHOLDER_HEX, style.hex_fg);
                        canvas.text(ascii_pos, &PLACEHOLDER_CHAR.to_string(), style.ascii_fg);
                        stats.placeholders += 1;
                    }
                }
                stats.cells += 1;
            }
            stats.rows += 1;
        }
        stats
    }
}
