//! Word wrapping on a fixed-width cell grid.

use std::ops::Range;

use termbook_core::{MeasureOracle, RenderMode, SurfaceConfig, PARAGRAPH_SEPARATOR};

/// Rows kept free below the page for the status line.
pub const STATUS_ROWS: u16 = 1;

/// Byte ranges of the lines `text` wraps to at `columns`.
///
/// Single line breaks inside `text` always start a new line. Words wider than
/// the grid are broken across rows.
pub fn wrap_paragraph(text: &str, columns: usize) -> Vec<Range<usize>> {
    let columns = columns.max(1);
    let mut lines = Vec::new();
    let mut line_start = 0usize;

    for raw_line in text.split('\n') {
        let mut current: Option<(usize, usize, usize)> = None;
        let mut word_start = line_start;
        for word in raw_line.split(' ') {
            let start = word_start;
            let end = start + word.len();
            word_start = end + 1;
            if word.is_empty() {
                continue;
            }
            let width = word.chars().count();

            if let Some((from, to, used)) = current {
                if used + 1 + width <= columns {
                    current = Some((from, end, used + 1 + width));
                    continue;
                }
                lines.push(from..to);
            }

            let mut from = start;
            let mut remaining = width;
            while remaining > columns {
                let cut = from
                    + text[from..]
                        .char_indices()
                        .nth(columns)
                        .map(|(idx, _)| idx)
                        .unwrap_or(text.len() - from);
                lines.push(from..cut);
                from = cut;
                remaining -= columns;
            }
            current = Some((from, end, remaining));
        }

        match current {
            Some((from, to, _)) => lines.push(from..to),
            None => lines.push(line_start..line_start),
        }
        line_start += raw_line.len() + 1;
    }
    lines
}

/// Stretch `line` to `columns` by widening the gaps between words.
pub fn justify(line: &str, columns: usize) -> String {
    let words: Vec<&str> = line.split(' ').filter(|w| !w.is_empty()).collect();
    let width: usize = words.iter().map(|w| w.chars().count()).sum();
    if words.len() < 2 || width >= columns {
        return line.to_string();
    }

    let gaps = words.len() - 1;
    let spaces = columns - width;
    let (base, extra) = (spaces / gaps, spaces % gaps);
    let mut out = String::with_capacity(columns);
    for (idx, word) in words.iter().enumerate() {
        out.push_str(word);
        if idx < gaps {
            let pad = base + usize::from(idx < extra);
            out.extend(std::iter::repeat(' ').take(pad));
        }
    }
    out
}

/// Lay `text` out as it would appear on the grid.
///
/// `Display` justifies every line except the last of a paragraph; `Measure`
/// leaves lines ragged. Both break lines in the same places.
pub fn render_lines(
    text: &str,
    columns: usize,
    paragraph_gap: usize,
    mode: RenderMode,
) -> Vec<String> {
    let mut out = Vec::new();
    for (idx, paragraph) in text.split(PARAGRAPH_SEPARATOR).enumerate() {
        if idx > 0 {
            out.extend(std::iter::repeat(String::new()).take(paragraph_gap));
        }
        let ranges = wrap_paragraph(paragraph, columns);
        let last = ranges.len().saturating_sub(1);
        for (line_idx, range) in ranges.into_iter().enumerate() {
            let before_break =
                line_idx == last || paragraph.as_bytes().get(range.end) == Some(&b'\n');
            let line = &paragraph[range];
            match mode {
                RenderMode::Display if !before_break => out.push(justify(line, columns)),
                _ => out.push(line.to_string()),
            }
        }
    }
    out
}

/// Measurement oracle for a terminal text area of `columns × rows` cells.
#[derive(Debug, Clone)]
pub struct CellGridOracle {
    columns: u16,
    rows: u16,
    paragraph_gap: u16,
    measuring: bool,
    measurements: u64,
}

impl CellGridOracle {
    pub fn new(columns: u16, rows: u16, paragraph_gap: u16) -> Self {
        Self {
            columns,
            rows,
            paragraph_gap,
            measuring: false,
            measurements: 0,
        }
    }

    /// Text area left in a terminal of the given size after margins and the
    /// status line.
    pub fn for_terminal(terminal_columns: u16, terminal_rows: u16, surface: &SurfaceConfig) -> Self {
        let columns = terminal_columns.saturating_sub(surface.margin_columns.saturating_mul(2));
        let rows = terminal_rows
            .saturating_sub(surface.margin_rows.saturating_mul(2))
            .saturating_sub(STATUS_ROWS);
        Self::new(columns, rows, surface.paragraph_gap)
    }

    pub fn columns(&self) -> u16 {
        self.columns
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn paragraph_gap(&self) -> u16 {
        self.paragraph_gap
    }

    /// True between the first measurement of a pass and [`MeasureOracle::finish_pass`].
    pub fn is_measuring(&self) -> bool {
        self.measuring
    }

    pub fn measurements(&self) -> u64 {
        self.measurements
    }

    pub fn lay_out(&self, text: &str, mode: RenderMode) -> Vec<String> {
        render_lines(
            text,
            usize::from(self.columns),
            usize::from(self.paragraph_gap),
            mode,
        )
    }
}

impl MeasureOracle for CellGridOracle {
    fn capacity(&self) -> i64 {
        if self.columns == 0 {
            0
        } else {
            i64::from(self.rows)
        }
    }

    fn overflows(&mut self, text: &str, mode: RenderMode) -> bool {
        self.measuring = mode == RenderMode::Measure;
        self.measurements += 1;
        self.lay_out(text, mode).len() > usize::from(self.rows)
    }

    fn finish_pass(&mut self) {
        self.measuring = false;
    }
}
