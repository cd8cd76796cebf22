//! Drawing a page's paragraph stream on the terminal.

use std::io::Write;
use std::ops::Range;

use anyhow::Result;
use crossterm::cursor;
use crossterm::style::{Attribute, Print, SetAttribute};
use crossterm::terminal::{Clear, ClearType};
use crossterm::QueueableCommand;
use termbook_core::{PageView, Span};
use termbook_render::wrap_paragraph;

const SELECTION_MARKER: &str = "\u{203a}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Run {
    pub text: String,
    pub emphasis: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyledLine {
    pub runs: Vec<Run>,
    pub highlighted: bool,
    pub selected: bool,
}

impl StyledLine {
    pub fn text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }
}

/// Wrap and justify the paragraphs of `view` for a text area `columns` wide.
pub fn page_lines(
    view: &PageView,
    columns: usize,
    paragraph_gap: usize,
    selected: Option<usize>,
) -> Vec<StyledLine> {
    let mut lines = Vec::new();
    for (idx, paragraph) in view.paragraphs.iter().enumerate() {
        if idx > 0 {
            lines.extend(std::iter::repeat(StyledLine::default()).take(paragraph_gap));
        }
        let plain = paragraph.text();
        let styles = span_ranges(&paragraph.spans);
        let ranges = wrap_paragraph(&plain, columns);
        let last = ranges.len().saturating_sub(1);
        for (line_idx, range) in ranges.into_iter().enumerate() {
            let justify_to = (line_idx != last && plain.as_bytes().get(range.end) != Some(&b'\n'))
                .then_some(columns);
            lines.push(StyledLine {
                runs: styled_runs(&plain, &styles, range, justify_to),
                highlighted: paragraph.highlighted,
                selected: selected == Some(idx),
            });
        }
    }
    lines
}

fn span_ranges(spans: &[Span]) -> Vec<(Range<usize>, bool)> {
    let mut start = 0;
    spans
        .iter()
        .map(|span| {
            let range = start..start + span.text.len();
            start = range.end;
            (range, span.emphasis)
        })
        .collect()
}

fn styled_runs(
    plain: &str,
    styles: &[(Range<usize>, bool)],
    line: Range<usize>,
    justify_to: Option<usize>,
) -> Vec<Run> {
    let mut words = Vec::new();
    let mut pos = line.start;
    for word in plain[line].split(' ') {
        if !word.is_empty() {
            words.push(pos..pos + word.len());
        }
        pos += word.len() + 1;
    }

    let width: usize = words.iter().map(|w| plain[w.clone()].chars().count()).sum();
    let gaps = words.len().saturating_sub(1);
    let (base, extra) = match justify_to {
        Some(columns) if gaps > 0 && width < columns => {
            ((columns - width) / gaps, (columns - width) % gaps)
        }
        _ => (1, 0),
    };

    let mut runs = Vec::new();
    for (idx, word) in words.iter().enumerate() {
        for (style, emphasis) in styles {
            let from = style.start.max(word.start);
            let to = style.end.min(word.end);
            if from < to {
                push_run(&mut runs, &plain[from..to], *emphasis);
            }
        }
        if idx < gaps {
            let pad = base + usize::from(idx < extra);
            push_run(&mut runs, &" ".repeat(pad), false);
        }
    }
    runs
}

fn push_run(runs: &mut Vec<Run>, text: &str, emphasis: bool) {
    if let Some(last) = runs.last_mut() {
        if last.emphasis == emphasis {
            last.text.push_str(text);
            return;
        }
    }
    runs.push(Run {
        text: text.to_string(),
        emphasis,
    });
}

pub struct TextRenderer<W: Write> {
    writer: W,
}

impl<W: Write> TextRenderer<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Draw `lines` with their top-left corner at (`left`, `top`).
    ///
    /// Highlighted paragraphs are drawn in reverse video and emphasis in
    /// italics. The selected paragraph gets a marker in the left margin when
    /// there is room for one.
    pub fn draw_lines(&mut self, lines: &[StyledLine], left: u16, top: u16) -> Result<()> {
        for (row, line) in lines.iter().enumerate() {
            let row = top.saturating_add(row as u16);
            if line.selected && left >= 2 {
                self.writer
                    .queue(cursor::MoveTo(left - 2, row))?
                    .queue(Print(SELECTION_MARKER))?;
            }
            self.writer.queue(cursor::MoveTo(left, row))?;
            if line.highlighted {
                self.writer.queue(SetAttribute(Attribute::Reverse))?;
            }
            for run in &line.runs {
                if run.emphasis {
                    self.writer
                        .queue(SetAttribute(Attribute::Italic))?
                        .queue(Print(&run.text))?
                        .queue(SetAttribute(Attribute::NoItalic))?;
                } else {
                    self.writer.queue(Print(&run.text))?;
                }
            }
            if line.highlighted {
                self.writer.queue(SetAttribute(Attribute::Reset))?;
            }
        }
        self.writer.flush()?;
        Ok(())
    }

    pub fn clear_all(&mut self) -> Result<()> {
        crossterm::execute!(
            &mut self.writer,
            Clear(ClearType::All),
            cursor::MoveTo(0, 0)
        )?;
        Ok(())
    }
}
