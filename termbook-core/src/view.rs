//! The semantic paragraph stream handed to a display sink.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::chapters::ChapterSnapshot;
use crate::highlights::HighlightStore;
use crate::paginate::Page;

static RE_EMPHASIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_([^_\n]+)_").expect("valid emphasis pattern"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub text: String,
    pub emphasis: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayParagraph {
    pub paragraph_id: String,
    pub spans: Vec<Span>,
    pub highlighted: bool,
}

impl DisplayParagraph {
    /// Plain text without emphasis markers.
    pub fn text(&self) -> String {
        self.spans.iter().map(|span| span.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageView {
    pub page_index: usize,
    /// Pages generated so far, not the final count.
    pub pages_known: usize,
    pub exhausted: bool,
    pub paragraphs: Vec<DisplayParagraph>,
    pub progress: f64,
    pub chapter_progress: f64,
    pub chapter: ChapterSnapshot,
}

impl PageView {
    pub fn progress_percent(&self) -> f64 {
        self.progress * 100.0
    }
}

/// Split `text` into plain and `_emphasized_` runs.
pub fn emphasis_spans(text: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut last = 0;
    for caps in RE_EMPHASIS.captures_iter(text) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() > last {
            spans.push(Span {
                text: text[last..whole.start()].to_string(),
                emphasis: false,
            });
        }
        spans.push(Span {
            text: inner.as_str().to_string(),
            emphasis: true,
        });
        last = whole.end();
    }
    if last < text.len() || spans.is_empty() {
        spans.push(Span {
            text: text[last..].to_string(),
            emphasis: false,
        });
    }
    spans
}

/// Paragraph segments of `page` in order, tagged with their highlight state.
pub fn display_paragraphs(page: &Page, highlights: &HighlightStore) -> Vec<DisplayParagraph> {
    page.segments
        .iter()
        .map(|segment| DisplayParagraph {
            paragraph_id: segment.paragraph_id.clone(),
            spans: emphasis_spans(page.segment_text(segment)),
            highlighted: highlights.contains(&segment.paragraph_id),
        })
        .collect()
}
