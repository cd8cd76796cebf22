//! Raw book text to paragraph records.
//!
//! The normalized text is the coordinate space for every offset in the
//! engine: chapters, pages and the saved reading position all count `char`s
//! into it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

static RE_MARKUP_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid markup tag pattern"));
static RE_HORIZONTAL_WS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t\u{00A0}]+").expect("valid whitespace pattern"));
static RE_LINE_EDGE_WS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^ +| +$").expect("valid line edge pattern"));
static RE_BLANK_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{2,}").expect("valid blank line pattern"));

/// Entity spellings and the literal each one decodes to.
const ENTITIES: &[(&[&str], &str)] = &[
    (&["mdash", "#8212"], "\u{2014}"),
    (&["nbsp", "#160"], " "),
    (&["quot", "ldquo", "rdquo", "#8220", "#8221"], "\""),
    (&["lsquo", "rsquo", "#8216", "#8217"], "'"),
    (&["amp", "#38"], "&"),
    (&["hellip", "#8230"], "..."),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub id: String,
    pub text: String,
    pub ordinal: usize,
    /// Offset of the first character in the normalized text.
    pub start_offset: usize,
}

impl Paragraph {
    pub fn end_offset(&self) -> usize {
        self.start_offset + self.text.chars().count()
    }
}

pub fn paragraph_id(ordinal: usize) -> String {
    format!("p_{ordinal:04}")
}

#[derive(Debug, Clone, Default)]
pub struct NormalizedBook {
    pub text: String,
    pub paragraphs: Vec<Paragraph>,
    char_len: usize,
}

impl NormalizedBook {
    pub fn char_len(&self) -> usize {
        self.char_len
    }

    pub fn paragraph(&self, id: &str) -> Option<&Paragraph> {
        self.paragraphs.iter().find(|p| p.id == id)
    }

    /// Index of the paragraph containing `offset`, or of the paragraph that
    /// follows when `offset` falls on a separator.
    pub fn paragraph_index_at(&self, offset: usize) -> Option<usize> {
        let idx = self
            .paragraphs
            .partition_point(|p| p.end_offset() <= offset);
        (idx < self.paragraphs.len()).then_some(idx)
    }
}

/// Clean `raw` and split it into paragraphs.
///
/// Text before `start_marker` is discarded. When the marker is configured but
/// missing, the whole input is used.
pub fn normalize(raw: &str, start_marker: Option<&str>) -> NormalizedBook {
    let body = match start_marker.filter(|m| !m.is_empty()) {
        Some(marker) => match raw.find(marker) {
            Some(start) => &raw[start..],
            None => {
                tracing::warn!(marker, "start marker not found; using whole text");
                raw
            }
        },
        None => raw,
    };

    let text = RE_MARKUP_TAG.replace_all(body, "");
    let text = decode_entities(&text);
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = RE_HORIZONTAL_WS.replace_all(&text, " ");
    let text = RE_LINE_EDGE_WS.replace_all(&text, "");
    let text = join_wrapped_lines(&text);
    let text = RE_BLANK_RUN.replace_all(&text, PARAGRAPH_SEPARATOR);
    let text = text.trim().to_string();

    let mut paragraphs = Vec::new();
    let mut offset = 0usize;
    if !text.is_empty() {
        for (ordinal, chunk) in text.split(PARAGRAPH_SEPARATOR).enumerate() {
            let len = chunk.chars().count();
            paragraphs.push(Paragraph {
                id: paragraph_id(ordinal),
                text: chunk.to_string(),
                ordinal,
                start_offset: offset,
            });
            offset += len + PARAGRAPH_SEPARATOR.len();
        }
    }

    let char_len = text.chars().count();
    tracing::debug!(
        chars = char_len,
        paragraphs = paragraphs.len(),
        "normalized book text"
    );

    NormalizedBook {
        text,
        paragraphs,
        char_len,
    }
}

fn decode_entities(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp + 1..];
        let decoded = tail.find(';').and_then(|semi| {
            let name = &tail[..semi];
            ENTITIES
                .iter()
                .find(|(names, _)| names.contains(&name))
                .map(|(_, literal)| (*literal, semi))
        });
        match decoded {
            Some((literal, semi)) => {
                out.push_str(literal);
                rest = &tail[semi + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Replace a single line break with a space when it splits a sentence: the
/// line ends in a letter or `, ; : . ! ?` and the next one starts with a
/// letter.
fn join_wrapped_lines(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (idx, &ch) in chars.iter().enumerate() {
        if ch == '\n' && idx > 0 && idx + 1 < chars.len() {
            let before = chars[idx - 1];
            let after = chars[idx + 1];
            let ends_clause =
                before.is_ascii_alphabetic() || matches!(before, ',' | ';' | ':' | '.' | '!' | '?');
            if ends_clause && after.is_ascii_alphabetic() {
                out.push(' ');
                continue;
            }
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_hard_wrapped_lines_into_paragraphs() {
        let raw = "It was a dreary night\nof November, when I\nbeheld the accomplishment.\n\n\n\nWith an anxiety\nthat almost amounted to agony.";
        let book = normalize(raw, None);

        assert_eq!(book.paragraphs.len(), 2);
        assert_eq!(
            book.paragraphs[0].text,
            "It was a dreary night of November, when I beheld the accomplishment."
        );
        assert_eq!(
            book.paragraphs[1].text,
            "With an anxiety that almost amounted to agony."
        );
        assert_eq!(book.paragraphs[0].id, "p_0000");
        assert_eq!(book.paragraphs[1].id, "p_0001");
    }

    #[test]
    fn joins_every_line_of_a_multi_line_wrap() {
        let book = normalize("one\ntwo\nthree\nfour", None);
        assert_eq!(book.text, "one two three four");
    }

    #[test]
    fn keeps_break_after_numerals() {
        let book = normalize("Letter 1\nSt. Petersburgh", None);
        assert_eq!(book.text, "Letter 1\nSt. Petersburgh");
    }

    #[test]
    fn strips_tags_and_decodes_entities() {
        let raw = "<p>&ldquo;Hello&rdquo; &amp; goodbye&#8212;it&rsquo;s&nbsp;late&hellip;</p>";
        let book = normalize(raw, None);
        assert_eq!(book.text, "\"Hello\" & goodbye\u{2014}it's late...");
    }

    #[test]
    fn leaves_unknown_entities_alone() {
        let book = normalize("fish &chips; &lt;b&gt; & more", None);
        assert_eq!(book.text, "fish &chips; &lt;b&gt; & more");
    }

    #[test]
    fn starts_at_configured_marker() {
        let raw = "Produced by volunteers.\n\n*To Mrs. Saville, England.*\n\nYou will rejoice.";
        let book = normalize(raw, Some("*To Mrs. Saville, England.*"));
        assert!(book.text.starts_with("*To Mrs. Saville"));
        assert_eq!(book.paragraphs.len(), 2);
    }

    #[test]
    fn missing_marker_uses_whole_text() {
        let book = normalize("Preface.\n\nBody.", Some("CHAPTER I"));
        assert_eq!(book.paragraphs.len(), 2);
        assert_eq!(book.paragraphs[0].text, "Preface.");
    }

    #[test]
    fn blank_lines_with_spaces_still_separate_paragraphs() {
        let book = normalize("First.\r\n   \r\n\t\r\nSecond.", None);
        assert_eq!(book.text, "First.\n\nSecond.");
    }

    #[test]
    fn paragraph_offsets_index_into_text() {
        let book = normalize("Alpha beta.\n\nGamma \u{2014} delta.\n\nEpsilon.", None);
        let chars: Vec<char> = book.text.chars().collect();
        for para in &book.paragraphs {
            let slice: String = chars[para.start_offset..para.end_offset()].iter().collect();
            assert_eq!(slice, para.text);
        }
        assert_eq!(book.char_len(), chars.len());
    }

    #[test]
    fn normalizing_twice_yields_identical_paragraphs() {
        let raw = "<h1>Letter 1</h1>\n\nYou will\nrejoice to hear.\n\n\n\nI arrived here yesterday.";
        let first = normalize(raw, None);
        let second = normalize(raw, None);
        assert_eq!(first.paragraphs, second.paragraphs);
    }

    #[test]
    fn empty_input_has_no_paragraphs() {
        let book = normalize("  \n\n  ", None);
        assert!(book.text.is_empty());
        assert!(book.paragraphs.is_empty());
        assert_eq!(book.paragraph_index_at(0), None);
    }

    #[test]
    fn paragraph_lookup_by_offset() {
        let book = normalize("ab\n\ncd", None);
        assert_eq!(book.paragraph_index_at(0), Some(0));
        assert_eq!(book.paragraph_index_at(1), Some(0));
        assert_eq!(book.paragraph_index_at(2), Some(1));
        assert_eq!(book.paragraph_index_at(4), Some(1));
        assert_eq!(book.paragraph_index_at(6), None);
    }
}
