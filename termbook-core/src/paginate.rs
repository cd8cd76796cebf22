//! Incremental page generation against a measurement oracle.
//!
//! The engine never knows how text is laid out. It only asks the oracle
//! whether a candidate page overflows the surface, probing in chunks of words
//! and dropping to single words only at the overflow boundary.
//!
//! Words are runs of text between single spaces. Line breaks stay inside the
//! word they touch, so a page is always an exact slice of the normalized text
//! and the page after it starts one character (the joining space) later.

use std::ops::Range;

use tracing::instrument;

use crate::error::{ReaderError, ReaderResult};
use crate::normalize::NormalizedBook;

pub const DEFAULT_CHUNK_WORDS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Layout used while probing page boundaries.
    Measure,
    /// Layout used for the page the reader sees.
    Display,
}

/// Answers "does this text overflow the surface?".
///
/// Implementations must be deterministic for identical text, mode and
/// capacity within a session. Both modes must wrap text identically; they may
/// only differ cosmetically.
pub trait MeasureOracle {
    /// Extent available on the surface, in oracle-specific units.
    fn capacity(&self) -> i64;

    fn overflows(&mut self, text: &str, mode: RenderMode) -> bool;

    /// Called once a generation pass is complete so the surface can go back to
    /// showing display content.
    fn finish_pass(&mut self) {}
}

/// The part of a page that belongs to one paragraph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSegment {
    pub paragraph_id: String,
    pub paragraph_ordinal: usize,
    /// Byte range into [`Page::text`].
    pub range: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub text: String,
    pub start_offset: usize,
    pub segments: Vec<PageSegment>,
    char_len: usize,
    /// Byte offset in the normalized text where this page ends.
    byte_end: usize,
}

impl Page {
    pub fn char_len(&self) -> usize {
        self.char_len
    }

    pub fn end_offset(&self) -> usize {
        self.start_offset + self.char_len
    }

    /// Offset where the following page begins.
    pub fn next_start_offset(&self) -> usize {
        self.end_offset() + 1
    }

    pub fn segment_text(&self, segment: &PageSegment) -> &str {
        &self.text[segment.range.clone()]
    }

    pub fn word_count(&self) -> usize {
        self.text.split(' ').count()
    }
}

#[derive(Debug, Clone, Copy)]
struct Word {
    bytes: (usize, usize),
    char_start: usize,
    char_len: usize,
}

/// Offset where the page after `pages` begins.
pub fn next_start_offset(pages: &[Page]) -> usize {
    pages.last().map(Page::next_start_offset).unwrap_or(0)
}

/// Append up to `batch_size` pages after `existing`.
///
/// Returns the new pages only. An empty result means the text is exhausted.
/// When the words run out, the partly filled last page is returned even if it
/// exceeds `batch_size`.
#[instrument(skip(existing, book, oracle), fields(existing = existing.len()))]
pub fn extend_pages(
    existing: &[Page],
    book: &NormalizedBook,
    oracle: &mut dyn MeasureOracle,
    batch_size: usize,
    chunk_words: usize,
) -> ReaderResult<Vec<Page>> {
    let capacity = oracle.capacity();
    if capacity <= 0 {
        return Err(ReaderError::InvalidSurface { capacity });
    }

    let start = next_start_offset(existing);
    if start >= book.char_len() || batch_size == 0 {
        return Ok(Vec::new());
    }

    let text = book.text.as_str();
    let byte_start = existing.last().map_or(0, |page| page.byte_end + 1);
    let mut cursor = WordCursor::new(text, byte_start, start);
    let chunk_words = chunk_words.max(1);

    let mut pages = Vec::new();
    let mut page_start: Option<usize> = None;
    let mut idx = 0usize;

    while pages.len() < batch_size {
        let available = cursor.fill(idx + chunk_words);
        if idx >= available {
            break;
        }
        let words = cursor.words();
        let chunk = chunk_words.min(available - idx);
        let first = page_start.unwrap_or(idx);
        if !oracle.overflows(span(text, words, first, idx + chunk), RenderMode::Measure) {
            page_start = Some(first);
            idx += chunk;
            continue;
        }

        if chunk == 1 {
            // A lone word that overflows an empty page is accepted anyway.
            if let Some(open) = page_start {
                pages.push(build_page(book, words, open, idx));
            }
            page_start = Some(idx);
            idx += 1;
            continue;
        }

        let chunk_end = idx + chunk;
        while idx < chunk_end {
            let first = page_start.unwrap_or(idx);
            if !oracle.overflows(span(text, words, first, idx + 1), RenderMode::Measure) {
                page_start = Some(first);
                idx += 1;
                continue;
            }
            if let Some(open) = page_start {
                pages.push(build_page(book, words, open, idx));
            }
            page_start = Some(idx);
            idx += 1;
            break;
        }
    }

    if cursor.fill(idx + 1) <= idx {
        if let Some(open) = page_start {
            pages.push(build_page(book, cursor.words(), open, idx));
        }
    }

    oracle.finish_pass();
    tracing::debug!(start, added = pages.len(), "generated pages");
    Ok(pages)
}

/// Splits text into words on demand, starting at a known position.
struct WordCursor<'a> {
    text: &'a str,
    next_byte: usize,
    next_char: usize,
    done: bool,
    words: Vec<Word>,
}

impl<'a> WordCursor<'a> {
    fn new(text: &'a str, byte_start: usize, char_start: usize) -> Self {
        Self {
            text,
            next_byte: byte_start,
            next_char: char_start,
            done: byte_start > text.len(),
            words: Vec::new(),
        }
    }

    fn words(&self) -> &[Word] {
        &self.words
    }

    /// Split until `count` words are known or the text ends. Returns the
    /// number of words known.
    fn fill(&mut self, count: usize) -> usize {
        while self.words.len() < count && !self.done {
            let rest = &self.text[self.next_byte..];
            let part = match rest.find(' ') {
                Some(end) => &rest[..end],
                None => {
                    self.done = true;
                    rest
                }
            };
            let char_len = part.chars().count();
            self.words.push(Word {
                bytes: (self.next_byte, self.next_byte + part.len()),
                char_start: self.next_char,
                char_len,
            });
            self.next_byte += part.len() + 1;
            self.next_char += char_len + 1;
        }
        self.words.len()
    }
}

fn span<'a>(text: &'a str, words: &[Word], first: usize, end: usize) -> &'a str {
    &text[words[first].bytes.0..words[end - 1].bytes.1]
}

fn build_page(book: &NormalizedBook, words: &[Word], first: usize, end: usize) -> Page {
    let text = span(&book.text, words, first, end).to_string();
    let start_offset = words[first].char_start;
    let last = words[end - 1];
    let char_len = last.char_start + last.char_len - start_offset;
    let segments = segments_for(book, &text, start_offset, char_len);
    Page {
        text,
        start_offset,
        segments,
        char_len,
        byte_end: last.bytes.1,
    }
}

/// Tag each paragraph the page touches with its slice of the page text.
fn segments_for(
    book: &NormalizedBook,
    page_text: &str,
    start: usize,
    char_len: usize,
) -> Vec<PageSegment> {
    let end = start + char_len;
    let Some(first) = book.paragraph_index_at(start) else {
        return Vec::new();
    };

    let mut boundaries: Vec<usize> = page_text.char_indices().map(|(b, _)| b).collect();
    boundaries.push(page_text.len());

    book.paragraphs[first..]
        .iter()
        .take_while(|p| p.start_offset < end)
        .filter_map(|p| {
            let from = p.start_offset.max(start) - start;
            let to = p.end_offset().min(end) - start;
            (from < to).then(|| PageSegment {
                paragraph_id: p.id.clone(),
                paragraph_ordinal: p.ordinal,
                range: boundaries[from]..boundaries[to],
            })
        })
        .collect()
}

/// Owns the generated page sequence for one book.
#[derive(Debug, Clone)]
pub struct Paginator {
    pages: Vec<Page>,
    text_len: usize,
    chunk_words: usize,
}

impl Paginator {
    pub fn new(text_len: usize, chunk_words: usize) -> Self {
        Self {
            pages: Vec::new(),
            text_len,
            chunk_words,
        }
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn next_start_offset(&self) -> usize {
        next_start_offset(&self.pages)
    }

    pub fn is_exhausted(&self) -> bool {
        self.next_start_offset() >= self.text_len
    }

    /// Generate the next batch. Returns the number of pages added.
    pub fn extend(
        &mut self,
        book: &NormalizedBook,
        oracle: &mut dyn MeasureOracle,
        batch_size: usize,
    ) -> ReaderResult<usize> {
        let added = extend_pages(&self.pages, book, oracle, batch_size, self.chunk_words)?;
        let count = added.len();
        self.pages.extend(added);
        Ok(count)
    }

    /// Generate batches until pages reach `offset` or the text runs out.
    pub fn extend_through(
        &mut self,
        offset: usize,
        book: &NormalizedBook,
        oracle: &mut dyn MeasureOracle,
        batch_size: usize,
    ) -> ReaderResult<()> {
        while self.next_start_offset() <= offset {
            if self.extend(book, oracle, batch_size)? == 0 {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::normalize::normalize;

    /// Fits at most `max_words` space-separated words per page.
    pub(crate) struct WordBudget {
        pub max_words: usize,
        pub calls: Vec<RenderMode>,
        pub passes: usize,
    }

    impl WordBudget {
        pub(crate) fn new(max_words: usize) -> Self {
            Self {
                max_words,
                calls: Vec::new(),
                passes: 0,
            }
        }
    }

    impl MeasureOracle for WordBudget {
        fn capacity(&self) -> i64 {
            self.max_words as i64
        }

        fn overflows(&mut self, text: &str, mode: RenderMode) -> bool {
            self.calls.push(mode);
            text.split(' ').count() > self.max_words
        }

        fn finish_pass(&mut self) {
            self.passes += 1;
        }
    }

    /// Fits at most `max_chars` characters per page.
    struct CharBudget(usize);

    impl MeasureOracle for CharBudget {
        fn capacity(&self) -> i64 {
            self.0 as i64
        }

        fn overflows(&mut self, text: &str, _mode: RenderMode) -> bool {
            text.chars().count() > self.0
        }
    }

    fn counts(pages: &[Page]) -> Vec<usize> {
        pages.iter().map(Page::word_count).collect()
    }

    fn paginate_all(book: &NormalizedBook, oracle: &mut dyn MeasureOracle, batch: usize) -> Vec<Page> {
        let mut paginator = Paginator::new(book.char_len(), DEFAULT_CHUNK_WORDS);
        while paginator.extend(book, oracle, batch).unwrap() > 0 {}
        paginator.pages().to_vec()
    }

    #[test]
    fn three_words_per_page_over_seven_words() {
        let book = normalize("one two three four five six seven", None);
        let mut oracle = WordBudget::new(3);
        let pages = extend_pages(&[], &book, &mut oracle, 20, DEFAULT_CHUNK_WORDS).unwrap();

        assert_eq!(counts(&pages), vec![3, 3, 1]);
        assert_eq!(counts(&pages).iter().sum::<usize>(), 7);
        assert!(pages.iter().all(|p| !p.text.is_empty()));
        assert!(oracle.calls.iter().all(|mode| *mode == RenderMode::Measure));
        assert_eq!(oracle.passes, 1);
    }

    #[test]
    fn batches_resume_where_the_previous_one_ended() {
        let book = normalize("one two three four five six seven", None);
        let mut oracle = WordBudget::new(3);

        let first = extend_pages(&[], &book, &mut oracle, 1, DEFAULT_CHUNK_WORDS).unwrap();
        assert_eq!(counts(&first), vec![3]);

        // The stream runs out during this batch, so the tail page comes along
        // even though it is one more than requested.
        let second = extend_pages(&first, &book, &mut oracle, 1, DEFAULT_CHUNK_WORDS).unwrap();
        assert_eq!(counts(&second), vec![3, 1]);
        assert_eq!(second[0].start_offset, first[0].next_start_offset());

        let mut all = first.clone();
        all.extend(second);
        let third = extend_pages(&all, &book, &mut oracle, 1, DEFAULT_CHUNK_WORDS).unwrap();
        assert!(third.is_empty());
    }

    #[test]
    fn pages_reconstruct_the_text() {
        let raw = "Letter 1\n\nYou will rejoice to hear that no disaster has accompanied the commencement of an enterprise which you have regarded with such evil forebodings.\n\nI arrived here yesterday, and my first task is to assure my dear sister of my welfare and increasing confidence in the success of my undertaking.\n\nChapter 1\n\nI am by birth a Genevese, and my family is one of the most distinguished of that republic.";
        let book = normalize(raw, None);
        for capacity in [1usize, 2, 5, 17, 40, 500] {
            let pages = paginate_all(&book, &mut WordBudget::new(capacity), 3);
            let joined: Vec<&str> = pages.iter().map(|p| p.text.as_str()).collect();
            assert_eq!(joined.join(" "), book.text, "capacity {capacity}");
            assert!(pages.iter().all(|p| p.word_count() <= capacity));
        }
    }

    #[test]
    fn page_offsets_index_into_text() {
        let book = normalize("Caf\u{e9} au lait \u{2014} tr\u{e8}s bien.\n\nEncore une fois, s'il vous pla\u{ee}t.", None);
        let chars: Vec<char> = book.text.chars().collect();
        let pages = paginate_all(&book, &mut CharBudget(12), 2);
        for page in &pages {
            let slice: String = chars[page.start_offset..page.end_offset()].iter().collect();
            assert_eq!(slice, page.text);
        }
    }

    #[test]
    fn batch_size_does_not_change_boundaries() {
        let book = normalize(&"lorem ipsum dolor sit amet ".repeat(40), None);
        let small = paginate_all(&book, &mut CharBudget(37), 1);
        let large = paginate_all(&book, &mut CharBudget(37), 50);
        assert_eq!(small, large);
    }

    #[test]
    fn resuming_over_multibyte_text_matches_a_single_pass() {
        let book = normalize(&"na\u{ef}ve caf\u{e9} \u{2014} d\u{e9}j\u{e0} vu, r\u{e9}sum\u{e9}. ".repeat(30), None);
        let one_by_one = paginate_all(&book, &mut CharBudget(23), 1);
        let single = paginate_all(&book, &mut CharBudget(23), 1000);
        assert_eq!(one_by_one, single);

        let chars: Vec<char> = book.text.chars().collect();
        for page in &one_by_one {
            let slice: String = chars[page.start_offset..page.end_offset()].iter().collect();
            assert_eq!(slice, page.text);
        }
    }

    #[test]
    fn word_cursor_splits_only_what_is_asked_for() {
        let text = "alpha beta gamma delta ".repeat(1000);
        let mut cursor = WordCursor::new(&text, 6, 6);
        assert_eq!(cursor.fill(3), 3);
        let words: Vec<&str> = cursor
            .words()
            .iter()
            .map(|w| &text[w.bytes.0..w.bytes.1])
            .collect();
        assert_eq!(words, vec!["beta", "gamma", "delta"]);
        assert_eq!(cursor.next_byte, 23);
        assert!(!cursor.done);

        let mut short = WordCursor::new("one two", 0, 0);
        assert_eq!(short.fill(10), 2);
        assert!(short.done);
        assert_eq!(short.words()[1].char_start, 4);
    }

    #[test]
    fn oversized_word_gets_its_own_page() {
        let book = normalize("a bbbbbbbbbb c", None);
        let pages = paginate_all(&book, &mut CharBudget(5), 20);
        let texts: Vec<&str> = pages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "bbbbbbbbbb", "c"]);
    }

    #[test]
    fn oversized_first_word_does_not_loop() {
        let book = normalize("supercalifragilistic is long", None);
        let pages = paginate_all(&book, &mut CharBudget(4), 20);
        let texts: Vec<&str> = pages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["supercalifragilistic", "is", "long"]);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let book = normalize("some text", None);
        let err = extend_pages(&[], &book, &mut CharBudget(0), 5, DEFAULT_CHUNK_WORDS).unwrap_err();
        assert!(matches!(err, ReaderError::InvalidSurface { capacity: 0 }));
        assert!(err.is_fatal());
    }

    #[test]
    fn empty_text_is_exhausted_immediately() {
        let book = normalize("", None);
        let mut paginator = Paginator::new(book.char_len(), DEFAULT_CHUNK_WORDS);
        assert!(paginator.is_exhausted());
        assert_eq!(paginator.extend(&book, &mut WordBudget::new(3), 5).unwrap(), 0);
    }

    #[test]
    fn chunked_probing_skips_word_level_checks_when_everything_fits() {
        let book = normalize(&"word ".repeat(60), None);
        let mut oracle = WordBudget::new(1000);
        let pages = extend_pages(&[], &book, &mut oracle, 5, DEFAULT_CHUNK_WORDS).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(oracle.calls.len(), 3);
    }

    #[test]
    fn segments_tag_paragraphs_on_each_page() {
        let book = normalize("Alpha beta gamma.\n\nDelta epsilon.\n\nZeta eta theta iota.", None);
        let pages = paginate_all(&book, &mut WordBudget::new(4), 10);

        // Line breaks ride inside words, so "gamma.\n\nDelta" counts as one.
        let first = &pages[0];
        assert_eq!(first.text, "Alpha beta gamma.\n\nDelta epsilon.\n\nZeta");
        let ids: Vec<&str> = first.segments.iter().map(|s| s.paragraph_id.as_str()).collect();
        assert_eq!(ids, vec!["p_0000", "p_0001", "p_0002"]);
        assert_eq!(first.segment_text(&first.segments[0]), "Alpha beta gamma.");
        assert_eq!(first.segment_text(&first.segments[1]), "Delta epsilon.");
        assert_eq!(first.segment_text(&first.segments[2]), "Zeta");

        let second = &pages[1];
        assert_eq!(second.text, "eta theta iota.");
        assert_eq!(second.segments.len(), 1);
        assert_eq!(second.segments[0].paragraph_id, "p_0002");
    }

    #[test]
    fn split_paragraph_appears_on_both_pages() {
        let book = normalize("one two three four five", None);
        let pages = paginate_all(&book, &mut WordBudget::new(2), 10);
        assert!(pages
            .iter()
            .all(|p| p.segments.len() == 1 && p.segments[0].paragraph_id == "p_0000"));
        assert_eq!(pages[2].segment_text(&pages[2].segments[0]), "five");
    }

    #[test]
    fn extend_through_reaches_offset() {
        let book = normalize(&"alpha beta gamma delta ".repeat(30), None);
        let mut paginator = Paginator::new(book.char_len(), DEFAULT_CHUNK_WORDS);
        let mut oracle = WordBudget::new(4);
        paginator.extend_through(300, &book, &mut oracle, 2).unwrap();
        assert!(paginator.next_start_offset() > 300);

        paginator
            .extend_through(usize::MAX - 1, &book, &mut oracle, 2)
            .unwrap();
        assert!(paginator.is_exhausted());
    }
}
