//! Page index / text offset conversion and progress fractions.

use crate::chapters::Chapter;
use crate::paginate::{next_start_offset, Page};

/// Text offset where page `index` begins.
///
/// `index == pages.len()` yields the offset just past the last known page.
/// Larger indices are clamped to that.
pub fn offset_of_page(pages: &[Page], index: usize) -> usize {
    match pages.get(index) {
        Some(page) => page.start_offset,
        None => next_start_offset(pages),
    }
}

/// Index of the page whose `[start, start + len)` range contains `offset`, or
/// 0 when no generated page does.
pub fn page_for_offset(pages: &[Page], offset: usize) -> usize {
    let idx = pages.partition_point(|page| page.end_offset() <= offset);
    match pages.get(idx) {
        Some(page) if page.start_offset <= offset => idx,
        _ => 0,
    }
}

/// Fraction of the book before `offset`, in `[0, 1]`.
pub fn progress(offset: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (offset as f64 / total as f64).clamp(0.0, 1.0)
}

pub fn chapter_at(chapters: &[Chapter], offset: usize) -> Option<&Chapter> {
    let idx = chapters.partition_point(|chapter| chapter.end_offset <= offset);
    chapters.get(idx).filter(|chapter| chapter.contains(offset))
}

/// Fraction of the containing chapter before `offset`; 0 outside every chapter.
pub fn chapter_progress(offset: usize, chapters: &[Chapter]) -> f64 {
    match chapter_at(chapters, offset) {
        Some(chapter) if !chapter.is_empty() => {
            ((offset - chapter.start_offset) as f64 / chapter.len() as f64).clamp(0.0, 1.0)
        }
        _ => 0.0,
    }
}

/// The reader's current page index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadingPosition {
    page_index: usize,
}

impl ReadingPosition {
    pub fn new(page_index: usize) -> Self {
        Self { page_index }
    }

    pub fn page_index(&self) -> usize {
        self.page_index
    }

    /// Step forward. The index may pass the last generated page; callers
    /// extend pages or [`repair`](Self::repair) afterwards.
    pub fn advance(&mut self, count: usize) {
        self.page_index = self.page_index.saturating_add(count);
    }

    pub fn retreat(&mut self, count: usize) {
        self.page_index = self.page_index.saturating_sub(count);
    }

    pub fn jump_to(&mut self, page_index: usize) {
        self.page_index = page_index;
    }

    /// Whether fewer than `lookahead` pages remain past the current one.
    pub fn needs_pages(&self, page_count: usize, lookahead: usize) -> bool {
        self.page_index.saturating_add(lookahead) >= page_count
    }

    /// Reset an out-of-range index to the first page. Returns whether it was
    /// out of range.
    pub fn repair(&mut self, page_count: usize) -> bool {
        if self.page_index >= page_count {
            tracing::debug!(page_index = self.page_index, page_count, "page index out of range; resetting");
            self.page_index = 0;
            true
        } else {
            false
        }
    }
}
