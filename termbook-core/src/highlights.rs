//! Paragraph highlights.
//!
//! Highlights are keyed by paragraph id, so they survive re-pagination.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, TimestampMilliSeconds};

use crate::chapters::ChapterSnapshot;
use crate::error::{ReaderError, ReaderResult};
use crate::normalize::NormalizedBook;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub paragraph_id: String,
    pub text: String,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: SystemTime,
    pub chapter: ChapterSnapshot,
    /// Position of the paragraph in the whole book.
    pub global_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added,
    Removed,
    UnknownParagraph,
}

impl ToggleOutcome {
    pub fn added(&self) -> bool {
        matches!(self, Self::Added)
    }

    pub fn changed(&self) -> bool {
        !matches!(self, Self::UnknownParagraph)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HighlightStore {
    items: Vec<Highlight>,
}

impl HighlightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the store from persisted records, dropping duplicate ids.
    pub fn from_saved(saved: Vec<Highlight>) -> Self {
        let mut store = Self::new();
        for highlight in saved {
            if !store.contains(&highlight.paragraph_id) {
                store.items.push(highlight);
            }
        }
        store
    }

    pub fn contains(&self, paragraph_id: &str) -> bool {
        self.items.iter().any(|h| h.paragraph_id == paragraph_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Records in insertion order, as persisted.
    pub fn records(&self) -> &[Highlight] {
        &self.items
    }

    /// Records ordered by their position in the book.
    pub fn list(&self) -> Vec<&Highlight> {
        let mut sorted: Vec<&Highlight> = self.items.iter().collect();
        sorted.sort_by_key(|h| h.global_index);
        sorted
    }

    /// Flip the highlight on `paragraph_id`. Returns whether a record was added.
    pub fn try_toggle(
        &mut self,
        paragraph_id: &str,
        book: &NormalizedBook,
        chapter: &ChapterSnapshot,
    ) -> ReaderResult<bool> {
        if let Some(idx) = self
            .items
            .iter()
            .position(|h| h.paragraph_id == paragraph_id)
        {
            self.items.remove(idx);
            tracing::debug!(paragraph_id, "removed highlight");
            return Ok(false);
        }

        let paragraph = book
            .paragraph(paragraph_id)
            .ok_or_else(|| ReaderError::UnknownParagraph {
                paragraph_id: paragraph_id.to_string(),
            })?;
        self.items.push(Highlight {
            paragraph_id: paragraph.id.clone(),
            text: paragraph.text.clone(),
            created_at: SystemTime::now(),
            chapter: chapter.clone(),
            global_index: paragraph.ordinal,
        });
        tracing::debug!(paragraph_id, "added highlight");
        Ok(true)
    }

    /// Like [`try_toggle`](Self::try_toggle), but an unknown id is a logged
    /// no-op.
    pub fn toggle(
        &mut self,
        paragraph_id: &str,
        book: &NormalizedBook,
        chapter: &ChapterSnapshot,
    ) -> ToggleOutcome {
        match self.try_toggle(paragraph_id, book, chapter) {
            Ok(true) => ToggleOutcome::Added,
            Ok(false) => ToggleOutcome::Removed,
            Err(err) => {
                tracing::warn!("ignoring highlight toggle: {err}");
                ToggleOutcome::UnknownParagraph
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;

    fn book() -> NormalizedBook {
        normalize("Letter 1\n\nFirst paragraph.\n\nSecond paragraph.", None)
    }

    #[test]
    fn toggle_then_list_then_toggle_again() {
        let book = book();
        let chapter = ChapterSnapshot::default();
        let mut store = HighlightStore::new();

        assert!(store.toggle("p_0000", &book, &chapter).added());
        let listed = store.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].paragraph_id, "p_0000");
        assert_eq!(listed[0].text, "Letter 1");

        assert_eq!(store.toggle("p_0000", &book, &chapter), ToggleOutcome::Removed);
        assert!(store.list().is_empty());
    }

    #[test]
    fn double_toggle_restores_prior_set() {
        let book = book();
        let chapter = ChapterSnapshot::default();
        let mut store = HighlightStore::new();
        store.toggle("p_0001", &book, &chapter);
        let before: Vec<String> = store.records().iter().map(|h| h.paragraph_id.clone()).collect();

        store.toggle("p_0002", &book, &chapter);
        store.toggle("p_0002", &book, &chapter);

        let after: Vec<String> = store.records().iter().map(|h| h.paragraph_id.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn unknown_paragraph_is_a_no_op() {
        let book = book();
        let mut store = HighlightStore::new();
        let outcome = store.toggle("p_9999", &book, &ChapterSnapshot::default());
        assert_eq!(outcome, ToggleOutcome::UnknownParagraph);
        assert!(!outcome.changed());
        assert!(store.is_empty());

        let err = store
            .try_toggle("p_9999", &book, &ChapterSnapshot::default())
            .unwrap_err();
        assert!(matches!(err, ReaderError::UnknownParagraph { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn list_orders_by_position_in_book() {
        let book = book();
        let chapter = ChapterSnapshot {
            name: "Letter 1".to_string(),
            ordinal: 0,
        };
        let mut store = HighlightStore::new();
        store.toggle("p_0002", &book, &chapter);
        store.toggle("p_0000", &book, &chapter);

        let ids: Vec<&str> = store.list().iter().map(|h| h.paragraph_id.as_str()).collect();
        assert_eq!(ids, vec!["p_0000", "p_0002"]);
        assert_eq!(store.records()[0].paragraph_id, "p_0002");
        assert_eq!(store.records()[0].chapter.name, "Letter 1");
    }

    #[test]
    fn saved_duplicates_are_collapsed() {
        let book = book();
        let mut store = HighlightStore::new();
        store.toggle("p_0001", &book, &ChapterSnapshot::default());
        let record = store.records()[0].clone();

        let restored = HighlightStore::from_saved(vec![record.clone(), record]);
        assert_eq!(restored.len(), 1);
    }

    #[test]
    fn records_serialize_with_millisecond_timestamps() {
        let book = book();
        let mut store = HighlightStore::new();
        store.toggle("p_0001", &book, &ChapterSnapshot::default());
        let json = serde_json::to_value(store.records()).unwrap();
        assert!(json[0]["created_at"].is_i64());
        assert_eq!(json[0]["global_index"], 1);
    }
}
