//! Chapter boundary detection.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ChapterConfig;
use crate::store::{KeyValueStore, Namespace, StateKey};

/// Name given to chapters that have no marker of their own.
pub const UNNAMED_CHAPTER: &str = "Unnamed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub name: String,
    pub ordinal: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Chapter {
    pub fn len(&self) -> usize {
        self.end_offset.saturating_sub(self.start_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start_offset && offset < self.end_offset
    }

    pub fn snapshot(&self) -> ChapterSnapshot {
        ChapterSnapshot {
            name: self.name.clone(),
            ordinal: self.ordinal,
        }
    }
}

/// The chapter a highlight or reading state was recorded in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterSnapshot {
    pub name: String,
    pub ordinal: usize,
}

impl Default for ChapterSnapshot {
    fn default() -> Self {
        Self {
            name: "Unknown".to_string(),
            ordinal: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChapterIndexer {
    patterns: Vec<Regex>,
}

impl ChapterIndexer {
    pub fn new(config: &ChapterConfig) -> Self {
        let patterns = config
            .markers
            .iter()
            .filter(|word| !word.trim().is_empty())
            .filter_map(|word| {
                let pattern = format!(r"\b{} \d+\b", regex::escape(word.trim()));
                match Regex::new(&pattern) {
                    Ok(re) => Some(re),
                    Err(err) => {
                        tracing::warn!(marker = %word, "skipping chapter marker: {err}");
                        None
                    }
                }
            })
            .collect();
        Self { patterns }
    }

    /// Build the boundary table for `text`.
    ///
    /// The result is contiguous and covers `[0, text length)`. Text before the
    /// first marker becomes an unnamed leading chapter. Markers sharing an
    /// offset keep the order of their patterns.
    pub fn index(&self, text: &str) -> Vec<Chapter> {
        let text_len = text.chars().count();

        let mut markers: Vec<(usize, String)> = Vec::new();
        for pattern in &self.patterns {
            for found in pattern.find_iter(text) {
                markers.push((found.start(), found.as_str().to_string()));
            }
        }
        // Stable sort keeps pattern order for ties.
        markers.sort_by_key(|(byte_offset, _)| *byte_offset);

        let mut starts: Vec<(usize, String)> = Vec::with_capacity(markers.len() + 1);
        let mut counted_bytes = 0usize;
        let mut counted_chars = 0usize;
        for (byte_offset, name) in markers {
            counted_chars += text[counted_bytes..byte_offset].chars().count();
            counted_bytes = byte_offset;
            starts.push((counted_chars, name));
        }

        match starts.first() {
            None => starts.push((0, UNNAMED_CHAPTER.to_string())),
            Some((first, _)) if *first > 0 => starts.insert(0, (0, UNNAMED_CHAPTER.to_string())),
            Some(_) => {}
        }

        let ends: Vec<usize> = starts
            .iter()
            .skip(1)
            .map(|(start, _)| *start)
            .chain(std::iter::once(text_len))
            .collect();

        starts
            .into_iter()
            .zip(ends)
            .enumerate()
            .map(|(ordinal, ((start_offset, name), end_offset))| Chapter {
                name,
                ordinal,
                start_offset,
                end_offset,
            })
            .collect()
    }

    /// Return the cached boundary table for `namespace`, indexing and storing
    /// it on a miss. A cached table is trusted as-is.
    pub fn load_or_index(
        &self,
        store: &dyn KeyValueStore,
        namespace: &Namespace,
        text: &str,
    ) -> Vec<Chapter> {
        match store.get_item(namespace, StateKey::Chapters) {
            Ok(Some(cached)) => match serde_json::from_str::<Vec<Chapter>>(&cached) {
                Ok(chapters) if !chapters.is_empty() => {
                    tracing::debug!(chapters = chapters.len(), "using cached chapter table");
                    return chapters;
                }
                Ok(_) => tracing::warn!("cached chapter table is empty; rebuilding"),
                Err(err) => tracing::warn!("cached chapter table is unreadable: {err}"),
            },
            Ok(None) => {}
            Err(err) => tracing::warn!(?err, "failed to read chapter cache"),
        }

        let chapters = self.index(text);
        match serde_json::to_string(&chapters) {
            Ok(payload) => {
                if let Err(err) = store.set_item(namespace, StateKey::Chapters, &payload) {
                    tracing::warn!(?err, "failed to store chapter cache");
                }
            }
            Err(err) => tracing::warn!("failed to serialize chapter table: {err}"),
        }
        tracing::info!(chapters = chapters.len(), "indexed chapters");
        chapters
    }
}

impl Default for ChapterIndexer {
    fn default() -> Self {
        Self::new(&ChapterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn assert_exhaustive(chapters: &[Chapter], text_len: usize) {
        assert_eq!(chapters.first().map(|c| c.start_offset), Some(0));
        for pair in chapters.windows(2) {
            assert_eq!(pair[0].end_offset, pair[1].start_offset);
        }
        assert_eq!(chapters.last().map(|c| c.end_offset), Some(text_len));
    }

    #[test]
    fn letter_and_chapter_markers_split_text() {
        let text = "Letter 1\n\nHello world. This is a test.\n\nChapter 1\n\nMore text here.";
        let chapters = ChapterIndexer::default().index(text);
        let x = text.find("Chapter 1").unwrap();

        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].name, "Letter 1");
        assert_eq!((chapters[0].start_offset, chapters[0].end_offset), (0, x));
        assert_eq!(chapters[1].name, "Chapter 1");
        assert_eq!(
            (chapters[1].start_offset, chapters[1].end_offset),
            (x, text.len())
        );
        assert_exhaustive(&chapters, text.len());
    }

    #[test]
    fn no_markers_yields_single_unnamed_chapter() {
        let text = "Just some prose without any headings.";
        let chapters = ChapterIndexer::default().index(text);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].name, UNNAMED_CHAPTER);
        assert_exhaustive(&chapters, text.len());
    }

    #[test]
    fn empty_text_yields_one_empty_chapter() {
        let chapters = ChapterIndexer::default().index("");
        assert_eq!(chapters.len(), 1);
        assert!(chapters[0].is_empty());
    }

    #[test]
    fn text_before_first_marker_is_a_leading_chapter() {
        let text = "Preface words.\n\nChapter 1\n\nBody.";
        let chapters = ChapterIndexer::default().index(text);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].name, UNNAMED_CHAPTER);
        assert_eq!(chapters[1].name, "Chapter 1");
        assert_eq!(chapters[1].ordinal, 1);
        assert_exhaustive(&chapters, text.len());
    }

    #[test]
    fn markers_are_case_sensitive_and_word_bounded() {
        let text = "chapter 1 is lowercase. Chapter 12b is glued. Chapter 3 counts.";
        let chapters = ChapterIndexer::default().index(text);
        let names: Vec<&str> = chapters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![UNNAMED_CHAPTER, "Chapter 3"]);
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        let text = "Letter 1 \u{2014} caf\u{e9}.\n\nChapter 2 text";
        let chapters = ChapterIndexer::default().index(text);
        let expected = text[..text.find("Chapter 2").unwrap()].chars().count();
        assert_eq!(chapters[1].start_offset, expected);
        assert_exhaustive(&chapters, text.chars().count());
    }

    #[test]
    fn ties_follow_marker_order() {
        // "Part 1 2" matches both markers at offset 0.
        let text = "Part 1 2 begins here.";
        let index = |markers: &[&str]| {
            let config = ChapterConfig {
                markers: markers.iter().map(|m| m.to_string()).collect(),
            };
            ChapterIndexer::new(&config).index(text)
        };

        let chapters = index(&["Part 1", "Part"]);
        let names: Vec<&str> = chapters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Part 1 2", "Part 1"]);
        assert!(chapters[0].is_empty());
        assert_exhaustive(&chapters, text.len());

        let chapters = index(&["Part", "Part 1"]);
        let names: Vec<&str> = chapters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Part 1", "Part 1 2"]);
        assert!(chapters[0].is_empty());
    }

    #[test]
    fn cache_hit_skips_indexing() {
        let store = MemoryStore::new();
        let ns = Namespace::book("user", "book");
        let indexer = ChapterIndexer::default();

        let first = indexer.load_or_index(&store, &ns, "Letter 1\n\nText.");
        assert_eq!(first[0].name, "Letter 1");

        // Different text, same namespace: the cached table wins.
        let second = indexer.load_or_index(&store, &ns, "Chapter 9\n\nOther.");
        assert_eq!(second, first);
    }

    #[test]
    fn unreadable_cache_is_rebuilt() {
        let store = MemoryStore::new();
        let ns = Namespace::book("user", "book");
        store.set_item(&ns, StateKey::Chapters, "not json").unwrap();

        let chapters = ChapterIndexer::default().load_or_index(&store, &ns, "Chapter 1 x");
        assert_eq!(chapters[0].name, "Chapter 1");
        let stored = store.get_item(&ns, StateKey::Chapters).unwrap().unwrap();
        assert!(stored.contains("Chapter 1"));
    }
}
