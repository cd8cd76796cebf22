//! One open book and the reader's place in it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::instrument;

use crate::chapters::{Chapter, ChapterIndexer, ChapterSnapshot};
use crate::config::ReaderConfig;
use crate::error::{ReaderError, ReaderResult};
use crate::highlights::{HighlightStore, ToggleOutcome};
use crate::normalize::{normalize, NormalizedBook};
use crate::paginate::{MeasureOracle, Page, Paginator};
use crate::position::{
    chapter_at, chapter_progress, offset_of_page, page_for_offset, progress, ReadingPosition,
};
use crate::store::{KeyValueStore, Namespace, StoredReadingState};
use crate::view::{display_paragraphs, PageView};

/// Where raw book text comes from.
#[async_trait::async_trait]
pub trait BookSource: Send + Sync {
    async fn fetch(&self, book_id: &str) -> ReaderResult<String>;
}

#[derive(Debug, Clone)]
pub enum Command {
    NextPage { count: usize },
    PrevPage { count: usize },
    GotoStart,
    GotoOffset { offset: usize },
    GotoChapter { ordinal: usize },
    ToggleHighlight { paragraph_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Loaded { book_id: String },
    RedrawNeeded,
    HighlightToggled { paragraph_id: String, added: bool },
    StateSaved,
    PersistenceFailed { reason: String },
}

/// Debounce timer for position saves.
#[derive(Debug, Clone)]
pub struct SaveScheduler {
    delay: Duration,
    deadline: Option<Instant>,
}

impl SaveScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Push the deadline back to `now + delay`.
    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Clear and report a deadline that has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

pub struct Session {
    book_id: String,
    namespace: Namespace,
    config: ReaderConfig,
    book: NormalizedBook,
    chapters: Vec<Chapter>,
    paginator: Paginator,
    position: ReadingPosition,
    highlights: HighlightStore,
    current_chapter: ChapterSnapshot,
    store: Arc<dyn KeyValueStore>,
    saves: SaveScheduler,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl Session {
    /// Fetch `book_id` and open it at the reader's saved position.
    #[instrument(skip(source, store, config, oracle))]
    pub async fn open<S: BookSource + ?Sized>(
        source: &S,
        store: Arc<dyn KeyValueStore>,
        user_id: &str,
        book_id: &str,
        config: ReaderConfig,
        oracle: &mut dyn MeasureOracle,
    ) -> ReaderResult<Self> {
        let raw = source.fetch(book_id).await?;
        Self::load(&raw, store, user_id, book_id, config, oracle)
    }

    /// Open already fetched text.
    pub fn load(
        raw: &str,
        store: Arc<dyn KeyValueStore>,
        user_id: &str,
        book_id: &str,
        config: ReaderConfig,
        oracle: &mut dyn MeasureOracle,
    ) -> ReaderResult<Self> {
        let namespace = Namespace::book(user_id, book_id);
        let book = normalize(raw, config.normalizer.start_marker.as_deref());
        let chapters =
            ChapterIndexer::new(&config.chapters).load_or_index(store.as_ref(), &namespace, &book.text);
        let saved = StoredReadingState::load(store.as_ref(), &namespace);

        let mut session = Self {
            book_id: book_id.to_string(),
            namespace,
            paginator: Paginator::new(book.char_len(), config.pagination.chunk_words),
            saves: SaveScheduler::new(config.persistence.debounce),
            config,
            book,
            chapters,
            position: ReadingPosition::default(),
            highlights: HighlightStore::from_saved(saved.highlights),
            current_chapter: ChapterSnapshot::default(),
            store,
            events: Arc::new(Mutex::new(Vec::new())),
        };
        session.restore(saved.saved_offset, oracle)?;
        session.update_current_chapter();

        tracing::info!(
            book_id,
            page = session.position.page_index(),
            offset = saved.saved_offset,
            chapters = session.chapters.len(),
            highlights = session.highlights.len(),
            "opened book"
        );
        session.events.lock().push(SessionEvent::Loaded {
            book_id: book_id.to_string(),
        });
        Ok(session)
    }

    fn restore(&mut self, saved_offset: usize, oracle: &mut dyn MeasureOracle) -> ReaderResult<()> {
        let batch = self.config.pagination.batch_size;
        if saved_offset == 0 {
            self.paginator.extend(&self.book, oracle, batch)?;
            self.position.jump_to(0);
            return Ok(());
        }

        let target = saved_offset.saturating_add(self.config.pagination.restore_window);
        loop {
            let added = self.paginator.extend(&self.book, oracle, batch)?;
            if added == 0 || self.paginator.next_start_offset() >= target {
                break;
            }
        }
        self.position
            .jump_to(page_for_offset(self.paginator.pages(), saved_offset));
        tracing::debug!(
            saved_offset,
            page = self.position.page_index(),
            generated = self.paginator.len(),
            "restored reading position"
        );
        Ok(())
    }

    pub fn events(&self) -> Arc<Mutex<Vec<SessionEvent>>> {
        Arc::clone(&self.events)
    }

    pub fn book_id(&self) -> &str {
        &self.book_id
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn book(&self) -> &NormalizedBook {
        &self.book
    }

    pub fn chapters(&self) -> &[Chapter] {
        &self.chapters
    }

    pub fn pages(&self) -> &[Page] {
        self.paginator.pages()
    }

    pub fn is_exhausted(&self) -> bool {
        self.paginator.is_exhausted()
    }

    pub fn page_index(&self) -> usize {
        self.position.page_index()
    }

    pub fn current_page(&self) -> Option<&Page> {
        self.paginator.page(self.position.page_index())
    }

    /// Text offset of the current page.
    pub fn offset(&self) -> usize {
        offset_of_page(self.paginator.pages(), self.position.page_index())
    }

    pub fn progress(&self) -> f64 {
        progress(self.offset(), self.book.char_len())
    }

    pub fn chapter_progress(&self) -> f64 {
        chapter_progress(self.chapter_anchor(), &self.chapters)
    }

    /// Offset used to place the current page in a chapter: the start of the
    /// first paragraph that begins on the page, else the page start.
    fn chapter_anchor(&self) -> usize {
        let Some(page) = self.current_page() else {
            return self.offset();
        };
        page.segments
            .iter()
            .filter_map(|segment| self.book.paragraphs.get(segment.paragraph_ordinal))
            .map(|paragraph| paragraph.start_offset)
            .find(|start| *start >= page.start_offset)
            .unwrap_or(page.start_offset)
    }

    pub fn current_chapter(&self) -> &ChapterSnapshot {
        &self.current_chapter
    }

    pub fn highlights(&self) -> &HighlightStore {
        &self.highlights
    }

    pub fn save_pending(&self) -> bool {
        self.saves.is_pending()
    }

    pub fn save_deadline(&self) -> Option<Instant> {
        self.saves.deadline()
    }

    pub fn apply(&mut self, command: Command, oracle: &mut dyn MeasureOracle) -> ReaderResult<()> {
        match command {
            Command::NextPage { count } => {
                let current = self.position.page_index();
                self.position.advance(count);
                self.ensure_lookahead(oracle)?;
                self.position.repair(self.paginator.len());
                self.settle_if_moved(current);
            }
            Command::PrevPage { count } => {
                let current = self.position.page_index();
                self.position.retreat(count);
                self.position.repair(self.paginator.len());
                self.settle_if_moved(current);
            }
            Command::GotoStart => {
                let current = self.position.page_index();
                self.position.jump_to(0);
                self.settle_if_moved(current);
            }
            Command::GotoOffset { offset } => {
                self.goto_offset(offset, oracle)?;
            }
            Command::GotoChapter { ordinal } => match self.chapters.get(ordinal) {
                Some(chapter) => {
                    let offset = chapter.start_offset;
                    self.goto_offset(offset, oracle)?;
                }
                None => tracing::warn!(ordinal, "no such chapter"),
            },
            Command::ToggleHighlight { paragraph_id } => {
                let outcome =
                    self.highlights
                        .toggle(&paragraph_id, &self.book, &self.current_chapter);
                if outcome == ToggleOutcome::UnknownParagraph {
                    return Ok(());
                }
                self.events.lock().push(SessionEvent::HighlightToggled {
                    paragraph_id,
                    added: outcome.added(),
                });
                self.events.lock().push(SessionEvent::RedrawNeeded);
                self.save_now();
            }
        }
        Ok(())
    }

    fn goto_offset(&mut self, offset: usize, oracle: &mut dyn MeasureOracle) -> ReaderResult<()> {
        let batch = self.config.pagination.batch_size;
        self.paginator
            .extend_through(offset, &self.book, oracle, batch)?;
        self.position
            .jump_to(page_for_offset(self.paginator.pages(), offset));
        self.ensure_lookahead(oracle)?;
        self.settled();
        Ok(())
    }

    /// Generate pages until the lookahead past the current index is covered or
    /// the text runs out.
    fn ensure_lookahead(&mut self, oracle: &mut dyn MeasureOracle) -> ReaderResult<()> {
        let lookahead = self.config.pagination.lookahead_pages;
        let batch = self.config.pagination.batch_size;
        while self.position.needs_pages(self.paginator.len(), lookahead)
            && !self.paginator.is_exhausted()
        {
            if self.paginator.extend(&self.book, oracle, batch)? == 0 {
                break;
            }
        }
        Ok(())
    }

    /// Rebuild the pages for a new surface and return to the current offset.
    ///
    /// The book, chapter table and highlights stay as they are in memory.
    /// A surface without capacity is rejected before anything is discarded.
    pub fn repaginate(&mut self, oracle: &mut dyn MeasureOracle) -> ReaderResult<()> {
        let capacity = oracle.capacity();
        if capacity <= 0 {
            return Err(ReaderError::InvalidSurface { capacity });
        }

        let offset = self.offset();
        let batch = self.config.pagination.batch_size;
        self.paginator = Paginator::new(self.book.char_len(), self.config.pagination.chunk_words);
        self.paginator
            .extend_through(offset, &self.book, oracle, batch)?;
        self.position
            .jump_to(page_for_offset(self.paginator.pages(), offset));
        self.ensure_lookahead(oracle)?;
        tracing::debug!(
            offset,
            page = self.position.page_index(),
            generated = self.paginator.len(),
            "repaginated"
        );
        self.settled();
        Ok(())
    }

    fn settle_if_moved(&mut self, previous: usize) {
        if self.position.page_index() != previous {
            self.settled();
        }
    }

    fn settled(&mut self) {
        self.update_current_chapter();
        self.saves.schedule(Instant::now());
        self.events.lock().push(SessionEvent::RedrawNeeded);
    }

    fn update_current_chapter(&mut self) {
        self.current_chapter = chapter_at(&self.chapters, self.chapter_anchor())
            .map(Chapter::snapshot)
            .unwrap_or_default();
    }

    /// Build the display stream for the current page.
    pub fn view(&mut self) -> PageView {
        self.update_current_chapter();
        let paragraphs = self
            .current_page()
            .map(|page| display_paragraphs(page, &self.highlights))
            .unwrap_or_default();
        PageView {
            page_index: self.position.page_index(),
            pages_known: self.paginator.len(),
            exhausted: self.paginator.is_exhausted(),
            paragraphs,
            progress: self.progress(),
            chapter_progress: self.chapter_progress(),
            chapter: self.current_chapter.clone(),
        }
    }

    /// Save if the debounce deadline has passed. Returns whether a save ran.
    pub fn tick(&mut self, now: Instant) -> ReaderResult<bool> {
        if !self.saves.take_due(now) {
            return Ok(false);
        }
        self.persist()?;
        Ok(true)
    }

    /// Save immediately, dropping any pending debounced save.
    pub fn save_now(&mut self) {
        self.saves.cancel();
        if let Err(err) = self.persist() {
            tracing::debug!("continuing without saved state: {err}");
        }
    }

    /// Save if a debounced save is still pending.
    pub fn flush(&mut self) -> ReaderResult<()> {
        if self.saves.is_pending() {
            self.saves.cancel();
            self.persist()?;
        }
        Ok(())
    }

    fn reading_state(&self) -> StoredReadingState {
        let saved_offset = self.offset();
        StoredReadingState {
            page_index: self.position.page_index(),
            saved_offset,
            highlights: self.highlights.records().to_vec(),
            progress_percent: progress(saved_offset, self.book.char_len()) * 100.0,
        }
    }

    /// Write the reading state, retrying a failed write once.
    pub fn persist(&mut self) -> ReaderResult<()> {
        let state = self.reading_state();
        let result = state
            .save(self.store.as_ref(), &self.namespace)
            .or_else(|err| {
                tracing::debug!(?err, "retrying reading state save");
                state.save(self.store.as_ref(), &self.namespace)
            });

        match result {
            Ok(()) => {
                tracing::debug!(
                    page = state.page_index,
                    offset = state.saved_offset,
                    "saved reading state"
                );
                self.events.lock().push(SessionEvent::StateSaved);
                Ok(())
            }
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::warn!(book_id = %self.book_id, "failed to save reading state: {reason}");
                self.events.lock().push(SessionEvent::PersistenceFailed {
                    reason: reason.clone(),
                });
                Err(ReaderError::PersistenceUnavailable { reason })
            }
        }
    }
}
