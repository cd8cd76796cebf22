//! Reflowable text pagination and reading state.
//!
//! Raw book text is normalized into paragraphs, split into chapters, and
//! paginated lazily against a [`MeasureOracle`] supplied by the display side.
//! A [`Session`] ties those together with the reader's saved position and
//! highlights.

pub mod chapters;
pub mod config;
pub mod error;
pub mod highlights;
pub mod library;
pub mod normalize;
pub mod paginate;
pub mod position;
pub mod session;
pub mod store;
pub mod view;

pub use chapters::{Chapter, ChapterIndexer, ChapterSnapshot, UNNAMED_CHAPTER};
pub use config::{ReaderConfig, SurfaceConfig, CONFIG_FILE_NAME};
pub use error::{ReaderError, ReaderResult};
pub use highlights::{Highlight, HighlightStore, ToggleOutcome};
pub use library::{BookEntry, BookStatus, Library, LibraryListing, ReadAction};
pub use normalize::{normalize, NormalizedBook, Paragraph, PARAGRAPH_SEPARATOR};
pub use paginate::{extend_pages, MeasureOracle, Page, PageSegment, Paginator, RenderMode};
pub use position::{chapter_progress, offset_of_page, page_for_offset, progress, ReadingPosition};
pub use session::{BookSource, Command, SaveScheduler, Session, SessionEvent};
pub use store::{
    resolve_user_id, FileStore, KeyValueStore, MemoryStore, Namespace, StateKey,
    StoredReadingState,
};
pub use view::{DisplayParagraph, PageView, Span};
