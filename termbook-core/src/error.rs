use thiserror::Error;

/// Failures surfaced by the reading engine.
///
/// Only `SourceUnavailable` and `InvalidSurface` abort an operation. The other
/// two are reported so callers can log them, but navigation and highlighting
/// keep working.
#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("book {book_id:?} could not be loaded: {reason}")]
    SourceUnavailable { book_id: String, reason: String },

    #[error("render surface capacity {capacity} is not usable for pagination")]
    InvalidSurface { capacity: i64 },

    #[error("no paragraph with id {paragraph_id:?}")]
    UnknownParagraph { paragraph_id: String },

    #[error("reading state could not be persisted: {reason}")]
    PersistenceUnavailable { reason: String },
}

impl ReaderError {
    pub fn source_unavailable(book_id: &str, reason: impl ToString) -> Self {
        Self::SourceUnavailable {
            book_id: book_id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::InvalidSurface { .. }
        )
    }
}

pub type ReaderResult<T> = std::result::Result<T, ReaderError>;
