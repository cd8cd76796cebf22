//! The book catalog.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::store::{stored_progress_percent, KeyValueStore, Namespace};

pub const LIBRARY_FILE_NAME: &str = "library.toml";
pub const BOOK_EXTENSION: &str = "txt";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookStatus {
    #[default]
    Available,
    ComingSoon,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub subtitle: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub status: BookStatus,
    /// Overrides the configured normalizer start marker for this book.
    #[serde(default)]
    pub start_marker: Option<String>,
}

impl BookEntry {
    fn from_file_stem(stem: &str) -> Self {
        Self {
            id: stem.to_string(),
            title: title_from_stem(stem),
            subtitle: None,
            author: None,
            year: None,
            status: BookStatus::Available,
            start_marker: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status == BookStatus::Available
    }
}

#[derive(Debug, Deserialize)]
struct LibraryFile {
    #[serde(default, rename = "book")]
    books: Vec<BookEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAction {
    Start,
    Continue,
}

impl ReadAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Start => "Start Reading",
            Self::Continue => "Continue Reading",
        }
    }
}

/// One row of the library screen.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryListing<'a> {
    pub entry: &'a BookEntry,
    pub progress_percent: f64,
    pub action: ReadAction,
}

#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
    books: Vec<BookEntry>,
}

impl Library {
    /// Read `library.toml` under `root`, or list the `.txt` files there when no
    /// catalog file exists.
    pub fn load(root: &Path) -> Result<Self> {
        let catalog = root.join(LIBRARY_FILE_NAME);
        let books = if catalog.exists() {
            let raw = fs::read_to_string(&catalog)
                .with_context(|| format!("failed to read library catalog {:?}", catalog))?;
            let file: LibraryFile = toml::from_str(&raw)
                .with_context(|| format!("failed to parse library catalog {:?}", catalog))?;
            file.books
        } else {
            scan_books(root)?
        };
        tracing::debug!(root = ?root, books = books.len(), "loaded library");
        Ok(Self {
            root: root.to_path_buf(),
            books,
        })
    }

    pub fn from_entries(root: PathBuf, books: Vec<BookEntry>) -> Self {
        Self { root, books }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn books(&self) -> &[BookEntry] {
        &self.books
    }

    pub fn get(&self, id: &str) -> Option<&BookEntry> {
        self.books.iter().find(|book| book.id == id)
    }

    pub fn available(&self) -> impl Iterator<Item = &BookEntry> {
        self.books.iter().filter(|book| book.is_available())
    }

    /// Available books with the reader's stored progress.
    pub fn listing(&self, store: &dyn KeyValueStore, user_id: &str) -> Vec<LibraryListing<'_>> {
        self.available()
            .map(|entry| {
                let progress_percent =
                    stored_progress_percent(store, &Namespace::book(user_id, &entry.id));
                let action = if progress_percent > 0.0 {
                    ReadAction::Continue
                } else {
                    ReadAction::Start
                };
                LibraryListing {
                    entry,
                    progress_percent,
                    action,
                }
            })
            .collect()
    }
}

fn scan_books(root: &Path) -> Result<Vec<BookEntry>> {
    let entries =
        fs::read_dir(root).with_context(|| format!("failed to list library directory {:?}", root))?;
    let mut books: Vec<BookEntry> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().map_or(false, |ext| ext == BOOK_EXTENSION))
        .filter_map(|path| {
            path.file_stem()
                .map(|stem| BookEntry::from_file_stem(&stem.to_string_lossy()))
        })
        .collect();
    books.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(books)
}

fn title_from_stem(stem: &str) -> String {
    stem.split(|c| c == '_' || c == '-')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
