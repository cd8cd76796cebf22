//! Durable reading state.
//!
//! Everything the engine persists goes through [`KeyValueStore`]: string values
//! under a fixed set of keys, namespaced by user and book. A missing key means
//! "use the default" and is never an error.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::highlights::Highlight;

static STATE_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3d1f6c2a-8e4b-5f7a-9c0d-2b6e8a4f1c93").expect("valid namespace UUID")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Namespace {
    Global,
    Book { user_id: String, book_id: String },
}

impl Namespace {
    pub fn book(user_id: &str, book_id: &str) -> Self {
        Self::Book {
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
        }
    }

    /// File name stem, distinct for every distinct namespace.
    fn file_stem(&self) -> String {
        match self {
            Self::Global => "global".to_string(),
            Self::Book { user_id, book_id } => {
                // Length prefix keeps the (user, book) split unambiguous.
                let rendered = format!("{}:{}{}", user_id.len(), user_id, book_id);
                format!("book-{}", Uuid::new_v5(&STATE_NAMESPACE, rendered.as_bytes()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    PageIndex,
    SavedOffset,
    Highlights,
    Chapters,
    ProgressPercent,
    UserId,
}

impl StateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PageIndex => "page",
            Self::SavedOffset => "position",
            Self::Highlights => "highlights",
            Self::Chapters => "chapters",
            Self::ProgressPercent => "progress-percent",
            Self::UserId => "user-id",
        }
    }
}

pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, namespace: &Namespace, key: StateKey) -> Result<Option<String>>;
    fn set_item(&self, namespace: &Namespace, key: StateKey, value: &str) -> Result<()>;
}

/// One JSON object per namespace under `root`.
pub struct FileStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    fn namespace_path(&self, namespace: &Namespace) -> PathBuf {
        self.root.join(format!("{}.json", namespace.file_stem()))
    }

    fn read_namespace(&self, namespace: &Namespace) -> Result<HashMap<String, String>> {
        let path = self.namespace_path(namespace);
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let mut file =
            File::open(&path).with_context(|| format!("failed to open state file {:?}", path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let items = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode state file {:?}", path))?;
        Ok(items)
    }
}

impl KeyValueStore for FileStore {
    fn get_item(&self, namespace: &Namespace, key: StateKey) -> Result<Option<String>> {
        let _guard = self.lock.lock();
        Ok(self.read_namespace(namespace)?.remove(key.as_str()))
    }

    fn set_item(&self, namespace: &Namespace, key: StateKey, value: &str) -> Result<()> {
        let _guard = self.lock.lock();
        let mut items = self.read_namespace(namespace)?;
        items.insert(key.as_str().to_string(), value.to_string());

        let path = self.namespace_path(namespace);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(&items)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp state file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<(Namespace, StateKey), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, namespace: &Namespace, key: StateKey) -> Result<Option<String>> {
        Ok(self.inner.lock().get(&(namespace.clone(), key)).cloned())
    }

    fn set_item(&self, namespace: &Namespace, key: StateKey, value: &str) -> Result<()> {
        self.inner
            .lock()
            .insert((namespace.clone(), key), value.to_string());
        Ok(())
    }
}

/// Return the stored reader identity, creating one on first use.
pub fn resolve_user_id(store: &dyn KeyValueStore) -> String {
    match store.get_item(&Namespace::Global, StateKey::UserId) {
        Ok(Some(existing)) if !existing.trim().is_empty() => {
            tracing::debug!(user_id = %existing, "existing user");
            return existing;
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(?err, "failed to read user id"),
    }

    let user_id = format!("user_{}", Uuid::new_v4().simple());
    if let Err(err) = store.set_item(&Namespace::Global, StateKey::UserId, &user_id) {
        tracing::warn!(?err, "failed to store new user id");
    }
    tracing::info!(user_id = %user_id, "created user");
    user_id
}

/// Typed view of the values stored for one book.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredReadingState {
    pub page_index: usize,
    pub saved_offset: usize,
    pub highlights: Vec<Highlight>,
    pub progress_percent: f64,
}

impl StoredReadingState {
    /// Load the state for `namespace`. Unreadable values fall back to their
    /// defaults individually.
    pub fn load(store: &dyn KeyValueStore, namespace: &Namespace) -> Self {
        let read = |key: StateKey| match store.get_item(namespace, key) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(?err, key = key.as_str(), "failed to read reading state");
                None
            }
        };

        let highlights = read(StateKey::Highlights)
            .and_then(|raw| match serde_json::from_str(&raw) {
                Ok(items) => Some(items),
                Err(err) => {
                    tracing::warn!("stored highlights are unreadable: {err}");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            page_index: read(StateKey::PageIndex)
                .map(|raw| parse_index(&raw))
                .unwrap_or(0),
            saved_offset: read(StateKey::SavedOffset)
                .map(|raw| parse_index(&raw))
                .unwrap_or(0),
            highlights,
            progress_percent: read(StateKey::ProgressPercent)
                .and_then(|raw| raw.trim().parse::<f64>().ok())
                .filter(|pct| pct.is_finite())
                .map(|pct| pct.clamp(0.0, 100.0))
                .unwrap_or(0.0),
        }
    }

    pub fn save(&self, store: &dyn KeyValueStore, namespace: &Namespace) -> Result<()> {
        store.set_item(namespace, StateKey::PageIndex, &self.page_index.to_string())?;
        store.set_item(
            namespace,
            StateKey::SavedOffset,
            &self.saved_offset.to_string(),
        )?;
        store.set_item(
            namespace,
            StateKey::Highlights,
            &serde_json::to_string(&self.highlights)?,
        )?;
        store.set_item(
            namespace,
            StateKey::ProgressPercent,
            &format!("{:.1}", self.progress_percent),
        )?;
        Ok(())
    }
}

/// Stored progress for a book, without loading the rest of its state.
pub fn stored_progress_percent(store: &dyn KeyValueStore, namespace: &Namespace) -> f64 {
    store
        .get_item(namespace, StateKey::ProgressPercent)
        .ok()
        .flatten()
        .and_then(|raw| raw.trim().parse::<f64>().ok())
        .filter(|pct| pct.is_finite())
        .map(|pct| pct.clamp(0.0, 100.0))
        .unwrap_or(0.0)
}

/// Parse a stored integer, treating negative and garbage values as 0.
fn parse_index(raw: &str) -> usize {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|value| usize::try_from(value).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapters::ChapterSnapshot;
    use std::time::{Duration, UNIX_EPOCH};

    use tempfile::tempdir;

    fn sample_highlight() -> Highlight {
        Highlight {
            paragraph_id: "p_0003".to_string(),
            text: "It was on a dreary night of November.".to_string(),
            created_at: UNIX_EPOCH + Duration::from_millis(1_700_000_000_123),
            chapter: ChapterSnapshot {
                name: "Chapter 5".to_string(),
                ordinal: 9,
            },
            global_index: 3,
        }
    }

    #[test]
    fn missing_keys_load_as_defaults() {
        let store = MemoryStore::new();
        let state = StoredReadingState::load(&store, &Namespace::book("u", "b"));
        assert_eq!(state, StoredReadingState::default());
    }

    #[test]
    fn garbage_values_load_as_defaults() {
        let store = MemoryStore::new();
        let ns = Namespace::book("u", "b");
        store.set_item(&ns, StateKey::PageIndex, "-4").unwrap();
        store.set_item(&ns, StateKey::SavedOffset, "lots").unwrap();
        store.set_item(&ns, StateKey::Highlights, "[{").unwrap();
        store.set_item(&ns, StateKey::ProgressPercent, "NaN").unwrap();

        let state = StoredReadingState::load(&store, &ns);
        assert_eq!(state, StoredReadingState::default());
    }

    #[test]
    fn file_store_round_trips_reading_state() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state")).unwrap();
        let ns = Namespace::book("user_1", "frankenstein");

        let state = StoredReadingState {
            page_index: 7,
            saved_offset: 12_345,
            highlights: vec![sample_highlight()],
            progress_percent: 42.26,
        };
        state.save(&store, &ns).unwrap();

        let restored = StoredReadingState::load(&store, &ns);
        assert_eq!(restored.page_index, 7);
        assert_eq!(restored.saved_offset, 12_345);
        assert_eq!(restored.highlights, vec![sample_highlight()]);
        assert_eq!(
            store.get_item(&ns, StateKey::ProgressPercent).unwrap().as_deref(),
            Some("42.3")
        );
        assert!((stored_progress_percent(&store, &ns) - 42.3).abs() < 1e-9);
    }

    #[test]
    fn file_store_keeps_namespaces_apart() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().to_path_buf()).unwrap();
        let pairs = [
            (Namespace::book("user/1", "book"), Namespace::book("user_1", "book")),
            (Namespace::book("a--b", "c"), Namespace::book("a", "b--c")),
            (Namespace::book("ab", "c"), Namespace::book("a", "bc")),
        ];

        for (a, b) in &pairs {
            store.set_item(a, StateKey::SavedOffset, "999").unwrap();
            assert_eq!(store.get_item(b, StateKey::SavedOffset).unwrap(), None);
            assert_eq!(
                store.get_item(a, StateKey::SavedOffset).unwrap().as_deref(),
                Some("999")
            );
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), pairs.len());
    }

    #[test]
    fn user_id_is_created_once() {
        let store = MemoryStore::new();
        let first = resolve_user_id(&store);
        let second = resolve_user_id(&store);
        assert!(first.starts_with("user_"));
        assert_eq!(first, second);
    }
}
