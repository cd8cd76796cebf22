//! Reader configuration.
//!
//! Settings live in a small TOML file. Every section and field is optional;
//! missing or invalid entries fall back to defaults so a broken config never
//! prevents a book from opening.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub normalizer: NormalizerConfig,
    pub chapters: ChapterConfig,
    pub pagination: PaginationConfig,
    pub persistence: PersistenceConfig,
    pub surface: SurfaceConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Text that marks where the book body begins. Everything before the
    /// first occurrence is dropped.
    pub start_marker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChapterConfig {
    /// Section words recognised as `<word> <number>` markers. Earlier entries
    /// sort first when two markers share an offset.
    pub markers: Vec<String>,
}

impl Default for ChapterConfig {
    fn default() -> Self {
        Self {
            markers: vec!["Letter".to_string(), "Chapter".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub batch_size: usize,
    pub chunk_words: usize,
    /// Extend pagination once fewer than this many pages remain ahead of the
    /// current one.
    pub lookahead_pages: usize,
    /// Characters past the saved offset to paginate on a cold start.
    pub restore_window: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            chunk_words: 20,
            lookahead_pages: 2,
            restore_window: 2000,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "debounce_ms")]
    pub debounce: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub paragraph_gap: u16,
    pub margin_columns: u16,
    pub margin_rows: u16,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            paragraph_gap: 1,
            margin_columns: 2,
            margin_rows: 1,
        }
    }
}

impl ReaderConfig {
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "loaded reader config");
                    config
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), "invalid reader config TOML: {err}");
                    Self::default()
                }
            },
            Err(err) => {
                tracing::debug!(path = %path.display(), "using default reader config: {err}");
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}
