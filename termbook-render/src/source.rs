//! Places raw book text can be fetched from.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use termbook_core::library::BOOK_EXTENSION;
use termbook_core::{BookSource, ReaderError, ReaderResult};
use tracing::instrument;

const GUTENBERG_START: &str = "*** START OF";
const GUTENBERG_END: &str = "*** END OF";

/// Drop Project Gutenberg front and back matter when both banners are present.
pub fn trim_gutenberg(raw: &str) -> &str {
    let Some(start_banner) = raw.find(GUTENBERG_START) else {
        return raw;
    };
    let body_start = raw[start_banner..]
        .find('\n')
        .map(|idx| start_banner + idx + 1)
        .unwrap_or(raw.len());
    match raw[body_start..].find(GUTENBERG_END) {
        Some(end) => &raw[body_start..body_start + end],
        None => raw,
    }
}

/// Books stored as `<root>/<id>.txt`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, book_id: &str) -> Result<PathBuf> {
        if book_id.is_empty() || book_id.contains(['/', '\\']) || book_id.starts_with('.') {
            bail!("invalid book id");
        }
        Ok(self.root.join(format!("{book_id}.{BOOK_EXTENSION}")))
    }

    fn read(&self, book_id: &str) -> Result<String> {
        let path = self.path_for(book_id)?;
        let raw = fs::read_to_string(&path).with_context(|| format!("failed to read {:?}", path))?;
        Ok(trim_gutenberg(&raw).to_string())
    }
}

#[async_trait]
impl BookSource for DirectorySource {
    #[instrument(skip(self))]
    async fn fetch(&self, book_id: &str) -> ReaderResult<String> {
        self.read(book_id)
            .map_err(|err| ReaderError::source_unavailable(book_id, format!("{err:#}")))
    }
}

/// Books served over HTTP at `<base_url>/<id>`.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn book_url(&self, book_id: &str) -> String {
        format!("{}/{}", self.base_url, book_id)
    }

    async fn get(&self, book_id: &str) -> Result<String> {
        let url = self.book_url(book_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("{url} answered {status}");
        }
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read body from {url}"))?;
        Ok(trim_gutenberg(&body).to_string())
    }
}

#[async_trait]
impl BookSource for HttpSource {
    #[instrument(skip(self))]
    async fn fetch(&self, book_id: &str) -> ReaderResult<String> {
        self.get(book_id)
            .await
            .map_err(|err| ReaderError::source_unavailable(book_id, format!("{err:#}")))
    }
}
