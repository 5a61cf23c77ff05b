//! Template transport
//!
//! [`TemplateLoader`] is the seam the cache fetches through. Loaders are
//! `Send + Sync` so one cache can serve several views.

use crate::error::TetherError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;
use url::Url;

#[async_trait]
pub trait TemplateLoader: Send + Sync {
    /// Fetch the source text of the template at `path`.
    async fn fetch(&self, path: &str) -> Result<String, TetherError>;
}

fn fetch_error(path: &str, reason: impl ToString) -> TetherError {
    TetherError::Fetch {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

/// Reads templates from disk, relative to a root directory.
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl TemplateLoader for FsLoader {
    async fn fetch(&self, path: &str) -> Result<String, TetherError> {
        let full = self.root.join(path.trim_start_matches('/'));
        debug!(path = %full.display(), "reading template");
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| fetch_error(path, e))
    }
}

/// GETs templates over HTTP(S).
#[derive(Debug, Clone, Default)]
pub struct HttpLoader {
    client: reqwest::Client,
}

impl HttpLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateLoader for HttpLoader {
    async fn fetch(&self, path: &str) -> Result<String, TetherError> {
        debug!(url = path, "fetching template");
        let response = self
            .client
            .get(path)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| fetch_error(path, e))?;
        response.text().await.map_err(|e| fetch_error(path, e))
    }
}

/// HTTP(S) URLs go over the network, everything else to disk.
#[derive(Debug, Clone)]
pub struct DefaultLoader {
    fs: FsLoader,
    http: HttpLoader,
}

impl DefaultLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            fs: FsLoader::new(root),
            http: HttpLoader::new(),
        }
    }
}

pub(crate) fn is_remote(path: &str) -> bool {
    Url::parse(path)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

#[async_trait]
impl TemplateLoader for DefaultLoader {
    async fn fetch(&self, path: &str) -> Result<String, TetherError> {
        if is_remote(path) {
            self.http.fetch(path).await
        } else {
            self.fs.fetch(path).await
        }
    }
}

/// In-memory templates with a fetch counter and an optional simulated
/// latency. Handy for embedding and for tests.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    templates: DashMap<String, String>,
    fetches: AtomicUsize,
    delay: Option<Duration>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn insert(&self, path: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(path.into(), source.into());
    }

    /// How many times `fetch` was called.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TemplateLoader for MemoryLoader {
    async fn fetch(&self, path: &str) -> Result<String, TetherError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.templates
            .get(path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| fetch_error(path, "not found"))
    }
}
