//! On-disk response cache in front of any [`LanguageModel`].
//!
//! Entries are keyed by a SHA-256 of the prompt and generation parameters,
//! so re-running an unchanged epic does not pay for the same completions
//! twice. Only successful responses are stored.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{LanguageModel, ModelError, ModelRequest};

/// Distinguishes concurrent temp files for the same entry
static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    content: String,
}

/// Caching decorator
pub struct CachedModel {
    inner: Arc<dyn LanguageModel>,
    dir: PathBuf,
    hits: AtomicUsize,
}

impl CachedModel {
    pub fn new(inner: Arc<dyn LanguageModel>, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
            hits: AtomicUsize::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Requests answered from disk since construction
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    async fn lookup(&self, key: &str) -> Option<String> {
        let bytes = tokio::fs::read(self.entry_path(key)).await.ok()?;
        serde_json::from_slice::<CacheEntry>(&bytes)
            .ok()
            .map(|entry| entry.content)
    }

    async fn store(&self, key: &str, content: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let entry = CacheEntry {
            content: content.to_string(),
        };
        let json = serde_json::to_vec_pretty(&entry)?;

        let path = self.entry_path(key);
        let seq = WRITE_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("json.{}.{}.tmp", std::process::id(), seq));
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &path).await
    }
}

/// Hex SHA-256 over everything that affects the completion
pub fn cache_key(request: &ModelRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.params.model.as_bytes());
    hasher.update(b"\0");
    hasher.update(request.params.max_tokens.to_le_bytes());
    hasher.update(request.params.temperature.to_le_bytes());
    hasher.update(b"\0");
    hasher.update(request.prompt.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl LanguageModel for CachedModel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let key = cache_key(request);

        if let Some(content) = self.lookup(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %&key[..12], "Cache hit");
            return Ok(content);
        }

        let content = self.inner.generate(request).await?;

        if let Err(e) = self.store(&key, &content).await {
            warn!(error = %e, dir = %self.dir.display(), "Failed to write cache entry");
        }

        Ok(content)
    }
}
