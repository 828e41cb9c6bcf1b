use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use crate::error::CacheError;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Local persistence of a working set, keyed by collection.
#[async_trait]
pub trait ExportCache: Send + Sync {
    /// Records saved for `key`, or `None` when absent or expired.
    async fn load(&self, key: &str) -> Result<Option<Vec<Value>>, CacheError>;

    async fn save(&self, key: &str, records: &[Value]) -> Result<(), CacheError>;

    async fn clear(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheEntry<R> {
    #[serde(with = "time::serde::rfc3339")]
    saved_at: OffsetDateTime,
    records: R,
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    root: PathBuf,
    ttl: Duration,
}

impl FileCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name is the url-safe base64 of the key, so distinct keys never
    /// share an entry.
    pub fn entry_path(&self, key: &str) -> PathBuf {
        let file = URL_SAFE_NO_PAD.encode(key.as_bytes());
        self.root.join(format!("{file}.json"))
    }

    fn is_expired(&self, saved_at: OffsetDateTime) -> bool {
        let age = OffsetDateTime::now_utc() - saved_at;
        age > self.ttl
    }
}

#[async_trait]
impl ExportCache for FileCache {
    async fn load(&self, key: &str) -> Result<Option<Vec<Value>>, CacheError> {
        let path = self.entry_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        let entry: CacheEntry<Vec<Value>> = serde_json::from_slice(&bytes)
            .map_err(|source| CacheError::Corrupt {
                path: path.clone(),
                source,
            })?;
        if self.is_expired(entry.saved_at) {
            debug!(key, saved_at = %entry.saved_at, "cache entry expired");
            self.clear(key).await?;
            return Ok(None);
        }
        Ok(Some(entry.records))
    }

    async fn save(&self, key: &str, records: &[Value]) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| CacheError::Io {
                path: self.root.clone(),
                source,
            })?;
        let entry = CacheEntry {
            saved_at: OffsetDateTime::now_utc(),
            records,
        };
        let bytes = serde_json::to_vec(&entry)?;
        let path = self.entry_path(key);
        let staging = path.with_extension("json.tmp");
        tokio::fs::write(&staging, bytes)
            .await
            .map_err(|source| CacheError::Io {
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|source| CacheError::Io { path, source })
    }

    async fn clear(&self, key: &str) -> Result<(), CacheError> {
        let path = self.entry_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }
}
