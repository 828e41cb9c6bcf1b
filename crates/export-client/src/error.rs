use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The read was cancelled on purpose (hidden, navigated away, superseded).
    #[error("read aborted")]
    Aborted,
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid base url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot carry a path: {0}")]
    BaseUrl(String),
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    pub fn is_abort(&self) -> bool {
        matches!(self, TransportError::Aborted)
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to access cache entry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache entry {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("export stream failed: {0}")]
    Failed(String),
    #[error("export stream was aborted before completion")]
    Aborted,
    #[error("no records arrived for {0:?}")]
    Stalled(Duration),
}
