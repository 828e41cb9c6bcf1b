use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::TransportError;
use crate::working_set::CollectionKind;

pub const TOTAL_COUNT_HEADER: &str = "x-total-count";
pub const REMAINING_COUNT_HEADER: &str = "x-remaining-count";

/// How the response body must be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    Ndjson,
    Array,
}

/// An open export response.
pub struct ExportStream {
    /// Rows matching the filters, regardless of cursor.
    pub total: Option<u64>,
    /// Rows after the requested cursor.
    pub remaining: Option<u64>,
    pub mode: BodyMode,
    pub body: BoxStream<'static, Result<Bytes, TransportError>>,
}

impl std::fmt::Debug for ExportStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportStream")
            .field("total", &self.total)
            .field("remaining", &self.remaining)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ExportTransport: Send + Sync {
    /// Opens the stream after `after_id`. Cancelling `cancel` while the
    /// request is in flight resolves to [`TransportError::Aborted`].
    async fn open(
        &self,
        kind: CollectionKind,
        collection_id: &str,
        after_id: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<ExportStream, TransportError>;

    /// Non-streaming fetch of every record after `after_id`. Cancelling
    /// `cancel` before the body is read resolves to [`TransportError::Aborted`].
    async fn fetch_remaining(
        &self,
        kind: CollectionKind,
        collection_id: &str,
        after_id: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<Vec<Value>, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(base: &str) -> Result<Self, TransportError> {
        Self::with_client(reqwest::Client::new(), base)
    }

    pub fn with_client(client: reqwest::Client, base: &str) -> Result<Self, TransportError> {
        let base = Url::parse(base)?;
        if base.cannot_be_a_base() {
            return Err(TransportError::BaseUrl(base.to_string()));
        }
        Ok(Self { client, base })
    }

    fn endpoint(
        &self,
        kind: CollectionKind,
        collection_id: &str,
        after_id: Option<&str>,
    ) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::BaseUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(kind.path_segments(collection_id));
        if let Some(after) = after_id {
            url.query_pairs_mut().append_pair("afterId", after);
        }
        Ok(url)
    }

    async fn send(&self, url: Url) -> Result<reqwest::Response, TransportError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

fn count_header(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn body_mode(headers: &HeaderMap) -> BodyMode {
    let ndjson = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("ndjson"));
    if ndjson {
        BodyMode::Ndjson
    } else {
        BodyMode::Array
    }
}

#[async_trait]
impl ExportTransport for HttpTransport {
    async fn open(
        &self,
        kind: CollectionKind,
        collection_id: &str,
        after_id: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<ExportStream, TransportError> {
        let url = self.endpoint(kind, collection_id, after_id)?;
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Aborted),
            response = self.send(url) => response?,
        };
        let headers = response.headers();
        let total = count_header(headers, TOTAL_COUNT_HEADER);
        let remaining = count_header(headers, REMAINING_COUNT_HEADER);
        let mode = body_mode(headers);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransportError::from))
            .boxed();
        Ok(ExportStream {
            total,
            remaining,
            mode,
            body,
        })
    }

    async fn fetch_remaining(
        &self,
        kind: CollectionKind,
        collection_id: &str,
        after_id: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<Vec<Value>, TransportError> {
        let mut url = self.endpoint(kind, collection_id, after_id)?;
        url.query_pairs_mut().append_pair("mode", "array");
        let fetch = async {
            let response = self.send(url).await?;
            Ok::<_, TransportError>(response.bytes().await?)
        };
        let bytes = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransportError::Aborted),
            bytes = fetch => bytes?,
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_encodes_collection_id() {
        let transport = HttpTransport::new("http://localhost:8080/hoa/").unwrap();
        let url = transport
            .endpoint(CollectionKind::Members, "list 1", Some("m-0100"))
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/hoa/api/member-lists/list%201/members/stream?afterId=m-0100"
        );
        let url = transport
            .endpoint(CollectionKind::Nonrespondents, "s-1", None)
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/hoa/api/surveys/s-1/nonrespondents/stream"
        );
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(matches!(
            HttpTransport::new("mailto:board@example.org"),
            Err(TransportError::BaseUrl(_))
        ));
    }
}
