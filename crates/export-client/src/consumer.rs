//! Client-side consumer for one export collection.
//!
//! A consumer owns a [`WorkingSet`] and drives it through runs against an
//! [`ExportTransport`]. Every run gets a fresh id from a monotonic counter;
//! a run whose id is no longer current may not touch the working set or the
//! state. At most one reader is alive at a time: starting a run cancels and
//! joins the previous one first.
//!
//! States: `Idle -> CacheLoading -> Streaming -> {Completed, Aborted, Failed}`.
//! `Aborted` is only reached through an explicit cancel (hidden, navigated
//! away, superseded) and can be resumed from the last seen id.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ExportCache;
use crate::error::{ClientError, TransportError};
use crate::idle::IdleTimer;
use crate::transport::{BodyMode, ExportTransport};
use crate::working_set::{CollectionKind, LineBuffer, WorkingSet};

/// Appended records held in memory before the working set is written back
/// to the cache. Every run also writes back once when it settles.
pub const PERSIST_EVERY: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    CacheLoading,
    Streaming,
    Completed,
    Aborted,
    Failed(String),
}

impl StreamState {
    /// A run is in progress or about to start.
    pub fn is_active(&self) -> bool {
        matches!(self, StreamState::CacheLoading | StreamState::Streaming)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: StreamState,
    pub records: Vec<Value>,
    /// Overall total last reported by the server.
    pub total: Option<u64>,
    pub run_id: u64,
    pub auto_resumed: bool,
}

struct Shared {
    set: WorkingSet,
    run_id: u64,
    total: Option<u64>,
    auto_resumed: bool,
    mounted: bool,
    unsaved: usize,
}

enum RunEnd {
    Completed,
    Superseded,
}

#[derive(Clone)]
struct Context {
    kind: CollectionKind,
    collection_id: Arc<str>,
    cache_key: Arc<str>,
    transport: Arc<dyn ExportTransport>,
    cache: Arc<dyn ExportCache>,
    shared: Arc<Mutex<Shared>>,
    state: Arc<watch::Sender<StreamState>>,
}

struct ActiveRun {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct StreamConsumer {
    ctx: Context,
    active: Mutex<Option<ActiveRun>>,
}

impl std::fmt::Debug for StreamConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConsumer")
            .field("kind", &self.ctx.kind)
            .field("collection_id", &self.ctx.collection_id)
            .field("state", &*self.ctx.state.borrow())
            .finish_non_exhaustive()
    }
}

impl StreamConsumer {
    pub fn new(
        kind: CollectionKind,
        collection_id: impl Into<String>,
        transport: Arc<dyn ExportTransport>,
        cache: Arc<dyn ExportCache>,
    ) -> Self {
        let collection_id: String = collection_id.into();
        let (state, _) = watch::channel(StreamState::Idle);
        Self {
            ctx: Context {
                kind,
                cache_key: kind.cache_key(&collection_id).into(),
                collection_id: collection_id.into(),
                transport,
                cache,
                shared: Arc::new(Mutex::new(Shared {
                    set: WorkingSet::new(kind),
                    run_id: 0,
                    total: None,
                    auto_resumed: false,
                    mounted: false,
                    unsaved: 0,
                })),
                state: Arc::new(state),
            },
            active: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> CollectionKind {
        self.ctx.kind
    }

    pub fn state(&self) -> StreamState {
        self.ctx.state.borrow().clone()
    }

    /// Restores the cached working set and starts streaming after its last id.
    /// Counts as a new page visit, so automatic resume is armed again.
    pub async fn mount(&self) {
        {
            let mut shared = self.ctx.shared.lock().await;
            shared.mounted = true;
            shared.auto_resumed = false;
            self.ctx.state.send_replace(StreamState::CacheLoading);
        }
        let cached = match self.ctx.cache.load(&self.ctx.cache_key).await {
            Ok(records) => records.unwrap_or_default(),
            Err(err) => {
                warn!(key = %self.ctx.cache_key, error = %err, "ignoring unreadable export cache");
                Vec::new()
            }
        };
        {
            let mut shared = self.ctx.shared.lock().await;
            let restored = shared.set.extend(cached);
            debug!(key = %self.ctx.cache_key, restored, "working set restored");
        }
        self.start_run().await;
    }

    /// Hidden: abort the in-flight read. Visible again: resume once per visit
    /// if the stream never completed.
    pub async fn set_visibility(&self, visible: bool) {
        if !visible {
            self.abort().await;
            return;
        }
        let resume = {
            let mut shared = self.ctx.shared.lock().await;
            let interrupted = matches!(
                *self.ctx.state.borrow(),
                StreamState::Aborted | StreamState::Failed(_)
            );
            if shared.mounted && interrupted && !shared.auto_resumed {
                shared.auto_resumed = true;
                true
            } else {
                false
            }
        };
        if resume {
            info!(collection = %self.ctx.collection_id, "resuming export after becoming visible");
            self.start_run().await;
        }
    }

    /// Leaves the owning route: abort and stop auto-resuming.
    pub async fn navigate_away(&self) {
        self.ctx.shared.lock().await.mounted = false;
        self.abort().await;
    }

    /// Explicit resume from the last seen id. Returns `false` when already
    /// complete.
    pub async fn resume(&self) -> bool {
        if self.state() == StreamState::Completed {
            return false;
        }
        self.ctx.shared.lock().await.mounted = true;
        self.start_run().await;
        true
    }

    /// Waits until no run is in progress and returns the settled state.
    pub async fn wait_idle(&self) -> StreamState {
        let mut changes = self.ctx.state.subscribe();
        match changes.wait_for(|state| !state.is_active()).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    pub async fn snapshot(&self) -> Snapshot {
        let shared = self.ctx.shared.lock().await;
        Snapshot {
            state: self.state(),
            records: shared.set.records().to_vec(),
            total: shared.total,
            run_id: shared.run_id,
            auto_resumed: shared.auto_resumed,
        }
    }

    /// Presentation filter over lot, name and address.
    pub async fn filtered(&self, query: &str) -> Vec<Value> {
        let shared = self.ctx.shared.lock().await;
        shared.set.filtered(query).into_iter().cloned().collect()
    }

    /// Mounts, waits for the run to settle and returns the working set.
    pub async fn run_to_end(&self) -> Result<Vec<Value>, ClientError> {
        self.mount().await;
        let state = self.wait_idle().await;
        self.settled(state).await
    }

    /// Like [`run_to_end`](Self::run_to_end), but aborts the run once no new
    /// record has arrived for `idle.timeout()`. Records received so far stay
    /// in the working set and the cache.
    pub async fn run_to_end_within(
        &self,
        mut idle: IdleTimer,
    ) -> Result<Vec<Value>, ClientError> {
        self.mount().await;
        idle.start();
        let mut seen = self.record_count().await;
        loop {
            tokio::select! {
                state = self.wait_idle() => return self.settled(state).await,
                _ = idle.wait() => {}
            }
            let received = self.record_count().await;
            if received > seen {
                seen = received;
                idle.touch();
                continue;
            }
            warn!(
                collection = %self.ctx.collection_id,
                received,
                timeout = ?idle.timeout(),
                "export stalled; aborting"
            );
            self.abort().await;
            return Err(ClientError::Stalled(idle.timeout()));
        }
    }

    async fn settled(&self, state: StreamState) -> Result<Vec<Value>, ClientError> {
        match state {
            StreamState::Completed => Ok(self.snapshot().await.records),
            StreamState::Failed(message) => Err(ClientError::Failed(message)),
            _ => Err(ClientError::Aborted),
        }
    }

    async fn record_count(&self) -> usize {
        self.ctx.shared.lock().await.set.len()
    }

    pub async fn clear_cache(&self) -> Result<(), ClientError> {
        self.ctx.cache.clear(&self.ctx.cache_key).await?;
        Ok(())
    }

    async fn start_run(&self) {
        let mut active = self.active.lock().await;
        let run_id = {
            let mut shared = self.ctx.shared.lock().await;
            shared.run_id += 1;
            shared.run_id
        };
        if let Some(previous) = active.take() {
            previous.cancel.cancel();
            let _ = previous.handle.await;
        }
        let after_id = {
            let shared = self.ctx.shared.lock().await;
            self.ctx.state.send_replace(StreamState::Streaming);
            shared.set.last_id()
        };
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.ctx.clone().run(run_id, after_id, cancel.clone()));
        *active = Some(ActiveRun { cancel, handle });
    }

    async fn abort(&self) {
        let mut active = self.active.lock().await;
        if let Some(run) = active.take() {
            run.cancel.cancel();
            let _ = run.handle.await;
        }
    }
}

impl Context {
    async fn run(self, run_id: u64, after_id: Option<String>, cancel: CancellationToken) {
        let outcome = self.stream(run_id, after_id.as_deref(), &cancel).await;
        self.flush(run_id).await;
        let shared = self.shared.lock().await;
        if shared.run_id != run_id {
            debug!(run_id, current = shared.run_id, "discarding superseded run");
            return;
        }
        let next = match outcome {
            Ok(RunEnd::Superseded) => return,
            Ok(RunEnd::Completed) => {
                info!(
                    collection = %self.collection_id,
                    records = shared.set.len(),
                    "export stream completed"
                );
                StreamState::Completed
            }
            Err(err) if err.is_abort() || cancel.is_cancelled() => {
                debug!(collection = %self.collection_id, "export read aborted");
                StreamState::Aborted
            }
            Err(err) => {
                warn!(collection = %self.collection_id, error = %err, "export stream failed");
                StreamState::Failed(err.to_string())
            }
        };
        self.state.send_replace(next);
    }

    async fn stream(
        &self,
        run_id: u64,
        after_id: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<RunEnd, TransportError> {
        let mut export = self
            .transport
            .open(self.kind, &self.collection_id, after_id, cancel.clone())
            .await?;
        {
            let mut shared = self.shared.lock().await;
            if shared.run_id != run_id {
                return Ok(RunEnd::Superseded);
            }
            if export.total.is_some() {
                shared.total = export.total;
            }
        }
        debug!(
            collection = %self.collection_id,
            after = after_id.unwrap_or(""),
            total = export.total,
            remaining = export.remaining,
            "export stream opened"
        );

        let mut lines = LineBuffer::default();
        let mut array_body = Vec::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Aborted),
                chunk = export.body.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            match export.mode {
                BodyMode::Array => array_body.extend_from_slice(&chunk),
                BodyMode::Ndjson => {
                    let records = parse_lines(lines.push(&chunk));
                    if !self.append(run_id, records).await {
                        return Ok(RunEnd::Superseded);
                    }
                }
            }
        }

        let tail = match export.mode {
            BodyMode::Ndjson => parse_lines(lines.finish()),
            BodyMode::Array if array_body.is_empty() => Vec::new(),
            BodyMode::Array => serde_json::from_slice(&array_body)?,
        };
        if !self.append(run_id, tail).await {
            return Ok(RunEnd::Superseded);
        }

        let (received, total, last_id) = {
            let shared = self.shared.lock().await;
            (shared.set.len() as u64, shared.total, shared.set.last_id())
        };
        if let Some(total) = total
            && received < total
        {
            info!(
                collection = %self.collection_id,
                received,
                total,
                "stream closed short of total; fetching remainder"
            );
            let fetch = self.transport.fetch_remaining(
                self.kind,
                &self.collection_id,
                last_id.as_deref(),
                cancel.clone(),
            );
            let rest = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TransportError::Aborted),
                rest = fetch => rest?,
            };
            if !self.append(run_id, rest).await {
                return Ok(RunEnd::Superseded);
            }
        }
        Ok(RunEnd::Completed)
    }

    /// Ingests records under `run_id`. Returns `false`, leaving the working
    /// set untouched, when the run has been superseded.
    async fn append(&self, run_id: u64, records: Vec<Value>) -> bool {
        let persisted = {
            let mut shared = self.shared.lock().await;
            if shared.run_id != run_id {
                debug!(run_id, current = shared.run_id, "dropping records from superseded run");
                return false;
            }
            if records.is_empty() {
                return true;
            }
            shared.unsaved += shared.set.extend(records);
            if shared.unsaved < PERSIST_EVERY {
                return true;
            }
            shared.unsaved = 0;
            shared.set.records().to_vec()
        };
        self.persist(persisted).await;
        true
    }

    /// Writes back anything appended since the last save, unless `run_id`
    /// has been superseded.
    async fn flush(&self, run_id: u64) {
        let persisted = {
            let mut shared = self.shared.lock().await;
            if shared.run_id != run_id || shared.unsaved == 0 {
                return;
            }
            shared.unsaved = 0;
            shared.set.records().to_vec()
        };
        self.persist(persisted).await;
    }

    async fn persist(&self, records: Vec<Value>) {
        if let Err(err) = self.cache.save(&self.cache_key, &records).await {
            warn!(key = %self.cache_key, error = %err, "failed to persist export cache");
        }
    }
}

fn parse_lines(lines: impl IntoIterator<Item = String>) -> Vec<Value> {
    lines
        .into_iter()
        .filter_map(|line| match serde_json::from_str(&line) {
            Ok(record) => Some(record),
            Err(err) => {
                debug!(error = %err, "skipping undecodable export line");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FileCache;
    use crate::transport::ExportStream;
    use async_trait::async_trait;
    use serde_json::json;

    struct Unreachable;

    #[async_trait]
    impl ExportTransport for Unreachable {
        async fn open(
            &self,
            _kind: CollectionKind,
            _collection_id: &str,
            _after_id: Option<&str>,
            _cancel: CancellationToken,
        ) -> Result<ExportStream, TransportError> {
            Err(TransportError::Status {
                status: 503,
                message: "down".into(),
            })
        }

        async fn fetch_remaining(
            &self,
            _kind: CollectionKind,
            _collection_id: &str,
            _after_id: Option<&str>,
            _cancel: CancellationToken,
        ) -> Result<Vec<Value>, TransportError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn superseded_run_cannot_append() {
        let dir = tempfile::tempdir().unwrap();
        let consumer = StreamConsumer::new(
            CollectionKind::Members,
            "list-1",
            Arc::new(Unreachable),
            Arc::new(FileCache::new(dir.path())),
        );
        let ctx = consumer.ctx.clone();
        ctx.shared.lock().await.run_id = 2;

        assert!(!ctx.append(1, vec![json!({ "id": "stale" })]).await);
        assert!(ctx.append(2, vec![json!({ "id": "fresh" })]).await);
        let snapshot = consumer.snapshot().await;
        assert_eq!(snapshot.records, vec![json!({ "id": "fresh" })]);
    }

    #[tokio::test]
    async fn transport_errors_are_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let consumer = StreamConsumer::new(
            CollectionKind::Members,
            "list-1",
            Arc::new(Unreachable),
            Arc::new(FileCache::new(dir.path())),
        );
        consumer.mount().await;
        let state = consumer.wait_idle().await;
        assert!(matches!(state, StreamState::Failed(ref message) if message.contains("503")));
        assert!(matches!(
            consumer.run_to_end().await,
            Err(ClientError::Failed(_))
        ));
    }
}
