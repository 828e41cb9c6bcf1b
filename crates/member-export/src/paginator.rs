//! Cursor-driven batch pump shared by every streamable collection.
//!
//! [`prepare`] resolves the secondary filter and the two totals before any
//! row is written; [`pump`] then fetches batches strictly after the running
//! cursor, decrypts each row and writes it to a [`RecordSink`] as one JSON
//! line. The only state carried between batches is the last emitted cursor.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cipher::FieldCipher;
use crate::error::ExportError;
use crate::record::ExportRow;
use crate::source::{CursorSource, ReminderFilter, StreamScope};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const MAX_BATCH_SIZE: usize = 2000;

/// Clamps a requested batch size into `1..=MAX_BATCH_SIZE`.
pub fn clamp_batch_size(requested: Option<i64>) -> usize {
    match requested {
        None => DEFAULT_BATCH_SIZE,
        Some(size) => usize::try_from(size.clamp(1, MAX_BATCH_SIZE as i64))
            .unwrap_or(DEFAULT_BATCH_SIZE),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub collection_id: String,
    pub after_id: Option<String>,
    pub batch_size: usize,
    pub reminders: Option<ReminderFilter>,
}

impl StreamRequest {
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            after_id: None,
            batch_size: DEFAULT_BATCH_SIZE,
            reminders: None,
        }
    }

    pub fn after(mut self, after_id: impl Into<String>) -> Self {
        self.after_id = Some(after_id.into());
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn reminders(mut self, filter: ReminderFilter) -> Self {
        self.reminders = Some(filter);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamTotals {
    /// Rows matching the filters, independent of the cursor.
    pub overall: u64,
    /// Rows matching the filters after the resume cursor.
    pub remaining: u64,
}

#[derive(Debug, Clone)]
pub struct PreparedStream {
    pub scope: StreamScope,
    pub after_id: Option<String>,
    pub batch_size: usize,
    pub totals: StreamTotals,
    /// Set when the allow-list came back empty; nothing will be fetched.
    pub exhausted: bool,
}

/// Resolves the allow-list and totals for a stream.
pub async fn prepare<R, S>(source: &S, request: StreamRequest) -> Result<PreparedStream, ExportError>
where
    R: ExportRow,
    S: CursorSource<R> + ?Sized,
{
    let after_id = request.after_id.filter(|id| !id.is_empty());
    let batch_size = request.batch_size.clamp(1, MAX_BATCH_SIZE);
    let mut scope = StreamScope::new(request.collection_id);

    if let Some(filter) = request.reminders {
        let allowed = source
            .reminder_allow_list(&scope.collection_id, filter)
            .await?;
        if allowed.is_empty() {
            return Ok(PreparedStream {
                scope,
                after_id,
                batch_size,
                totals: StreamTotals::default(),
                exhausted: true,
            });
        }
        scope = scope.with_allow_ids(allowed);
    }

    let overall = source.count(&scope, None).await?;
    let remaining = match after_id.as_deref() {
        Some(after) => source.count(&scope, Some(after)).await?,
        None => overall,
    };

    Ok(PreparedStream {
        scope,
        after_id,
        batch_size,
        totals: StreamTotals { overall, remaining },
        exhausted: false,
    })
}

/// The reader went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("record sink closed")]
pub struct SinkClosed;

/// Destination for encoded lines. Each line already ends in `\n`.
#[async_trait]
pub trait RecordSink: Send {
    async fn write_line(&mut self, line: Bytes) -> Result<(), SinkClosed>;
}

#[async_trait]
impl RecordSink for mpsc::Sender<Result<Bytes, ExportError>> {
    async fn write_line(&mut self, line: Bytes) -> Result<(), SinkClosed> {
        self.send(Ok(line)).await.map_err(|_| SinkClosed)
    }
}

#[async_trait]
impl RecordSink for Vec<Bytes> {
    async fn write_line(&mut self, line: Bytes) -> Result<(), SinkClosed> {
        self.push(line);
        Ok(())
    }
}

/// Collects lines into a single JSON array for the non-streaming mode.
#[derive(Debug, Default)]
pub struct JsonArraySink {
    buffer: Vec<u8>,
    records: usize,
}

impl JsonArraySink {
    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    pub fn finish(mut self) -> Bytes {
        if self.buffer.is_empty() {
            return Bytes::from_static(b"[]");
        }
        self.buffer.push(b']');
        Bytes::from(self.buffer)
    }
}

#[async_trait]
impl RecordSink for JsonArraySink {
    async fn write_line(&mut self, line: Bytes) -> Result<(), SinkClosed> {
        self.buffer.push(if self.records == 0 { b'[' } else { b',' });
        self.buffer
            .extend_from_slice(line.strip_suffix(b"\n").unwrap_or(&line));
        self.records += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    /// The source ran dry. `batches` counts non-empty fetches.
    Exhausted { emitted: u64, batches: u64 },
    /// The sink closed mid-stream; no further batches were fetched.
    Disconnected { emitted: u64 },
}

impl PumpOutcome {
    pub fn emitted(&self) -> u64 {
        match self {
            PumpOutcome::Exhausted { emitted, .. } | PumpOutcome::Disconnected { emitted } => {
                *emitted
            }
        }
    }
}

/// Streams every row after the prepared cursor into `sink`.
///
/// A failed fetch aborts the run with the source error; rows already written
/// stay written. Rows whose cursor does not advance past the last emitted one
/// are skipped so that output is strictly increasing; a full batch of such
/// rows is a source error, since refetching it would never make progress.
pub async fn pump<R, S, K>(
    source: &S,
    cipher: &dyn FieldCipher,
    prepared: &PreparedStream,
    sink: &mut K,
) -> Result<PumpOutcome, ExportError>
where
    R: ExportRow,
    S: CursorSource<R> + ?Sized,
    K: RecordSink + ?Sized,
{
    let mut emitted = 0u64;
    let mut batches = 0u64;
    if prepared.exhausted {
        return Ok(PumpOutcome::Exhausted { emitted, batches });
    }

    let mut last_seen = prepared.after_id.clone();
    loop {
        let batch = match source
            .fetch(&prepared.scope, last_seen.as_deref(), prepared.batch_size)
            .await
        {
            Ok(batch) => batch,
            Err(err) => {
                warn!(
                    collection = %prepared.scope.collection_id,
                    after = last_seen.as_deref().unwrap_or(""),
                    error = %err,
                    "batch fetch failed; aborting stream"
                );
                return Err(err);
            }
        };
        if batch.is_empty() {
            break;
        }
        batches += 1;
        let fetched = batch.len();
        let batch_start = last_seen.clone();

        for row in batch {
            if let Some(previous) = last_seen.as_deref()
                && row.cursor() <= previous
            {
                continue;
            }
            let cursor = row.cursor().to_string();
            let mut line = serde_json::to_vec(&row.open(cipher))?;
            line.push(b'\n');
            if sink.write_line(Bytes::from(line)).await.is_err() {
                debug!(
                    collection = %prepared.scope.collection_id,
                    emitted,
                    "reader disconnected; stopping"
                );
                return Ok(PumpOutcome::Disconnected { emitted });
            }
            emitted += 1;
            last_seen = Some(cursor);
        }

        if fetched < prepared.batch_size {
            break;
        }
        if last_seen == batch_start {
            let after = batch_start.unwrap_or_default();
            warn!(
                collection = %prepared.scope.collection_id,
                after = %after,
                fetched,
                "full batch did not advance the cursor; aborting stream"
            );
            return Err(ExportError::Source(format!(
                "source returned no rows after cursor '{after}'"
            )));
        }
    }

    Ok(PumpOutcome::Exhausted { emitted, batches })
}
