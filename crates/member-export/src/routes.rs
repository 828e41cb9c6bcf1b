use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{HeaderName, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::cipher::FieldCipher;
use crate::error::ExportError;
use crate::paginator::{
    JsonArraySink, MAX_BATCH_SIZE, PumpOutcome, StreamRequest, StreamTotals, clamp_batch_size,
    prepare, pump,
};
use crate::record::{ExportRow, MemberRow, NonrespondentRow};
use crate::source::{CursorSource, ReminderFilter};

pub const TOTAL_COUNT_HEADER: &str = "x-total-count";
pub const REMAINING_COUNT_HEADER: &str = "x-remaining-count";
pub const CONTENT_TYPE_NDJSON: &str = "application/x-ndjson";
pub const CONTENT_TYPE_ARRAY: &str = "application/json";

/// Lines buffered between the pump task and the response body.
const CHANNEL_CAPACITY: usize = 64;

/// A store able to serve both collections.
pub trait ExportStore: CursorSource<MemberRow> + CursorSource<NonrespondentRow> {}

impl<T> ExportStore for T where T: CursorSource<MemberRow> + CursorSource<NonrespondentRow> {}

#[derive(Clone)]
pub struct AppState {
    members: Arc<dyn CursorSource<MemberRow>>,
    nonrespondents: Arc<dyn CursorSource<NonrespondentRow>>,
    cipher: Arc<dyn FieldCipher>,
    default_batch_size: usize,
}

impl AppState {
    pub fn new<S>(store: Arc<S>, cipher: Arc<dyn FieldCipher>) -> Self
    where
        S: ExportStore + 'static,
    {
        Self {
            members: store.clone(),
            nonrespondents: store,
            cipher,
            default_batch_size: clamp_batch_size(None),
        }
    }

    pub fn with_default_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/member-lists/:id/members/stream", get(stream_members))
        .route(
            "/api/surveys/:id/nonrespondents/stream",
            get(stream_nonrespondents),
        )
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamQuery {
    after_id: Option<String>,
    batch_size: Option<i64>,
    reminders: Option<u32>,
    min_reminders: Option<u32>,
    mode: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Stream,
    Array,
}

impl StreamQuery {
    fn into_request(
        self,
        collection_id: String,
        default_batch_size: usize,
    ) -> Result<(StreamRequest, OutputMode), ExportError> {
        let reminders = match (self.reminders, self.min_reminders) {
            (Some(_), Some(_)) => {
                return Err(ExportError::InvalidRequest(
                    "reminders and minReminders cannot be combined".into(),
                ));
            }
            (Some(exact), None) => Some(ReminderFilter::Exact(exact)),
            (None, Some(minimum)) => Some(ReminderFilter::AtLeast(minimum)),
            (None, None) => None,
        };
        let mode = match self.mode.as_deref() {
            None | Some("stream") => OutputMode::Stream,
            Some("array") => OutputMode::Array,
            Some(other) => {
                return Err(ExportError::InvalidRequest(format!(
                    "unknown mode '{other}'"
                )));
            }
        };
        let batch_size = match self.batch_size {
            Some(_) => clamp_batch_size(self.batch_size),
            None => default_batch_size,
        };
        let request = StreamRequest {
            collection_id,
            after_id: self.after_id,
            batch_size,
            reminders,
        };
        Ok((request, mode))
    }
}

async fn stream_members(
    State(state): State<AppState>,
    Path(list_id): Path<String>,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> Result<Response, ExportError> {
    let source = state.members.clone();
    stream_collection(source, &state, list_id, query).await
}

async fn stream_nonrespondents(
    State(state): State<AppState>,
    Path(survey_id): Path<String>,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> Result<Response, ExportError> {
    let source = state.nonrespondents.clone();
    stream_collection(source, &state, survey_id, query).await
}

async fn stream_collection<R: ExportRow>(
    source: Arc<dyn CursorSource<R>>,
    state: &AppState,
    collection_id: String,
    query: Result<Query<StreamQuery>, QueryRejection>,
) -> Result<Response, ExportError> {
    let Query(query) = query.map_err(|rejection| ExportError::InvalidRequest(rejection.body_text()))?;
    let (request, mode) = query.into_request(collection_id, state.default_batch_size)?;
    let prepared = prepare(&*source, request).await?;
    let totals = prepared.totals;
    info!(
        collection = %prepared.scope.collection_id,
        cursor = R::CURSOR_FIELD,
        after = prepared.after_id.as_deref().unwrap_or(""),
        total = totals.overall,
        remaining = totals.remaining,
        batch_size = prepared.batch_size,
        "export stream opened"
    );

    if mode == OutputMode::Array {
        let mut sink = JsonArraySink::default();
        pump(&*source, &*state.cipher, &prepared, &mut sink).await?;
        info!(
            collection = %prepared.scope.collection_id,
            emitted = sink.len(),
            "export array sent"
        );
        return Ok(export_response(CONTENT_TYPE_ARRAY, totals, Body::from(sink.finish())));
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, ExportError>>(CHANNEL_CAPACITY);
    let cipher = state.cipher.clone();
    tokio::spawn(async move {
        let mut sink = tx;
        let collection = prepared.scope.collection_id.clone();
        match pump(&*source, &*cipher, &prepared, &mut sink).await {
            Ok(PumpOutcome::Exhausted { emitted, batches }) => {
                info!(%collection, emitted, batches, "export stream closed");
            }
            Ok(PumpOutcome::Disconnected { emitted }) => {
                debug!(%collection, emitted, "export stream dropped by client");
            }
            // Surfaces as a body error so the reader sees a broken transfer
            // rather than a clean end of stream.
            Err(err) => {
                let _ = sink.send(Err(err)).await;
            }
        }
    });

    Ok(export_response(
        CONTENT_TYPE_NDJSON,
        totals,
        Body::from_stream(ReceiverStream::new(rx)),
    ))
}

fn export_response(content_type: &'static str, totals: StreamTotals, body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CACHE_CONTROL, "no-store".to_string()),
            (
                HeaderName::from_static(TOTAL_COUNT_HEADER),
                totals.overall.to_string(),
            ),
            (
                HeaderName::from_static(REMAINING_COUNT_HEADER),
                totals.remaining.to_string(),
            ),
        ],
        body,
    )
        .into_response()
}
