#![allow(missing_docs)]

pub mod cipher;
pub mod error;
pub mod memory;
pub mod paginator;
pub mod record;
pub mod routes;
pub mod source;

pub use cipher::{ChaChaFieldCipher, CipherError, FieldCipher, SEALED_PREFIX, decrypt_or_raw};
pub use error::ExportError;
pub use memory::{MemoryStore, SeedData};
pub use paginator::{
    DEFAULT_BATCH_SIZE, JsonArraySink, MAX_BATCH_SIZE, PreparedStream, PumpOutcome, RecordSink,
    SinkClosed, StreamRequest, StreamTotals, clamp_batch_size, prepare, pump,
};
pub use record::{ExportRow, MemberRecord, MemberRow, NonrespondentRecord, NonrespondentRow};
pub use routes::{
    AppState, CONTENT_TYPE_ARRAY, CONTENT_TYPE_NDJSON, ExportStore, REMAINING_COUNT_HEADER,
    TOTAL_COUNT_HEADER, router,
};
pub use source::{CursorSource, ReminderFilter, StreamScope};
