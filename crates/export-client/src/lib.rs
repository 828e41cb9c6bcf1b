#![allow(missing_docs)]

pub mod cache;
pub mod consumer;
pub mod error;
pub mod idle;
pub mod transport;
pub mod working_set;

pub use cache::{DEFAULT_CACHE_TTL, ExportCache, FileCache};
pub use consumer::{PERSIST_EVERY, Snapshot, StreamConsumer, StreamState};
pub use error::{CacheError, ClientError, TransportError};
pub use idle::IdleTimer;
pub use transport::{
    BodyMode, ExportStream, ExportTransport, HttpTransport, REMAINING_COUNT_HEADER,
    TOTAL_COUNT_HEADER,
};
pub use working_set::{CollectionKind, Ingest, LineBuffer, WorkingSet};
