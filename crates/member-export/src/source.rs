use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ExportError;
use crate::record::ExportRow;

/// Secondary filter over the reminder aggregate joined to each row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderFilter {
    Exact(u32),
    AtLeast(u32),
}

impl ReminderFilter {
    pub fn matches(self, count: u32) -> bool {
        match self {
            ReminderFilter::Exact(expected) => count == expected,
            ReminderFilter::AtLeast(minimum) => count >= minimum,
        }
    }
}

/// Rows belonging to one collection, optionally narrowed to a fixed id
/// allow-list computed before streaming starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamScope {
    pub collection_id: String,
    pub allow_ids: Option<Arc<BTreeSet<String>>>,
}

impl StreamScope {
    pub fn new(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            allow_ids: None,
        }
    }

    pub fn with_allow_ids(mut self, ids: BTreeSet<String>) -> Self {
        self.allow_ids = Some(Arc::new(ids));
        self
    }

    pub fn admits(&self, cursor: &str) -> bool {
        self.allow_ids
            .as_ref()
            .is_none_or(|allowed| allowed.contains(cursor))
    }
}

/// Persistence collaborator. Rows are ordered by cursor ascending and every
/// `after` bound is exclusive.
#[async_trait]
pub trait CursorSource<R: ExportRow>: Send + Sync {
    /// Rows in scope with cursor strictly greater than `after`, or all rows.
    async fn count(&self, scope: &StreamScope, after: Option<&str>) -> Result<u64, ExportError>;

    /// Up to `take` rows in scope with cursor strictly greater than `after`.
    async fn fetch(
        &self,
        scope: &StreamScope,
        after: Option<&str>,
        take: usize,
    ) -> Result<Vec<R>, ExportError>;

    /// Cursors of the collection's rows whose reminder count matches.
    async fn reminder_allow_list(
        &self,
        collection_id: &str,
        filter: ReminderFilter,
    ) -> Result<BTreeSet<String>, ExportError>;
}
