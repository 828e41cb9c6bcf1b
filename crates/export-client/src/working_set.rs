use std::collections::HashSet;

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which export a consumer reads; fixes the id field used for dedup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Members,
    Nonrespondents,
}

impl CollectionKind {
    pub fn id_field(self) -> &'static str {
        match self {
            CollectionKind::Members => "id",
            CollectionKind::Nonrespondents => "responseId",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CollectionKind::Members => "members",
            CollectionKind::Nonrespondents => "nonrespondents",
        }
    }

    /// Path segments of the streaming endpoint for `collection_id`.
    pub fn path_segments(self, collection_id: &str) -> [&str; 5] {
        match self {
            CollectionKind::Members => ["api", "member-lists", collection_id, "members", "stream"],
            CollectionKind::Nonrespondents => {
                ["api", "surveys", collection_id, "nonrespondents", "stream"]
            }
        }
    }

    /// Key identifying a collection in the local cache.
    pub fn cache_key(self, collection_id: &str) -> String {
        format!("{}-{collection_id}", self.as_str())
    }
}

impl std::str::FromStr for CollectionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "members" => Ok(CollectionKind::Members),
            "nonrespondents" => Ok(CollectionKind::Nonrespondents),
            other => Err(format!("unknown collection kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ingest {
    Appended,
    Duplicate,
    MissingId,
    Malformed,
}

/// Append-only, de-duplicated records in server emission order.
///
/// The seen-set is the only authority on whether a record was already
/// incorporated; views never remove from it.
#[derive(Debug, Clone)]
pub struct WorkingSet {
    id_field: &'static str,
    records: Vec<Value>,
    seen: HashSet<String>,
}

impl WorkingSet {
    pub fn new(kind: CollectionKind) -> Self {
        Self {
            id_field: kind.id_field(),
            records: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Value] {
        &self.records
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    /// Id of the last appended record; the resume cursor.
    pub fn last_id(&self) -> Option<String> {
        self.records
            .last()
            .and_then(|record| record_id(record, self.id_field))
    }

    pub fn ingest(&mut self, record: Value) -> Ingest {
        if !record.is_object() {
            return Ingest::Malformed;
        }
        let Some(id) = record_id(&record, self.id_field) else {
            return Ingest::MissingId;
        };
        if !self.seen.insert(id) {
            return Ingest::Duplicate;
        }
        self.records.push(record);
        Ingest::Appended
    }

    pub fn ingest_line(&mut self, line: &str) -> Ingest {
        match serde_json::from_str(line.trim()) {
            Ok(record) => self.ingest(record),
            Err(_) => Ingest::Malformed,
        }
    }

    /// Ingests every record, returning how many were appended.
    pub fn extend<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = Value>,
    {
        records
            .into_iter()
            .map(|record| self.ingest(record))
            .filter(|outcome| *outcome == Ingest::Appended)
            .count()
    }

    /// Case-insensitive substring match over lot, name and address.
    /// Presentation only: the working set is not touched.
    pub fn filtered<'a>(&'a self, query: &str) -> Vec<&'a Value> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return self.records.iter().collect();
        }
        self.records
            .iter()
            .filter(|record| {
                ["lot", "name", "address"].iter().any(|field| {
                    record
                        .get(field)
                        .and_then(Value::as_str)
                        .is_some_and(|value| value.to_lowercase().contains(&needle))
                })
            })
            .collect()
    }
}

fn record_id(record: &Value, field: &str) -> Option<String> {
    match record.get(field)? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Splits a byte stream into lines, holding back a trailing partial line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: BytesMut,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.split_to(end);
            self.pending.advance(1);
            if !line.iter().all(u8::is_ascii_whitespace) {
                lines.push(String::from_utf8_lossy(&line).into_owned());
            }
        }
        lines
    }

    /// Returns whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let rest = self.pending.split();
        if rest.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(String::from_utf8_lossy(&rest).into_owned())
        }
    }
}
