use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use proptest::prelude::*;
use serde_json::{Value, json};

use member_export::{
    ChaChaFieldCipher, CursorSource, ExportError, FieldCipher, MemberRow, MemoryStore,
    NonrespondentRow, PumpOutcome, ReminderFilter, SeedData, StreamRequest, StreamScope, prepare,
    pump,
};

fn cipher() -> ChaChaFieldCipher {
    ChaChaFieldCipher::new([42u8; 32])
}

fn member_id(index: usize) -> String {
    format!("m-{index:04}")
}

fn seed_with_members(count: usize) -> SeedData {
    let members: Vec<Value> = (1..=count)
        .map(|index| {
            json!({
                "id": member_id(index),
                "listId": "list-1",
                "lot": index.to_string(),
                "name": format!("Owner {index}"),
                "email": format!("owner{index}@example.org"),
                "address": format!("{index} Lakeview Drive")
            })
        })
        .collect();
    serde_json::from_value(json!({
        "memberLists": [{ "id": "list-1" }],
        "members": members
    }))
    .expect("seed should deserialize")
}

fn decode(lines: &[Bytes]) -> Vec<Value> {
    lines
        .iter()
        .map(|line| {
            assert_eq!(line.last(), Some(&b'\n'));
            serde_json::from_slice(line).expect("line should be json")
        })
        .collect()
}

async fn run(
    store: &MemoryStore,
    cipher: &dyn FieldCipher,
    request: StreamRequest,
) -> (PumpOutcome, Vec<Value>) {
    let prepared = prepare::<MemberRow, _>(store, request)
        .await
        .expect("prepare");
    let mut lines = Vec::new();
    let outcome = pump::<MemberRow, _, _>(store, cipher, &prepared, &mut lines)
        .await
        .expect("pump");
    (outcome, decode(&lines))
}

#[tokio::test]
async fn two_hundred_fifty_rows_stream_in_three_batches() {
    let mut seed = seed_with_members(250);
    seed.seal_members(&cipher()).expect("seal");
    let store = MemoryStore::new(seed);

    let request = StreamRequest::new("list-1").batch_size(100);
    let prepared = prepare::<MemberRow, _>(&store, request.clone())
        .await
        .expect("prepare");
    assert_eq!(prepared.totals.overall, 250);
    assert_eq!(prepared.totals.remaining, 250);

    let (outcome, records) = run(&store, &cipher(), request.clone()).await;
    assert_eq!(
        outcome,
        PumpOutcome::Exhausted {
            emitted: 250,
            batches: 3
        }
    );
    assert_eq!(records.len(), 250);
    assert_eq!(records[0]["name"], "Owner 1");
    assert_eq!(records[249]["address"], "250 Lakeview Drive");

    let hundredth = records[99]["id"].as_str().expect("id").to_string();
    let resumed = prepare::<MemberRow, _>(&store, request.clone().after(hundredth.clone()))
        .await
        .expect("prepare");
    assert_eq!(resumed.totals.overall, 250);
    assert_eq!(resumed.totals.remaining, 150);

    let (outcome, rest) = run(&store, &cipher(), request.after(hundredth)).await;
    assert_eq!(outcome.emitted(), 150);
    assert_eq!(rest[0]["id"], member_id(101));
}

#[tokio::test]
async fn plaintext_fields_are_emitted_as_stored() {
    let mut seed = seed_with_members(3);
    let cipher = cipher();
    seed.members[0].name = cipher.seal("Sealed Owner").expect("seal");
    // A value that looks sealed but was produced under another key.
    seed.members[1].email = ChaChaFieldCipher::new([1u8; 32])
        .seal("foreign@example.org")
        .expect("seal");
    let foreign = seed.members[1].email.clone();
    let store = MemoryStore::new(seed);

    let (outcome, records) = run(&store, &cipher, StreamRequest::new("list-1")).await;
    assert_eq!(outcome.emitted(), 3);
    assert_eq!(records[0]["name"], "Sealed Owner");
    assert_eq!(records[1]["name"], "Owner 2");
    assert_eq!(records[1]["email"], foreign.as_str());
    assert_eq!(records[2]["lot"], "3");
}

struct FailingSource {
    inner: MemoryStore,
    healthy_fetches: usize,
    fetches: AtomicUsize,
}

#[async_trait]
impl CursorSource<MemberRow> for FailingSource {
    async fn count(&self, scope: &StreamScope, after: Option<&str>) -> Result<u64, ExportError> {
        CursorSource::<MemberRow>::count(&self.inner, scope, after).await
    }

    async fn fetch(
        &self,
        scope: &StreamScope,
        after: Option<&str>,
        take: usize,
    ) -> Result<Vec<MemberRow>, ExportError> {
        if self.fetches.fetch_add(1, Ordering::SeqCst) >= self.healthy_fetches {
            return Err(ExportError::Source("connection reset".into()));
        }
        CursorSource::<MemberRow>::fetch(&self.inner, scope, after, take).await
    }

    async fn reminder_allow_list(
        &self,
        collection_id: &str,
        filter: ReminderFilter,
    ) -> Result<BTreeSet<String>, ExportError> {
        CursorSource::<MemberRow>::reminder_allow_list(&self.inner, collection_id, filter).await
    }
}

#[tokio::test]
async fn fetch_failure_aborts_after_written_rows() {
    let source = FailingSource {
        inner: MemoryStore::new(seed_with_members(30)),
        healthy_fetches: 1,
        fetches: AtomicUsize::new(0),
    };
    let prepared = prepare::<MemberRow, _>(&source, StreamRequest::new("list-1").batch_size(10))
        .await
        .expect("prepare");
    let mut lines = Vec::new();
    let err = pump::<MemberRow, _, _>(&source, &cipher(), &prepared, &mut lines)
        .await
        .expect_err("second fetch fails");
    assert!(matches!(err, ExportError::Source(_)));
    assert_eq!(lines.len(), 10);
}

/// Ignores the cursor and always serves the first rows of the list.
struct StuckSource(MemoryStore);

#[async_trait]
impl CursorSource<MemberRow> for StuckSource {
    async fn count(&self, scope: &StreamScope, after: Option<&str>) -> Result<u64, ExportError> {
        CursorSource::<MemberRow>::count(&self.0, scope, after).await
    }

    async fn fetch(
        &self,
        scope: &StreamScope,
        _after: Option<&str>,
        take: usize,
    ) -> Result<Vec<MemberRow>, ExportError> {
        CursorSource::<MemberRow>::fetch(&self.0, scope, None, take).await
    }

    async fn reminder_allow_list(
        &self,
        collection_id: &str,
        filter: ReminderFilter,
    ) -> Result<BTreeSet<String>, ExportError> {
        CursorSource::<MemberRow>::reminder_allow_list(&self.0, collection_id, filter).await
    }
}

#[tokio::test]
async fn source_that_ignores_the_cursor_is_an_error() {
    let source = StuckSource(MemoryStore::new(seed_with_members(30)));
    let prepared = prepare::<MemberRow, _>(&source, StreamRequest::new("list-1").batch_size(10))
        .await
        .expect("prepare");
    let mut lines = Vec::new();
    let pumped = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        pump::<MemberRow, _, _>(&source, &cipher(), &prepared, &mut lines),
    )
    .await
    .expect("pump must terminate");
    let err = pumped.expect_err("second batch repeats the first");
    assert!(matches!(err, ExportError::Source(ref message) if message.contains("m-0010")));
    assert_eq!(lines.len(), 10);
}

#[tokio::test]
async fn closed_sink_stops_fetching() {
    let store = MemoryStore::new(seed_with_members(50));
    let prepared = prepare::<MemberRow, _>(&store, StreamRequest::new("list-1").batch_size(10))
        .await
        .expect("prepare");
    let (mut tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, ExportError>>(1);
    drop(rx);
    let outcome = pump::<MemberRow, _, _>(&store, &cipher(), &prepared, &mut tx)
        .await
        .expect("disconnect is not an error");
    assert_eq!(outcome, PumpOutcome::Disconnected { emitted: 0 });
}

fn reminder_seed() -> SeedData {
    serde_json::from_value(json!({
        "memberLists": [{ "id": "list-1" }],
        "members": [
            { "id": "m-1", "listId": "list-1", "lot": "1", "name": "Ann" },
            { "id": "m-2", "listId": "list-1", "lot": "2", "name": "Ben" },
            { "id": "m-3", "listId": "list-1", "lot": "3", "name": "Cal" }
        ],
        "surveys": [{ "id": "s-1", "memberListId": "list-1" }],
        "responses": [
            { "id": "r-1", "surveyId": "s-1", "memberId": "m-1" },
            { "id": "r-2", "surveyId": "s-1", "memberId": "m-2" },
            { "id": "r-3", "surveyId": "s-1", "memberId": "m-3", "submitted": true }
        ],
        "reminders": [
            { "surveyId": "s-1", "memberId": "m-1" },
            { "surveyId": "s-1", "memberId": "m-1" },
            { "surveyId": "s-1", "memberId": "m-2" }
        ]
    }))
    .expect("seed should deserialize")
}

#[tokio::test]
async fn reminder_filter_narrows_nonrespondents() {
    let store = MemoryStore::new(reminder_seed());
    let request = StreamRequest::new("s-1").reminders(ReminderFilter::Exact(2));
    let prepared = prepare::<NonrespondentRow, _>(&store, request)
        .await
        .expect("prepare");
    assert_eq!(prepared.totals.overall, 1);

    let mut lines = Vec::new();
    pump::<NonrespondentRow, _, _>(&store, &cipher(), &prepared, &mut lines)
        .await
        .expect("pump");
    let records = decode(&lines);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["responseId"], "r-1");
    assert_eq!(records[0]["memberId"], "m-1");
    assert_eq!(records[0]["reminderCount"], 2);

    let at_least_one = prepare::<NonrespondentRow, _>(
        &store,
        StreamRequest::new("s-1").reminders(ReminderFilter::AtLeast(1)),
    )
    .await
    .expect("prepare");
    assert_eq!(at_least_one.totals.overall, 2);
}

#[tokio::test]
async fn empty_allow_list_closes_with_zero_counts() {
    let store = MemoryStore::new(reminder_seed());
    let request = StreamRequest::new("s-1").reminders(ReminderFilter::Exact(7));
    let prepared = prepare::<NonrespondentRow, _>(&store, request)
        .await
        .expect("prepare");
    assert!(prepared.exhausted);
    assert_eq!(prepared.totals.overall, 0);
    assert_eq!(prepared.totals.remaining, 0);

    let mut lines = Vec::new();
    let outcome = pump::<NonrespondentRow, _, _>(&store, &cipher(), &prepared, &mut lines)
        .await
        .expect("pump");
    assert_eq!(
        outcome,
        PumpOutcome::Exhausted {
            emitted: 0,
            batches: 0
        }
    );
    assert!(lines.is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn resuming_yields_exactly_the_rows_after_the_cursor(
        rows in 0usize..120,
        batch in 1usize..40,
        resume in 0usize..130,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let store = MemoryStore::new(seed_with_members(rows));
        let cipher = cipher();
        let mut request = StreamRequest::new("list-1").batch_size(batch);
        if resume > 0 {
            request = request.after(member_id(resume));
        }
        let (_, records) = runtime.block_on(run(&store, &cipher, request));

        let emitted: Vec<String> = records
            .iter()
            .map(|record| record["id"].as_str().expect("id").to_string())
            .collect();
        let expected: Vec<String> = (resume + 1..=rows).map(member_id).collect();
        prop_assert_eq!(emitted, expected);
    }
}
