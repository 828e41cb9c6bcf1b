use serde_json::json;

use survey_logic::{AnswerSet, Condition, Question, tally};

fn survey() -> Vec<Question> {
    serde_json::from_value(json!([
        { "id": "why", "order": 1, "type": "PARAGRAPH",
          "showWhen": { "triggerOrder": 0, "operator": "equals", "value": "No" } },
        { "id": "approve", "order": 0, "type": "YES_NO" },
        { "id": "vendor", "order": 2, "type": "MULTI_SINGLE", "options": ["Acme", "Globex"] },
        { "id": "score", "order": 3, "type": "RATING_5" }
    ]))
    .expect("fixture should deserialize")
}

fn responses() -> Vec<AnswerSet> {
    serde_json::from_value(json!([
        { "approve": "Yes", "why": "stale answer", "vendor": "Acme", "score": 5 },
        { "approve": "No", "why": "Too costly", "vendor": { "choice": "__WRITE_IN__", "writeIn": "Initech" }, "score": "3" },
        { "approve": "No", "vendor": "Acme" }
    ]))
    .expect("responses should deserialize")
}

#[test]
fn tallies_are_reported_in_question_order() {
    let tallies = tally(&survey(), &responses());
    let ids: Vec<&str> = tallies.iter().map(|entry| entry.question_id.as_str()).collect();
    assert_eq!(ids, vec!["approve", "why", "vendor", "score"]);
}

#[test]
fn hidden_answers_are_not_counted() {
    let tallies = tally(&survey(), &responses());
    let why = &tallies[1];
    assert_eq!(why.eligible, 2);
    assert_eq!(why.answered, 1);
}

#[test]
fn option_counts_and_write_ins() {
    let tallies = tally(&survey(), &responses());
    let approve = &tallies[0];
    assert_eq!(approve.options["Yes"], 1);
    assert_eq!(approve.options["No"], 2);

    let vendor = &tallies[2];
    assert_eq!(vendor.options["Acme"], 2);
    assert_eq!(vendor.options["Globex"], 0);
    assert_eq!(vendor.write_ins, vec!["Initech".to_string()]);
}

#[test]
fn rating_histogram_and_mean() {
    let tallies = tally(&survey(), &responses());
    let score = tallies[3].rating.as_ref().expect("rating summary");
    assert_eq!(score.histogram, [0, 0, 1, 0, 1]);
    assert_eq!(score.mean, Some(4.0));
    assert_eq!(tallies[3].answered, 2);
}

#[test]
fn condition_round_trips_through_string_encoding() {
    let original: Condition =
        serde_json::from_value(json!({ "triggerOrder": 3, "operator": "contains", "value": "pool" }))
            .unwrap();
    let encoded = original.to_json_string().unwrap();
    let decoded = Condition::parse(&encoded).unwrap();
    assert_eq!(original, decoded);
}
