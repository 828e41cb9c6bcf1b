use std::collections::BTreeMap;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Marker stored in `choice` when a member typed their own option.
pub const WRITE_IN_CHOICE: &str = "__WRITE_IN__";

/// Free-text answer given in place of one of the listed options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteIn {
    pub choice: String,
    #[serde(default)]
    pub write_in: String,
}

impl WriteIn {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            choice: WRITE_IN_CHOICE.to_string(),
            write_in: text.into(),
        }
    }
}

/// A single answer; the shape depends on the question type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AnswerValue {
    Scalar(String),
    MultiChoice(Vec<String>),
    Rating(i64),
    WriteIn(WriteIn),
}

impl AnswerValue {
    pub fn scalar(text: impl Into<String>) -> Self {
        AnswerValue::Scalar(text.into())
    }

    pub fn choices<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AnswerValue::MultiChoice(items.into_iter().map(Into::into).collect())
    }

    /// Interprets a raw JSON answer. `null` and unrecognised shapes yield
    /// `None`, which callers treat as unanswered.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(text) => Some(AnswerValue::Scalar(text.clone())),
            Value::Bool(flag) => Some(AnswerValue::Scalar(flag.to_string())),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Some(AnswerValue::Rating(int))
                } else {
                    let float = number.as_f64()?;
                    if float.fract() == 0.0 {
                        Some(AnswerValue::Rating(float as i64))
                    } else {
                        Some(AnswerValue::Scalar(number.to_string()))
                    }
                }
            }
            Value::Array(items) => Some(AnswerValue::MultiChoice(
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(text) => Some(text.clone()),
                        Value::Number(number) => Some(number.to_string()),
                        Value::Bool(flag) => Some(flag.to_string()),
                        _ => None,
                    })
                    .collect(),
            )),
            Value::Object(map) => {
                let choice = map.get("choice")?.as_str()?.to_string();
                let write_in = map
                    .get("writeIn")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Some(AnswerValue::WriteIn(WriteIn { choice, write_in }))
            }
        }
    }

    /// Empty strings and empty selections count as unanswered.
    pub fn is_empty(&self) -> bool {
        match self {
            AnswerValue::Scalar(text) => text.is_empty(),
            AnswerValue::MultiChoice(items) => items.is_empty(),
            AnswerValue::Rating(_) | AnswerValue::WriteIn(_) => false,
        }
    }

    /// Numeric rating, accepting numeric strings as well.
    pub fn as_rating(&self) -> Option<i64> {
        match self {
            AnswerValue::Rating(value) => Some(*value),
            AnswerValue::Scalar(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for AnswerValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        AnswerValue::from_json(&value)
            .ok_or_else(|| de::Error::custom(format!("unsupported answer shape: {value}")))
    }
}

/// Answers keyed by question id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AnswerSet(BTreeMap<String, AnswerValue>);

impl AnswerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw entry, including empty answers.
    pub fn get(&self, question_id: &str) -> Option<&AnswerValue> {
        self.0.get(question_id)
    }

    /// Entry only when it holds a non-empty answer.
    pub fn answered(&self, question_id: &str) -> Option<&AnswerValue> {
        self.0.get(question_id).filter(|value| !value.is_empty())
    }

    pub fn contains(&self, question_id: &str) -> bool {
        self.0.contains_key(question_id)
    }

    pub fn insert(&mut self, question_id: impl Into<String>, value: AnswerValue) -> Option<AnswerValue> {
        self.0.insert(question_id.into(), value)
    }

    pub fn remove(&mut self, question_id: &str) -> Option<AnswerValue> {
        self.0.remove(question_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AnswerValue)> {
        self.0.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn from_json(value: &Value) -> Self {
        value
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(key, raw)| {
                        AnswerValue::from_json(raw).map(|answer| (key.clone(), answer))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl FromIterator<(String, AnswerValue)> for AnswerSet {
    fn from_iter<T: IntoIterator<Item = (String, AnswerValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'de> Deserialize<'de> for AnswerSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Value>::deserialize(deserializer)?;
        Ok(raw
            .iter()
            .filter_map(|(key, value)| AnswerValue::from_json(value).map(|answer| (key.clone(), answer)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn answer_set_drops_nulls_and_unknown_shapes() {
        let answers: AnswerSet = serde_json::from_value(json!({
            "a": "Yes",
            "b": null,
            "c": ["x", "y"],
            "d": 4,
            "e": {"choice": "__WRITE_IN__", "writeIn": "Pool hours"},
            "f": {"unexpected": true}
        }))
        .unwrap();
        assert_eq!(answers.len(), 4);
        assert_eq!(answers.get("a"), Some(&AnswerValue::scalar("Yes")));
        assert_eq!(answers.get("c"), Some(&AnswerValue::choices(["x", "y"])));
        assert_eq!(answers.get("d"), Some(&AnswerValue::Rating(4)));
        assert_eq!(answers.get("e"), Some(&AnswerValue::WriteIn(WriteIn::new("Pool hours"))));
        assert!(!answers.contains("b"));
    }

    #[test]
    fn empty_string_is_held_but_not_answered() {
        let answers: AnswerSet = serde_json::from_value(json!({ "a": "" })).unwrap();
        assert!(answers.contains("a"));
        assert!(answers.answered("a").is_none());
    }

    #[test]
    fn numeric_string_reads_as_rating() {
        assert_eq!(AnswerValue::scalar(" 3 ").as_rating(), Some(3));
        assert_eq!(AnswerValue::scalar("three").as_rating(), None);
    }

    #[test]
    fn answers_serialize_back_to_plain_json() {
        let answers: AnswerSet = [
            ("q1".to_string(), AnswerValue::scalar("No")),
            ("q2".to_string(), AnswerValue::Rating(5)),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            serde_json::to_value(&answers).unwrap(),
            json!({ "q1": "No", "q2": 5 })
        );
    }
}
