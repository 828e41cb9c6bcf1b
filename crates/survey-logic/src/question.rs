use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Supported survey question kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuestionType {
    #[serde(rename = "YES_NO")]
    YesNo,
    #[serde(rename = "MULTI_SINGLE")]
    MultiSingle,
    #[serde(rename = "MULTI_MULTI")]
    MultiMulti,
    #[serde(rename = "RATING_5")]
    Rating5,
    #[serde(rename = "PARAGRAPH")]
    Paragraph,
}

impl QuestionType {
    /// Options implied by the type when the question declares none.
    pub fn implied_options(self) -> &'static [&'static str] {
        match self {
            QuestionType::YesNo => &["Yes", "No"],
            _ => &[],
        }
    }
}

/// Comparison applied between the trigger answer and the condition value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionOperator {
    Equals,
    Contains,
}

/// Declarative `showWhen` rule. `trigger_order` references another question's
/// `order`, never its id, so conditions survive id regeneration on edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub trigger_order: u32,
    pub operator: ConditionOperator,
    #[serde(deserialize_with = "scalar_as_string")]
    pub value: String,
}

impl Condition {
    pub fn new(trigger_order: u32, operator: ConditionOperator, value: impl Into<String>) -> Self {
        Self {
            trigger_order,
            operator,
            value: value.into(),
        }
    }

    /// Parses the JSON-string form persisted alongside a question.
    pub fn parse(raw: &str) -> Result<Self, ConditionError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ConditionError> {
        if !value.is_object() {
            return Err(ConditionError::Shape);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Encodes the condition in the JSON-string form accepted by [`Condition::parse`].
    pub fn to_json_string(&self) -> Result<String, ConditionError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Errors raised while decoding a `showWhen` payload.
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("condition is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("condition must be a JSON object")]
    Shape,
}

/// A `showWhen` as it arrives from storage: either already an object, a
/// JSON-encoded string, or something unusable. Decoding is deferred so a bad
/// condition disables one question instead of rejecting the whole survey.
#[derive(Debug, Clone, PartialEq)]
pub enum ShowWhen {
    Parsed(Condition),
    Encoded(String),
    Malformed(Value),
}

impl ShowWhen {
    /// A blank encoded string carries no rule at all.
    pub fn is_blank(&self) -> bool {
        matches!(self, ShowWhen::Encoded(raw) if raw.trim().is_empty())
    }

    pub fn condition(&self) -> Result<Condition, ConditionError> {
        match self {
            ShowWhen::Parsed(condition) => Ok(condition.clone()),
            ShowWhen::Encoded(raw) => Condition::parse(raw),
            ShowWhen::Malformed(value) => Condition::from_value(value.clone()),
        }
    }
}

impl From<Condition> for ShowWhen {
    fn from(condition: Condition) -> Self {
        ShowWhen::Parsed(condition)
    }
}

impl Serialize for ShowWhen {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ShowWhen::Parsed(condition) => condition.serialize(serializer),
            ShowWhen::Encoded(raw) => serializer.serialize_str(raw),
            ShowWhen::Malformed(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ShowWhen {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::String(raw) => ShowWhen::Encoded(raw),
            Value::Object(_) => match Condition::from_value(value.clone()) {
                Ok(condition) => ShowWhen::Parsed(condition),
                Err(_) => ShowWhen::Malformed(value),
            },
            other => ShowWhen::Malformed(other),
        })
    }
}

/// Definition of a single survey question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub order: u32,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_selections: Option<u32>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_when: Option<ShowWhen>,
}

impl Question {
    pub fn new(id: impl Into<String>, order: u32, kind: QuestionType) -> Self {
        Self {
            id: id.into(),
            order,
            kind,
            text: None,
            options: None,
            max_selections: None,
            required: false,
            show_when: None,
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_selections(mut self, max: u32) -> Self {
        self.max_selections = Some(max);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn show_when(mut self, show_when: impl Into<ShowWhen>) -> Self {
        self.show_when = Some(show_when.into());
        self
    }

    /// Declared options, falling back to the ones implied by the type.
    pub fn effective_options(&self) -> Vec<String> {
        match &self.options {
            Some(options) if !options.is_empty() => options.clone(),
            _ => self
                .kind
                .implied_options()
                .iter()
                .map(|option| option.to_string())
                .collect(),
        }
    }
}

fn scalar_as_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(de::Error::custom(format!(
            "condition value must be a scalar, got {other}"
        ))),
    }
}
