use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::answers::{AnswerSet, AnswerValue, WRITE_IN_CHOICE};
use crate::question::{Question, QuestionType};
use crate::visibility::evaluate;

/// Validation error metadata reported for a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub question_id: String,
    pub message: String,
    pub code: String,
}

/// Result returned from [`validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ValidationError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_required: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown_fields: Vec<String>,
}

pub fn validate(questions: &[Question], answers: &AnswerSet) -> ValidationResult {
    let enabled = evaluate(questions, answers);

    let mut errors = Vec::new();
    let mut missing_required = Vec::new();

    for question in questions {
        let visible = enabled.get(&question.id).copied().unwrap_or(false);
        match answers.answered(&question.id) {
            None => {
                if visible && question.required {
                    missing_required.push(question.id.clone());
                }
            }
            Some(_) if !visible => errors.push(base_error(
                question,
                "answer given for a hidden question",
                "hidden_answer",
            )),
            Some(value) => {
                if let Some(error) = validate_value(question, value) {
                    errors.push(error);
                }
            }
        }
    }

    let known: BTreeSet<&str> = questions.iter().map(|question| question.id.as_str()).collect();
    let unknown_fields: Vec<String> = answers
        .ids()
        .filter(|id| !known.contains(id))
        .map(str::to_string)
        .collect();

    ValidationResult {
        valid: errors.is_empty() && missing_required.is_empty() && unknown_fields.is_empty(),
        errors,
        missing_required,
        unknown_fields,
    }
}

fn validate_value(question: &Question, value: &AnswerValue) -> Option<ValidationError> {
    match (question.kind, value) {
        (QuestionType::YesNo, AnswerValue::Scalar(text)) => check_option(question, text),
        (QuestionType::MultiSingle, AnswerValue::Scalar(text)) => check_option(question, text),
        (QuestionType::MultiSingle, AnswerValue::WriteIn(write_in)) => {
            if write_in.choice != WRITE_IN_CHOICE {
                return check_option(question, &write_in.choice);
            }
            if write_in.write_in.trim().is_empty() {
                return Some(base_error(question, "write-in text is empty", "empty_write_in"));
            }
            None
        }
        (QuestionType::MultiMulti, AnswerValue::MultiChoice(items)) => {
            if let Some(max) = question.max_selections
                && items.len() > max as usize
            {
                return Some(base_error(
                    question,
                    &format!("too many selections (expected at most {}, got {})", max, items.len()),
                    "too_many_selections",
                ));
            }
            items.iter().find_map(|item| check_option(question, item))
        }
        (QuestionType::Rating5, value) => match value.as_rating() {
            Some(rating) if (1..=5).contains(&rating) => None,
            Some(_) => Some(base_error(question, "rating must be between 1 and 5", "rating_out_of_range")),
            None => Some(type_mismatch(question)),
        },
        (QuestionType::Paragraph, AnswerValue::Scalar(_)) => None,
        _ => Some(type_mismatch(question)),
    }
}

fn check_option(question: &Question, choice: &str) -> Option<ValidationError> {
    let options = question.effective_options();
    if options.is_empty() || options.iter().any(|option| option == choice) {
        return None;
    }
    Some(base_error(
        question,
        &format!("'{choice}' is not one of the listed options"),
        "invalid_option",
    ))
}

fn type_mismatch(question: &Question) -> ValidationError {
    base_error(question, "type mismatch", "type_mismatch")
}

fn base_error(question: &Question, message: &str, code: &str) -> ValidationError {
    ValidationError {
        question_id: question.id.clone(),
        message: message.into(),
        code: code.into(),
    }
}
