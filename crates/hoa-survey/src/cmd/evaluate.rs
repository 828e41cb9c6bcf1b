use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::Args;
use serde::Serialize;
use serde_json::Value;
use survey_logic::{
    AnswerSet, AnswerValue, EnabledMap, ValidationResult, apply_answer, reconcile, validate,
};

use super::{load_survey, print_json, read_json};

#[derive(Args, Debug, Clone)]
pub struct EvaluateArgs {
    #[arg(long, value_name = "survey.json")]
    pub survey: PathBuf,
    #[arg(long, value_name = "answers.json")]
    pub answers: Option<PathBuf>,
    /// Apply an answer change after loading, as `questionId=value`. The value
    /// is read as JSON when it parses, otherwise as text. Repeatable.
    #[arg(long = "set", value_name = "ID=VALUE")]
    pub set: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EvaluateOutput {
    enabled: EnabledMap,
    answers: AnswerSet,
    cleared: Vec<String>,
    passes: usize,
    validation: ValidationResult,
}

pub fn run(args: EvaluateArgs) -> Result<()> {
    let questions = load_survey(&args.survey)?;
    let answers = match &args.answers {
        Some(path) => AnswerSet::from_json(&read_json::<Value>(path)?),
        None => AnswerSet::new(),
    };

    let mut reconciled = reconcile(&questions, answers);
    let mut cleared = reconciled.cleared.clone();
    let mut passes = reconciled.passes;
    for assignment in &args.set {
        let (question_id, value) = parse_assignment(assignment)?;
        reconciled = apply_answer(&questions, &reconciled.answers, question_id, value);
        passes += reconciled.passes;
        for id in &reconciled.cleared {
            if !cleared.contains(id) {
                cleared.push(id.clone());
            }
        }
    }

    let validation = validate(&questions, &reconciled.answers);
    print_json(&EvaluateOutput {
        enabled: reconciled.enabled,
        answers: reconciled.answers,
        cleared,
        passes,
        validation,
    })
}

fn parse_assignment(raw: &str) -> Result<(&str, Option<AnswerValue>)> {
    let (id, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected ID=VALUE, got '{raw}'"))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(anyhow!("missing question id in '{raw}'"));
    }
    let json = serde_json::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.into()));
    Ok((id, AnswerValue::from_json(&json)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_values_prefer_json() {
        let (id, value) = parse_assignment("score=4").unwrap();
        assert_eq!(id, "score");
        assert_eq!(value, Some(AnswerValue::Rating(4)));

        let (_, value) = parse_assignment(r#"colors=["red","blue"]"#).unwrap();
        assert_eq!(value, Some(AnswerValue::choices(["red", "blue"])));

        let (_, value) = parse_assignment("approve=No").unwrap();
        assert_eq!(value, Some(AnswerValue::scalar("No")));
    }

    #[test]
    fn assignment_needs_an_id() {
        assert!(parse_assignment("=Yes").is_err());
        assert!(parse_assignment("approve").is_err());
    }
}
