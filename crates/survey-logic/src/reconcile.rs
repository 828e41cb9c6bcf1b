use serde::Serialize;

use crate::answers::{AnswerSet, AnswerValue};
use crate::question::Question;
use crate::visibility::{EnabledMap, evaluate};

/// Answers with every hidden question stripped, plus the visibility they were
/// checked against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconciled {
    pub answers: AnswerSet,
    pub enabled: EnabledMap,
    pub cleared: Vec<String>,
    pub passes: usize,
}

/// Evaluates and strips until no answer is removed. Removing an answer can
/// hide a dependent question, so one pass is not enough; every productive
/// pass removes at least one answer, which bounds the loop by the number of
/// questions.
pub fn reconcile(questions: &[Question], mut answers: AnswerSet) -> Reconciled {
    let mut enabled = evaluate(questions, &answers);
    let mut cleared = Vec::new();
    let mut passes = 0;

    while passes < questions.len() {
        let removed = strip_disabled(questions, &enabled, &mut answers);
        if removed.is_empty() {
            break;
        }
        passes += 1;
        cleared.extend(removed);
        enabled = evaluate(questions, &answers);
    }

    Reconciled {
        answers,
        enabled,
        cleared,
        passes,
    }
}

/// Records one answer change and reconciles. `None` or an empty value clears
/// the answer.
pub fn apply_answer(
    questions: &[Question],
    answers: &AnswerSet,
    question_id: &str,
    value: Option<AnswerValue>,
) -> Reconciled {
    let mut patched = answers.clone();
    match value {
        Some(value) if !value.is_empty() => {
            patched.insert(question_id, value);
        }
        _ => {
            patched.remove(question_id);
        }
    }
    reconcile(questions, patched)
}

fn strip_disabled(questions: &[Question], enabled: &EnabledMap, answers: &mut AnswerSet) -> Vec<String> {
    let mut removed = Vec::new();
    for question in questions {
        let visible = enabled.get(&question.id).copied().unwrap_or(false);
        if !visible && answers.remove(&question.id).is_some() {
            removed.push(question.id.clone());
        }
    }
    removed
}
