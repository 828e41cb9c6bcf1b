use std::collections::BTreeMap;

use crate::answers::{AnswerSet, AnswerValue};
use crate::question::{Condition, ConditionOperator, Question};

/// Question id to enabled flag. Derived on every answer change, never stored.
pub type EnabledMap = BTreeMap<String, bool>;

pub fn evaluate(questions: &[Question], answers: &AnswerSet) -> EnabledMap {
    questions
        .iter()
        .map(|question| (question.id.clone(), is_enabled(question, questions, answers)))
        .collect()
}

/// Any condition that cannot be resolved disables the question. The trigger
/// must sit strictly earlier in the survey, so self, forward and cyclic
/// references are all disabled.
pub fn is_enabled(question: &Question, questions: &[Question], answers: &AnswerSet) -> bool {
    let Some(show_when) = &question.show_when else {
        return true;
    };
    if show_when.is_blank() {
        return true;
    }
    let Ok(condition) = show_when.condition() else {
        return false;
    };
    let Some(trigger) = questions
        .iter()
        .find(|candidate| candidate.order == condition.trigger_order)
    else {
        return false;
    };
    if trigger.order >= question.order {
        return false;
    }
    match answers.answered(&trigger.id) {
        Some(answer) => condition_satisfied(&condition, answer),
        None => false,
    }
}

pub fn condition_satisfied(condition: &Condition, answer: &AnswerValue) -> bool {
    let expected = condition.value.as_str();
    match answer {
        AnswerValue::MultiChoice(items) => match condition.operator {
            ConditionOperator::Equals => items.iter().any(|item| item == expected),
            ConditionOperator::Contains => items.iter().any(|item| item.contains(expected)),
        },
        AnswerValue::Scalar(text) => scalar_matches(condition.operator, text, expected),
        AnswerValue::Rating(value) => scalar_matches(condition.operator, &value.to_string(), expected),
        AnswerValue::WriteIn(write_in) => match condition.operator {
            ConditionOperator::Equals => {
                write_in.choice == expected || write_in.write_in == expected
            }
            ConditionOperator::Contains => write_in.write_in.contains(expected),
        },
    }
}

fn scalar_matches(operator: ConditionOperator, actual: &str, expected: &str) -> bool {
    match operator {
        ConditionOperator::Equals => actual == expected,
        ConditionOperator::Contains => actual.contains(expected),
    }
}
