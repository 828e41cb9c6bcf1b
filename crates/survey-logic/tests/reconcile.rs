use proptest::prelude::*;

use survey_logic::{
    AnswerSet, AnswerValue, Condition, ConditionOperator, Question, QuestionType, apply_answer,
    evaluate, reconcile,
};

fn approve_survey() -> Vec<Question> {
    vec![
        Question::new("approve", 0, QuestionType::YesNo)
            .with_text("Approve?")
            .required(),
        Question::new("why-not", 1, QuestionType::Paragraph)
            .with_text("Why not?")
            .show_when(Condition::new(0, ConditionOperator::Equals, "No")),
    ]
}

#[test]
fn answering_yes_clears_hidden_follow_up() {
    let questions = approve_survey();
    let mut answers = AnswerSet::new();
    answers.insert("approve", AnswerValue::scalar("No"));
    answers.insert("why-not", AnswerValue::scalar("Too expensive"));

    let result = apply_answer(&questions, &answers, "approve", Some(AnswerValue::scalar("Yes")));
    assert_eq!(result.enabled["why-not"], false);
    assert!(result.answers.get("why-not").is_none());
    assert_eq!(result.cleared, vec!["why-not".to_string()]);
}

#[test]
fn answering_no_enables_follow_up() {
    let questions = approve_survey();
    let result = apply_answer(&questions, &AnswerSet::new(), "approve", Some(AnswerValue::scalar("No")));
    assert_eq!(result.enabled["why-not"], true);
    assert!(result.cleared.is_empty());
    assert_eq!(result.passes, 0);
}

#[test]
fn clearing_an_answer_removes_it() {
    let questions = approve_survey();
    let mut answers = AnswerSet::new();
    answers.insert("approve", AnswerValue::scalar("No"));
    answers.insert("why-not", AnswerValue::scalar("Because"));

    let result = apply_answer(&questions, &answers, "approve", Some(AnswerValue::scalar("")));
    assert!(result.answers.get("approve").is_none());
    assert!(result.answers.get("why-not").is_none());
}

#[test]
fn cascading_disables_reach_a_fixed_point() {
    let questions = vec![
        Question::new("q0", 0, QuestionType::YesNo),
        Question::new("q1", 1, QuestionType::YesNo)
            .show_when(Condition::new(0, ConditionOperator::Equals, "Yes")),
        Question::new("q2", 2, QuestionType::YesNo)
            .show_when(Condition::new(1, ConditionOperator::Equals, "Yes")),
        Question::new("q3", 3, QuestionType::Paragraph)
            .show_when(Condition::new(2, ConditionOperator::Equals, "Yes")),
    ];
    let mut answers = AnswerSet::new();
    answers.insert("q0", AnswerValue::scalar("Yes"));
    answers.insert("q1", AnswerValue::scalar("Yes"));
    answers.insert("q2", AnswerValue::scalar("Yes"));
    answers.insert("q3", AnswerValue::scalar("details"));

    let result = apply_answer(&questions, &answers, "q0", Some(AnswerValue::scalar("No")));
    assert_eq!(result.cleared, vec!["q1", "q2", "q3"]);
    assert_eq!(result.passes, 3);
    assert_eq!(result.answers.len(), 1);
    assert!(result.enabled.iter().filter(|(id, _)| *id != "q0").all(|(_, on)| !on));
}

#[test]
fn answers_for_unknown_questions_are_left_alone() {
    let questions = approve_survey();
    let mut answers = AnswerSet::new();
    answers.insert("legacy", AnswerValue::scalar("kept"));
    let result = reconcile(&questions, answers);
    assert_eq!(result.answers.get("legacy"), Some(&AnswerValue::scalar("kept")));
}

fn arb_survey() -> impl Strategy<Value = (Vec<Question>, AnswerSet)> {
    (1usize..8).prop_flat_map(|count| {
        let conditions = proptest::collection::vec(
            proptest::option::of((0u32..10, any::<bool>(), prop_oneof![Just("Yes"), Just("No")])),
            count,
        );
        let answers = proptest::collection::vec(
            proptest::option::of(prop_oneof![Just("Yes"), Just("No"), Just("")]),
            count,
        );
        (conditions, answers).prop_map(|(conditions, given)| {
            let questions: Vec<Question> = conditions
                .into_iter()
                .enumerate()
                .map(|(idx, condition)| {
                    let question = Question::new(format!("q{idx}"), idx as u32, QuestionType::YesNo);
                    match condition {
                        Some((trigger, equals, value)) => {
                            let operator = if equals {
                                ConditionOperator::Equals
                            } else {
                                ConditionOperator::Contains
                            };
                            question.show_when(Condition::new(trigger, operator, value))
                        }
                        None => question,
                    }
                })
                .collect();
            let answers: AnswerSet = given
                .into_iter()
                .enumerate()
                .filter_map(|(idx, value)| value.map(|text| (format!("q{idx}"), AnswerValue::scalar(text))))
                .collect();
            (questions, answers)
        })
    })
}

proptest! {
    #[test]
    fn reconcile_converges_without_hidden_answers((questions, answers) in arb_survey()) {
        let result = reconcile(&questions, answers);
        prop_assert!(result.passes <= questions.len());
        let enabled = evaluate(&questions, &result.answers);
        prop_assert_eq!(&enabled, &result.enabled);
        for question in &questions {
            if !enabled[&question.id] {
                prop_assert!(result.answers.get(&question.id).is_none());
            }
        }
        let again = reconcile(&questions, result.answers.clone());
        prop_assert!(again.cleared.is_empty());
        prop_assert_eq!(again.answers, result.answers);
    }
}
