use std::collections::BTreeMap;

use serde::Serialize;

use crate::answers::{AnswerSet, AnswerValue, WRITE_IN_CHOICE};
use crate::question::{Question, QuestionType};
use crate::reconcile::reconcile;

/// Distribution of RATING_5 answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingSummary {
    pub histogram: [u64; 5],
    pub mean: Option<f64>,
}

impl RatingSummary {
    fn record(&mut self, rating: i64) {
        if let Some(slot) = rating
            .checked_sub(1)
            .and_then(|idx| usize::try_from(idx).ok())
            .and_then(|idx| self.histogram.get_mut(idx))
        {
            *slot += 1;
        }
    }

    fn finish(&mut self) {
        let count: u64 = self.histogram.iter().sum();
        if count == 0 {
            self.mean = None;
            return;
        }
        let total: u64 = self
            .histogram
            .iter()
            .enumerate()
            .map(|(idx, hits)| (idx as u64 + 1) * hits)
            .sum();
        self.mean = Some(total as f64 / count as f64);
    }
}

/// Aggregated answers for one question across all responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionTally {
    pub question_id: String,
    pub order: u32,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    /// Responses in which the question was visible.
    pub eligible: u64,
    pub answered: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub write_ins: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<RatingSummary>,
}

impl QuestionTally {
    fn empty(question: &Question) -> Self {
        let options = match question.kind {
            QuestionType::YesNo | QuestionType::MultiSingle | QuestionType::MultiMulti => question
                .effective_options()
                .into_iter()
                .map(|option| (option, 0))
                .collect(),
            _ => BTreeMap::new(),
        };
        let rating = matches!(question.kind, QuestionType::Rating5).then_some(RatingSummary {
            histogram: [0; 5],
            mean: None,
        });
        Self {
            question_id: question.id.clone(),
            order: question.order,
            kind: question.kind,
            eligible: 0,
            answered: 0,
            options,
            write_ins: Vec::new(),
            rating,
        }
    }

    fn record(&mut self, answer: &AnswerValue) {
        self.answered += 1;
        match answer {
            AnswerValue::Scalar(text) => match self.kind {
                QuestionType::Rating5 => {
                    if let (Some(summary), Some(rating)) = (self.rating.as_mut(), answer.as_rating()) {
                        summary.record(rating);
                    }
                }
                QuestionType::Paragraph => {}
                _ => *self.options.entry(text.clone()).or_insert(0) += 1,
            },
            AnswerValue::MultiChoice(items) => {
                for item in items {
                    *self.options.entry(item.clone()).or_insert(0) += 1;
                }
            }
            AnswerValue::Rating(rating) => {
                if let Some(summary) = self.rating.as_mut() {
                    summary.record(*rating);
                }
            }
            AnswerValue::WriteIn(write_in) => {
                if write_in.choice == WRITE_IN_CHOICE {
                    self.write_ins.push(write_in.write_in.clone());
                } else {
                    *self.options.entry(write_in.choice.clone()).or_insert(0) += 1;
                }
            }
        }
    }
}

/// Tallies submitted responses. Each response is reconciled first so answers
/// to questions hidden for that member are not counted.
pub fn tally(questions: &[Question], responses: &[AnswerSet]) -> Vec<QuestionTally> {
    let mut ordered: Vec<&Question> = questions.iter().collect();
    ordered.sort_by_key(|question| question.order);

    let mut tallies: Vec<QuestionTally> = ordered.iter().map(|question| QuestionTally::empty(question)).collect();

    for response in responses {
        let reconciled = reconcile(questions, response.clone());
        for (question, entry) in ordered.iter().zip(tallies.iter_mut()) {
            if !reconciled.enabled.get(&question.id).copied().unwrap_or(false) {
                continue;
            }
            entry.eligible += 1;
            if let Some(answer) = reconciled.answers.answered(&question.id) {
                entry.record(answer);
            }
        }
    }

    for entry in &mut tallies {
        if let Some(summary) = entry.rating.as_mut() {
            summary.finish();
        }
    }
    tallies
}
