#![allow(missing_docs)]

pub mod answers;
pub mod question;
pub mod reconcile;
pub mod tally;
pub mod validate;
pub mod visibility;

pub use answers::{AnswerSet, AnswerValue, WRITE_IN_CHOICE, WriteIn};
pub use question::{Condition, ConditionError, ConditionOperator, Question, QuestionType, ShowWhen};
pub use reconcile::{Reconciled, apply_answer, reconcile};
pub use tally::{QuestionTally, RatingSummary, tally};
pub use validate::{ValidationError, ValidationResult, validate};
pub use visibility::{EnabledMap, condition_satisfied, evaluate, is_enabled};
