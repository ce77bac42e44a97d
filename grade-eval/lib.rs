//! Grading of extracted answers against a reference key.
//!
//! Free-text answers are normalised and compared with Jaro–Winkler
//! similarity, multiple-choice answers exactly. Results are aggregated into
//! an immutable [`Report`] that can be persisted and turned into
//! [`Insights`] for the student.

pub mod answers;
pub mod error;
pub mod extract;
pub mod feedback;
pub mod normalize;
pub mod report;
pub mod scoring;

pub use answers::{AnswerKey, AnswerSheet, FillBlankEntry, McqEntry, QuestionKind, ReferenceQuestion, Section, StudentAnswers};
pub use error::{EvalError, EvalResult};
pub use extract::{AnswerExtractor, LayoutField, OcrOutput, SheetLayout};
pub use feedback::{insights_path_for, FeedbackWriter, Insights, RuleBasedFeedback};
pub use normalize::normalize;
pub use report::{QuestionResult, Report, ReportBuilder, ReportSummary, Status, NOT_ANSWERED};
pub use scoring::{CreditTier, ScoringEngine, ScoringPolicy};
