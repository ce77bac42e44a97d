use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::answers::{AnswerKey, QuestionKind, ReferenceQuestion, Section, StudentAnswers};
use crate::normalize::normalize;
use crate::report::{QuestionResult, Report, ReportBuilder, Status, NOT_ANSWERED};

/// Credit tiers for free-text answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringPolicy {
    /// Similarity at or above which an answer earns full marks
    pub full_credit_threshold: f64,
    /// Similarity at or above which an answer earns partial marks
    pub partial_credit_threshold: f64,
    /// Share of the marks awarded for partial credit
    pub partial_fraction: f64,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            full_credit_threshold: 0.9,
            partial_credit_threshold: 0.7,
            partial_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditTier {
    Full,
    Partial,
    None,
}

impl CreditTier {
    pub fn from_ratio(ratio: f64, policy: &ScoringPolicy) -> Self {
        if ratio >= policy.full_credit_threshold {
            CreditTier::Full
        } else if ratio >= policy.partial_credit_threshold {
            CreditTier::Partial
        } else {
            CreditTier::None
        }
    }
}

/// Similarity of two normalised strings in [0, 1].
///
/// Jaro-Winkler rather than a longest-matching-block ratio: it rewards a
/// shared prefix, so a misspelling such as "photosintesis" clears the 0.9
/// full-credit tier. The same prefix weighting gives a truncated answer
/// ("photo" for "photosynthesis", about 0.87) partial credit.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::jaro_winkler(a, b)
}

#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    policy: ScoringPolicy,
}

impl ScoringEngine {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ScoringPolicy {
        &self.policy
    }

    /// Grade every reference question once, multiple choice first
    pub fn evaluate(&self, key: &AnswerKey, answers: &StudentAnswers) -> Report {
        let mut builder = ReportBuilder::new();

        for section in [Section::MultipleChoice, Section::FillInTheBlanks] {
            for question in key.section(section) {
                let answer = answers.get(section, &question.key);
                builder.push(self.score_question(section, question, answer));
            }
        }

        let report = builder.finish();
        let s = &report.summary;
        info!(
            total = s.total_questions,
            correct = s.correct_answers,
            wrong = s.wrong_answers,
            unanswered = s.unanswered,
            percentage = s.percentage,
            "evaluation finished"
        );
        report
    }

    pub fn score_question(&self, section: Section, question: &ReferenceQuestion, answer: Option<&str>) -> QuestionResult {
        let base = QuestionResult {
            question_id: question.key.clone(),
            section,
            question_type: question.kind.to_string(),
            student_answer: answer.map_or_else(|| NOT_ANSWERED.to_string(), str::to_string),
            correct_answer: question.correct.clone(),
            status: Status::Unanswered,
            marks_obtained: 0.0,
            marks_total: question.marks,
            confidence: 1.0,
        };

        let Some(answer) = answer else {
            return base;
        };

        match &question.kind {
            QuestionKind::Mcq => self.score_mcq(base, question, answer),
            QuestionKind::FillBlank | QuestionKind::OneWord => self.score_free_text(base, question, answer),
            QuestionKind::Unsupported(kind) => {
                warn!(question = %question.key, kind = %kind, "unsupported question type, not graded");
                QuestionResult {
                    status: Status::UnsupportedType,
                    confidence: 0.0,
                    ..base
                }
            }
        }
    }

    fn score_mcq(&self, base: QuestionResult, question: &ReferenceQuestion, answer: &str) -> QuestionResult {
        let student = answer.trim().to_uppercase();
        let correct = question.correct.trim().to_uppercase();
        let confidence = if student.chars().count() == 1 { 1.0 } else { 0.5 };

        let (status, marks) = if student == correct {
            (Status::Correct, question.marks)
        } else {
            (Status::Wrong, 0.0)
        };

        QuestionResult {
            student_answer: student,
            correct_answer: correct,
            status,
            marks_obtained: marks,
            confidence,
            ..base
        }
    }

    fn score_free_text(&self, base: QuestionResult, question: &ReferenceQuestion, answer: &str) -> QuestionResult {
        let student = normalize(answer);
        let options: Vec<String> = question.accepted_options().into_iter().map(normalize).collect();

        if options.iter().any(|o| *o == student) {
            return QuestionResult {
                status: Status::Correct,
                marks_obtained: question.marks,
                confidence: 1.0,
                ..base
            };
        }

        let ratio = options
            .iter()
            .map(|o| similarity(&student, o))
            .fold(0.0f64, f64::max);

        let (status, marks) = match CreditTier::from_ratio(ratio, &self.policy) {
            CreditTier::Full => (Status::Correct, question.marks),
            CreditTier::Partial => (Status::Partial, question.marks * self.policy.partial_fraction),
            CreditTier::None => (Status::Wrong, 0.0),
        };

        QuestionResult {
            status,
            marks_obtained: marks,
            confidence: ratio,
            ..base
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answers::{AnswerSheet, FillBlankEntry, McqEntry};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn question(key: &str, kind: QuestionKind, correct: &str, options: &[&str], marks: f64) -> ReferenceQuestion {
        ReferenceQuestion {
            key: key.into(),
            kind,
            correct: correct.into(),
            correct_options: options.iter().map(|o| o.to_string()).collect(),
            marks,
        }
    }

    fn photosynthesis_key() -> AnswerKey {
        AnswerKey::new(
            vec![],
            vec![question(
                "2",
                QuestionKind::FillBlank,
                "photosynthesis",
                &["photosynthesis", "photosynthetic"],
                2.0,
            )],
        )
        .unwrap()
    }

    fn fill_answer(key: &str, text: &str) -> StudentAnswers {
        let mut answers = StudentAnswers::default();
        answers.insert(Section::FillInTheBlanks, key, text).unwrap();
        answers
    }

    #[test]
    fn test_mcq_case_insensitive_full_marks() {
        let key = AnswerKey::new(vec![question("1", QuestionKind::Mcq, "B", &[], 1.0)], vec![]).unwrap();
        let mut answers = StudentAnswers::default();
        answers.insert(Section::MultipleChoice, "1", "b").unwrap();

        let report = ScoringEngine::default().evaluate(&key, &answers);
        assert_eq!(report.summary.total_marks, 1.0);
        assert_eq!(report.summary.obtained_marks, 1.0);
        assert_relative_eq!(report.summary.percentage, 100.0);

        let r = &report.detailed_results[0];
        assert_eq!(r.status, Status::Correct);
        assert_eq!(r.student_answer, "B");
        assert_eq!(r.confidence, 1.0);
    }

    #[test]
    fn test_mcq_wrong_and_multi_letter_confidence() {
        let engine = ScoringEngine::default();
        let q = question("1", QuestionKind::Mcq, "B", &[], 1.0);

        let r = engine.score_question(Section::MultipleChoice, &q, Some("C"));
        assert_eq!((r.status, r.marks_obtained, r.confidence), (Status::Wrong, 0.0, 1.0));

        let r = engine.score_question(Section::MultipleChoice, &q, Some("AB"));
        assert_eq!((r.status, r.confidence), (Status::Wrong, 0.5));
    }

    #[test]
    fn test_misspelling_within_tolerance_is_correct() {
        let report = ScoringEngine::default().evaluate(&photosynthesis_key(), &fill_answer("2", "photosintesis"));
        let r = &report.detailed_results[0];
        assert_eq!(r.status, Status::Correct);
        assert_eq!(r.marks_obtained, 2.0);
        assert!(r.confidence >= 0.9 && r.confidence < 1.0);
    }

    #[test]
    fn test_unrelated_answer_is_wrong() {
        let report = ScoringEngine::default().evaluate(&photosynthesis_key(), &fill_answer("2", "respiration"));
        let r = &report.detailed_results[0];
        assert_eq!(r.status, Status::Wrong);
        assert_eq!(r.marks_obtained, 0.0);
        assert!(r.confidence < 0.7);
    }

    #[test]
    fn test_close_answer_earns_partial_credit() {
        let report = ScoringEngine::default().evaluate(&photosynthesis_key(), &fill_answer("2", "photo"));
        let r = &report.detailed_results[0];
        assert_eq!(r.status, Status::Partial);
        assert_eq!(r.marks_obtained, 1.0);
        assert_eq!(report.summary.partial_answers, 1);
        assert_eq!(report.summary.wrong_answers, 1);
    }

    #[test]
    fn test_exact_match_after_normalisation() {
        let report = ScoringEngine::default().evaluate(&photosynthesis_key(), &fill_answer("2", " Photosynthetic! "));
        let r = &report.detailed_results[0];
        assert_eq!((r.status, r.marks_obtained, r.confidence), (Status::Correct, 2.0, 1.0));
        assert_eq!(r.student_answer, " Photosynthetic! ");
    }

    #[test]
    fn test_one_word_uses_correct_when_no_options() {
        let engine = ScoringEngine::default();
        let q = question("capital", QuestionKind::OneWord, "Paris", &[], 1.0);
        let r = engine.score_question(Section::FillInTheBlanks, &q, Some("paris."));
        assert_eq!(r.status, Status::Correct);
    }

    #[test]
    fn test_unanswered_questions_are_counted() {
        let key = AnswerKey::new(
            vec![
                question("1", QuestionKind::Mcq, "A", &[], 1.0),
                question("2", QuestionKind::Mcq, "C", &[], 1.0),
            ],
            vec![],
        )
        .unwrap();
        let mut answers = StudentAnswers::default();
        answers.insert(Section::MultipleChoice, "1", "A").unwrap();

        let report = ScoringEngine::default().evaluate(&key, &answers);
        let s = &report.summary;
        assert_eq!(s.unanswered, 1);
        assert_eq!(s.correct_answers + s.wrong_answers + s.unanswered, s.total_questions);

        let missing = &report.detailed_results[1];
        assert_eq!(missing.status, Status::Unanswered);
        assert_eq!(missing.student_answer, NOT_ANSWERED);
        assert_eq!(missing.marks_obtained, 0.0);
        assert_eq!(missing.confidence, 1.0);
    }

    #[test]
    fn test_unsupported_type_is_recorded() {
        let key = AnswerKey::new(vec![], vec![question("essay", "essay".to_string().into(), "x", &[], 5.0)]).unwrap();
        let report = ScoringEngine::default().evaluate(&key, &fill_answer("essay", "a long answer"));

        let r = &report.detailed_results[0];
        assert_eq!(r.status, Status::UnsupportedType);
        assert_eq!(r.question_type, "essay");
        assert_eq!((r.marks_obtained, r.confidence), (0.0, 0.0));
        assert_eq!(report.summary.unsupported, 1);
        assert_eq!(report.summary.total_marks, 5.0);
    }

    #[test]
    fn test_tier_boundaries() {
        let policy = ScoringPolicy::default();
        assert_eq!(CreditTier::from_ratio(0.69, &policy), CreditTier::None);
        assert_eq!(CreditTier::from_ratio(0.70, &policy), CreditTier::Partial);
        assert_eq!(CreditTier::from_ratio(0.71, &policy), CreditTier::Partial);
        assert_eq!(CreditTier::from_ratio(0.89, &policy), CreditTier::Partial);
        assert_eq!(CreditTier::from_ratio(0.90, &policy), CreditTier::Full);
        assert_eq!(CreditTier::from_ratio(0.91, &policy), CreditTier::Full);
    }

    #[test]
    fn test_free_text_marks_at_tier_boundaries() {
        let q = question("2", QuestionKind::FillBlank, "photosynthesis", &[], 2.0);
        let ratio = similarity("photo", "photosynthesis");
        let score = |policy: ScoringPolicy| {
            let r = ScoringEngine::new(policy).score_question(Section::FillInTheBlanks, &q, Some("photo"));
            (r.status, r.marks_obtained)
        };

        // Ratio exactly at the full tier
        let at_full = ScoringPolicy { full_credit_threshold: ratio, partial_credit_threshold: 0.7, ..ScoringPolicy::default() };
        assert_eq!(score(at_full), (Status::Correct, 2.0));

        // Just below full, at the partial tier
        let at_partial = ScoringPolicy {
            full_credit_threshold: ratio + 1e-9,
            partial_credit_threshold: ratio,
            ..ScoringPolicy::default()
        };
        assert_eq!(score(at_partial), (Status::Partial, 1.0));

        // Just below the partial tier
        let below = ScoringPolicy {
            full_credit_threshold: 0.99,
            partial_credit_threshold: ratio + 1e-9,
            ..ScoringPolicy::default()
        };
        assert_eq!(score(below), (Status::Wrong, 0.0));

        let quarter = ScoringPolicy { partial_fraction: 0.25, ..ScoringPolicy::default() };
        assert_eq!(score(quarter), (Status::Partial, 0.5));
    }

    #[test]
    fn test_results_follow_reference_order() {
        let sheet = AnswerSheet {
            multiple_choice: vec![
                McqEntry { question_number: "2".into(), selected_answer: "A".into() },
                McqEntry { question_number: "1".into(), selected_answer: "B".into() },
            ],
            fill_in_the_blanks: vec![FillBlankEntry {
                question_prompt: "Fill in the blank 1".into(),
                written_answer: "water".into(),
            }],
        };
        let key = AnswerKey::from_sheet(&sheet, 1.0).unwrap();
        let answers = StudentAnswers::from_sheet(&sheet).unwrap();

        let report = ScoringEngine::default().evaluate(&key, &answers);
        let ids: Vec<&str> = report.detailed_results.iter().map(|r| r.question_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1", "Fill in the blank 1"]);
        assert_relative_eq!(report.summary.percentage, 100.0);
    }

    proptest! {
        #[test]
        fn mcq_matches_regardless_of_case(letter in "[a-eA-E]", upper in any::<bool>()) {
            let correct = if upper { letter.to_lowercase() } else { letter.to_uppercase() };
            let q = question("1", QuestionKind::Mcq, &correct, &[], 3.0);
            let r = ScoringEngine::default().score_question(Section::MultipleChoice, &q, Some(letter.as_str()));
            prop_assert_eq!(r.status, Status::Correct);
            prop_assert_eq!(r.marks_obtained, r.marks_total);
        }

        #[test]
        fn missing_answer_is_unanswered_for_any_type(kind in "[a-z_]{1,12}", marks in 0.5f64..10.0) {
            let q = question("q", QuestionKind::from(kind), "ref", &[], marks);
            let r = ScoringEngine::default().score_question(Section::FillInTheBlanks, &q, None);
            prop_assert_eq!(r.status, Status::Unanswered);
            prop_assert_eq!(r.marks_obtained, 0.0);
            prop_assert_eq!(r.student_answer, NOT_ANSWERED);
        }

        #[test]
        fn free_text_marks_stay_in_range(answer in "[a-z ]{0,20}") {
            let engine = ScoringEngine::default();
            let q = question("q", QuestionKind::FillBlank, "photosynthesis", &[], 2.0);
            let r = engine.score_question(Section::FillInTheBlanks, &q, Some(answer.as_str()));
            prop_assert!(r.marks_obtained >= 0.0 && r.marks_obtained <= 2.0);
            prop_assert!(r.confidence >= 0.0 && r.confidence <= 1.0);
        }
    }
}
