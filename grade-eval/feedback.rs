use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::answers::{load_json, Section};
use crate::error::EvalResult;
use crate::report::{write_json_pretty, Report, Status};

/// Student-facing summary of a report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    pub total_questions: usize,
    pub correct_answers: usize,
    pub wrong_answers: usize,
    pub unanswered: usize,
    /// `accuracy_percent` formatted as `"NN.NN%"`
    pub score_percentage: String,
    pub overall_performance: String,
    pub strengths: Vec<String>,
    pub areas_for_improvement: Vec<String>,
    pub motivational_feedback: String,
}

impl Insights {
    /// Statistics copied from the report with empty prose
    pub fn from_summary(report: &Report) -> Self {
        let s = &report.summary;
        Self {
            total_questions: s.total_questions,
            correct_answers: s.correct_answers,
            wrong_answers: s.wrong_answers,
            unanswered: s.unanswered,
            score_percentage: format!("{:.2}%", s.accuracy_percent),
            overall_performance: String::new(),
            strengths: Vec::new(),
            areas_for_improvement: Vec::new(),
            motivational_feedback: String::new(),
        }
    }

    pub fn save_json(&self, path: &Path) -> EvalResult<()> {
        write_json_pretty(path, self)
    }

    pub fn load_json(path: &Path) -> EvalResult<Self> {
        load_json(path)
    }
}

/// `x_report.json` → `x_insights.json`; other names get `_insights.json` appended to the stem
pub fn insights_path_for(report_path: &Path) -> PathBuf {
    let name = report_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let insights = match name.strip_suffix("_report.json") {
        Some(stem) => format!("{stem}_insights.json"),
        None => {
            let stem = report_path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "report".to_string());
            format!("{stem}_insights.json")
        }
    };
    report_path.with_file_name(insights)
}

/// Produces prose feedback for a finished report
pub trait FeedbackWriter: Send + Sync {
    fn write(&self, report: &Report) -> Insights;
}

/// Deterministic feedback derived from the counters and per-section results
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedFeedback;

#[derive(Debug, Default)]
struct SectionTally {
    total: usize,
    correct: usize,
    wrong: usize,
    partial: usize,
}

impl SectionTally {
    fn of(report: &Report, section: Section) -> Self {
        let mut t = Self::default();
        for r in report.results_in(section) {
            t.total += 1;
            match r.status {
                Status::Correct => t.correct += 1,
                Status::Wrong => t.wrong += 1,
                Status::Partial => t.partial += 1,
                Status::Unanswered | Status::UnsupportedType => {}
            }
        }
        t
    }
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

impl FeedbackWriter for RuleBasedFeedback {
    fn write(&self, report: &Report) -> Insights {
        let s = &report.summary;
        let accuracy = s.accuracy_percent;
        let mut insights = Insights::from_summary(report);

        insights.overall_performance = if s.total_questions == 0 {
            "There were no questions to grade on this sheet.".to_string()
        } else if accuracy >= 85.0 {
            "Excellent work, with nearly every question answered correctly.".to_string()
        } else if accuracy >= 60.0 {
            "Good effort on the test, with a solid share of correct answers.".to_string()
        } else if accuracy >= 40.0 {
            "A fair attempt; several answers still need work.".to_string()
        } else {
            "This test was a struggle, and most answers did not earn marks.".to_string()
        };

        for section in [Section::MultipleChoice, Section::FillInTheBlanks] {
            let tally = SectionTally::of(report, section);
            if tally.total == 0 {
                continue;
            }
            if tally.correct * 4 >= tally.total * 3 {
                insights
                    .strengths
                    .push(format!("Strong accuracy on {} questions.", section.label()));
            }
            if tally.wrong > 0 {
                insights.areas_for_improvement.push(format!(
                    "Review the {} section, where {} incorrect.",
                    section.label(),
                    plural(tally.wrong, "answer was", "answers were")
                ));
            }
            if tally.partial > 0 {
                insights.areas_for_improvement.push(format!(
                    "Check spelling in the {} section: {} only partial credit.",
                    section.label(),
                    plural(tally.partial, "answer earned", "answers earned")
                ));
            }
        }

        if s.total_questions > 0 && s.unanswered == 0 {
            insights.strengths.push("Attempted every question.".to_string());
        }
        if s.unanswered > 0 {
            insights.areas_for_improvement.push(format!(
                "Answer every question; {} left blank.",
                plural(s.unanswered, "was", "were")
            ));
        }
        if s.unsupported > 0 {
            insights.areas_for_improvement.push(format!(
                "{} could not be graded automatically and need a manual check.",
                plural(s.unsupported, "question", "questions")
            ));
        }
        if insights.strengths.is_empty() {
            insights.strengths.push("Completed and submitted the sheet for grading.".to_string());
        }
        if insights.areas_for_improvement.is_empty() {
            insights
                .areas_for_improvement
                .push("Keep practising to stay at this level.".to_string());
        }

        insights.motivational_feedback = if accuracy >= 85.0 {
            "Outstanding result. Keep it up!".to_string()
        } else if accuracy >= 60.0 {
            "You're on the right track. A little more review and you'll ace the next one.".to_string()
        } else {
            "Every test is a chance to learn. Go over the missed questions and try again.".to_string()
        };

        insights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{QuestionResult, ReportBuilder};

    fn result(section: Section, status: Status) -> QuestionResult {
        QuestionResult {
            question_id: "q".into(),
            section,
            question_type: "mcq".into(),
            student_answer: "A".into(),
            correct_answer: "A".into(),
            status,
            marks_obtained: if status == Status::Correct { 1.0 } else { 0.0 },
            marks_total: 1.0,
            confidence: 1.0,
        }
    }

    fn report(results: &[(Section, Status)]) -> Report {
        let mut builder = ReportBuilder::new();
        for &(section, status) in results {
            builder.push(result(section, status));
        }
        builder.finish()
    }

    #[test]
    fn test_stats_copied_from_summary() {
        let r = report(&[
            (Section::MultipleChoice, Status::Correct),
            (Section::MultipleChoice, Status::Correct),
            (Section::FillInTheBlanks, Status::Wrong),
        ]);
        let insights = RuleBasedFeedback.write(&r);
        assert_eq!(insights.total_questions, 3);
        assert_eq!(insights.correct_answers, 2);
        assert_eq!(insights.wrong_answers, 1);
        assert_eq!(insights.unanswered, 0);
        assert_eq!(insights.score_percentage, "66.67%");
    }

    #[test]
    fn test_feedback_points_at_weak_section() {
        let r = report(&[
            (Section::MultipleChoice, Status::Correct),
            (Section::MultipleChoice, Status::Correct),
            (Section::FillInTheBlanks, Status::Wrong),
            (Section::FillInTheBlanks, Status::Partial),
            (Section::FillInTheBlanks, Status::Unanswered),
        ]);
        let insights = RuleBasedFeedback.write(&r);

        assert!(insights.strengths.iter().any(|s| s.contains("multiple-choice")));
        assert!(insights
            .areas_for_improvement
            .iter()
            .any(|s| s.contains("fill-in-the-blanks") && s.contains("1 answer was incorrect")));
        assert!(insights.areas_for_improvement.iter().any(|s| s.contains("partial credit")));
        assert!(insights.areas_for_improvement.iter().any(|s| s.contains("1 was left blank")));
        assert!(!insights.overall_performance.is_empty());
        assert!(!insights.motivational_feedback.is_empty());
    }

    #[test]
    fn test_never_empty_lists() {
        let insights = RuleBasedFeedback.write(&report(&[]));
        assert_eq!(insights.score_percentage, "0.00%");
        assert!(!insights.strengths.is_empty());
        assert!(!insights.areas_for_improvement.is_empty());
    }

    #[test]
    fn test_insights_path() {
        assert_eq!(
            insights_path_for(Path::new("out/s1_report.json")),
            PathBuf::from("out/s1_insights.json")
        );
        assert_eq!(insights_path_for(Path::new("out/summary.json")), PathBuf::from("out/summary_insights.json"));
    }

    #[test]
    fn test_insights_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s1_insights.json");
        let insights = RuleBasedFeedback.write(&report(&[(Section::MultipleChoice, Status::Correct)]));
        insights.save_json(&path).unwrap();
        assert_eq!(Insights::load_json(&path).unwrap(), insights);
    }
}
