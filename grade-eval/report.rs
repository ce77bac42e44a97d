use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::answers::{load_json, Section};
use crate::error::{EvalError, EvalResult};

/// Placeholder shown for a question the student did not answer
pub const NOT_ANSWERED: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Correct,
    Wrong,
    Partial,
    Unanswered,
    UnsupportedType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub section: Section,
    pub question_type: String,
    pub student_answer: String,
    pub correct_answer: String,
    pub status: Status,
    pub marks_obtained: f64,
    pub marks_total: f64,
    pub confidence: f64,
}

/// Counters over all question results.
///
/// `correct_answers + wrong_answers + unanswered == total_questions`;
/// partial and unsupported results count as wrong and are also broken out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_questions: usize,
    pub correct_answers: usize,
    pub wrong_answers: usize,
    pub partial_answers: usize,
    pub unanswered: usize,
    pub unsupported: usize,
    pub total_marks: f64,
    pub obtained_marks: f64,
    pub percentage: f64,
    pub accuracy_percent: f64,
    pub precision_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub summary: ReportSummary,
    pub detailed_results: Vec<QuestionResult>,
}

impl Report {
    /// Write pretty JSON, creating parent directories. The report stays
    /// usable on failure so the caller may retry elsewhere.
    pub fn save_json(&self, path: &Path) -> EvalResult<()> {
        write_json_pretty(path, self)
    }

    pub fn load_json(path: &Path) -> EvalResult<Self> {
        load_json(path)
    }

    pub fn results_in(&self, section: Section) -> impl Iterator<Item = &QuestionResult> {
        self.detailed_results.iter().filter(move |r| r.section == section)
    }
}

pub(crate) fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> EvalResult<()> {
    let persist_err = |source| EvalError::ReportPersistence {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(persist_err)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).map_err(persist_err)
}

/// `part / whole * 100`, or 0 when `whole` is 0
fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        part / whole * 100.0
    } else {
        0.0
    }
}

/// Accumulates question results in evaluation order
#[derive(Debug, Default)]
pub struct ReportBuilder {
    summary: ReportSummary,
    results: Vec<QuestionResult>,
}

impl ReportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: QuestionResult) {
        let s = &mut self.summary;
        s.total_questions += 1;
        s.total_marks += result.marks_total;
        s.obtained_marks += result.marks_obtained;

        match result.status {
            Status::Correct => s.correct_answers += 1,
            Status::Wrong => s.wrong_answers += 1,
            Status::Partial => {
                s.wrong_answers += 1;
                s.partial_answers += 1;
            }
            Status::UnsupportedType => {
                s.wrong_answers += 1;
                s.unsupported += 1;
            }
            Status::Unanswered => s.unanswered += 1,
        }

        self.results.push(result);
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn finish(self) -> Report {
        let mut summary = self.summary;
        let answered = summary.total_questions - summary.unanswered;

        summary.percentage = percent(summary.obtained_marks, summary.total_marks);
        summary.accuracy_percent = percent(summary.correct_answers as f64, summary.total_questions as f64);
        summary.precision_percent = percent(summary.correct_answers as f64, answered as f64);

        Report {
            summary,
            detailed_results: self.results,
        }
    }
}
