//! End-to-end grading of scanned answer sheets.
//!
//! [`GradingPipeline`] aligns the teacher key and the student sheet onto the
//! blank template, reads both with an [`OcrEngine`], scores the student
//! against the key and writes the answer, report and insights JSON.

pub mod config;
pub mod ocr;
pub mod server;

use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use grade_align::{AlignError, AlignedImage, AlignmentEngine, AlignmentResult, OutputTag, SheetRole};
use grade_core::init_thread_pool;
use grade_eval::{
    insights_path_for, AnswerExtractor, AnswerKey, AnswerSheet, EvalError, FeedbackWriter, Insights, OcrOutput,
    Report, ScoringEngine, StudentAnswers,
};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub use config::{ConfigError, ConfigFormat, ExtractionConfig, GraderConfig, Preset};
pub use ocr::{AzureLayoutOcr, OcrEngine, OcrError, OcrRequest, RecordedOcr};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("alignment failed: {0}")]
    Align(#[from] AlignError),
    #[error("evaluation failed: {0}")]
    Eval(#[from] EvalError),
    #[error("OCR failed: {0}")]
    Ocr(#[from] OcrError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode aligned image: {0}")]
    Encode(#[from] image::ImageError),
    #[error("invalid upload: {0}")]
    Upload(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Uniform envelope for CLI output and HTTP responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Outcome<T> {
    pub fn success(result: T) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.to_string()),
        }
    }
}

impl<T, E: fmt::Display> From<Result<T, E>> for Outcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(e) => Self::failure(e),
        }
    }
}

/// JSON files written for one student sheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPaths {
    pub answer_key: PathBuf,
    pub student_answers: PathBuf,
    pub report: PathBuf,
    pub insights: PathBuf,
}

impl OutputPaths {
    /// `{dir}/{stem}_answer_key.json`, `{stem}_answers.json`, `{stem}_report.json`, `{stem}_insights.json`
    pub fn for_stem(output_dir: &Path, stem: &str) -> Self {
        let report = output_dir.join(format!("{stem}_report.json"));
        Self {
            answer_key: output_dir.join(format!("{stem}_answer_key.json")),
            student_answers: output_dir.join(format!("{stem}_answers.json")),
            insights: insights_path_for(&report),
            report,
        }
    }

    /// Named `{template}_{student}` so students graded in parallel never collide
    pub fn for_tag(output_dir: &Path, tag: &OutputTag) -> Self {
        Self::for_stem(output_dir, &tag.stem())
    }
}

fn sheet_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sheet".to_string())
}

/// Everything produced by grading one student sheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingOutcome {
    pub teacher_alignment: AlignmentResult,
    pub student_alignment: AlignmentResult,
    pub files: OutputPaths,
    pub report: Report,
    pub insights: Insights,
}

/// Scoring of already extracted answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub report_path: PathBuf,
    pub insights_path: PathBuf,
    pub report: Report,
    pub insights: Insights,
}

/// Size the global rayon pool once; later calls keep the existing pool
fn ensure_thread_pool(n_threads: usize) {
    if let Err(e) = init_thread_pool(n_threads.max(1)) {
        debug!(error = %e, "rayon pool already initialised");
    }
}

/// Alignment, OCR, extraction and scoring composed for one sheet at a time
pub struct GradingPipeline {
    config: GraderConfig,
    aligner: AlignmentEngine,
    scorer: ScoringEngine,
    ocr: Arc<dyn OcrEngine>,
    feedback: Arc<dyn FeedbackWriter>,
}

impl GradingPipeline {
    pub fn new(config: GraderConfig, ocr: Arc<dyn OcrEngine>, feedback: Arc<dyn FeedbackWriter>) -> PipelineResult<Self> {
        config.validate()?;
        ensure_thread_pool(config.detector.n_threads);

        let aligner = AlignmentEngine::new(
            config.detector.clone(),
            config.matching.clone(),
            config.homography.clone(),
            config.alignment.clone(),
        );
        let scorer = ScoringEngine::new(config.scoring.clone());

        Ok(Self {
            config,
            aligner,
            scorer,
            ocr,
            feedback,
        })
    }

    pub fn config(&self) -> &GraderConfig {
        &self.config
    }

    pub fn aligner(&self) -> &AlignmentEngine {
        &self.aligner
    }

    /// Grade `student_sheet` against the key read from `teacher_sheet`, using
    /// the student sheet's file stem as the student identifier
    pub fn grade(&self, template: &Path, teacher_sheet: &Path, student_sheet: &Path) -> PipelineResult<GradingOutcome> {
        let student_id = sheet_stem(student_sheet);
        self.grade_student(template, teacher_sheet, student_sheet, &student_id)
    }

    /// Grade one student; every output file is named after the template and
    /// `student_id`.
    ///
    /// Stages run strictly in order and the first failure aborts, so an
    /// alignment failure never leaves a report behind.
    pub fn grade_student(
        &self,
        template: &Path,
        teacher_sheet: &Path,
        student_sheet: &Path,
        student_id: &str,
    ) -> PipelineResult<GradingOutcome> {
        let tag = OutputTag::new(&sheet_stem(template), student_id);

        let teacher = self.aligner.align_tagged(template, teacher_sheet, SheetRole::Teacher, &tag)?;
        let student = self.aligner.align_tagged(template, student_sheet, SheetRole::Student, &tag)?;

        let teacher_text = self.recognize(SheetRole::Teacher, &teacher)?;
        let student_text = self.recognize(SheetRole::Student, &student)?;

        let layout = self.config.extraction.layout.as_ref();
        let key_sheet = AnswerExtractor::extract(&teacher_text, layout);
        let student_answers = AnswerExtractor::extract(&student_text, layout);

        let key = AnswerKey::from_sheet(&key_sheet, self.config.default_marks)?;
        let files = OutputPaths::for_tag(&self.config.output_dir, &tag);
        key.save_json(&files.answer_key)?;
        student_answers.save_json(&files.student_answers)?;

        let (report, insights) = self.score(&key, &student_answers, &files)?;

        Ok(GradingOutcome {
            teacher_alignment: teacher.result,
            student_alignment: student.result,
            files,
            report,
            insights,
        })
    }

    /// Score saved key and answer files; outputs are named after the answers file
    pub fn evaluate_files(&self, key_path: &Path, answers_path: &Path) -> PipelineResult<EvaluationOutcome> {
        let key = AnswerKey::load_json(key_path)?;
        let answers = AnswerSheet::load_json(answers_path)?;

        let stem = sheet_stem(answers_path);
        let stem = stem.strip_suffix("_answers").unwrap_or(&stem);
        let files = OutputPaths::for_stem(&self.config.output_dir, stem);

        let (report, insights) = self.score(&key, &answers, &files)?;
        Ok(EvaluationOutcome {
            report_path: files.report,
            insights_path: files.insights,
            report,
            insights,
        })
    }

    /// OCR the warped image held in memory, never the copy on disk
    fn recognize(&self, role: SheetRole, aligned: &AlignedImage) -> PipelineResult<OcrOutput> {
        let mut image_bytes = Vec::new();
        aligned.image.write_to(&mut Cursor::new(&mut image_bytes), ImageFormat::Png)?;
        let image_path = aligned.result.aligned_image_path.clone().unwrap_or_default();

        let output = self.ocr.recognize(&OcrRequest {
            role,
            image_path,
            image_bytes,
        })?;
        debug!(%role, handwritten = output.handwritten_spans.len(), "sheet recognised");
        Ok(output)
    }

    fn score(&self, key: &AnswerKey, sheet: &AnswerSheet, files: &OutputPaths) -> PipelineResult<(Report, Insights)> {
        let answers = StudentAnswers::from_sheet(sheet)?;
        let report = self.scorer.evaluate(key, &answers);
        report.save_json(&files.report)?;

        let insights = self.feedback.write(&report);
        insights.save_json(&files.insights)?;

        info!(
            report = %files.report.display(),
            percentage = report.summary.percentage,
            correct = report.summary.correct_answers,
            total = report.summary.total_questions,
            "sheet graded"
        );
        Ok((report, insights))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
use grade_eval::{FillBlankEntry, McqEntry, ReferenceQuestion, RuleBasedFeedback};

    fn pipeline(output_dir: &Path) -> GradingPipeline {
        let config = GraderConfig {
            output_dir: output_dir.to_path_buf(),
            ..GraderConfig::default()
        };
        GradingPipeline::new(config, Arc::new(RecordedOcr::new()), Arc::new(RuleBasedFeedback)).unwrap()
    }

    #[test]
    fn test_output_paths() {
        let tag = OutputTag::from_paths(Path::new("blank/quiz.png"), Path::new("scans/student_001.jpg"));
        let files = OutputPaths::for_tag(Path::new("out"), &tag);
        assert_eq!(files.answer_key, PathBuf::from("out/quiz_student_001_answer_key.json"));
        assert_eq!(files.student_answers, PathBuf::from("out/quiz_student_001_answers.json"));
        assert_eq!(files.report, PathBuf::from("out/quiz_student_001_report.json"));
        assert_eq!(files.insights, PathBuf::from("out/quiz_student_001_insights.json"));
    }

    #[test]
    fn test_output_paths_per_student_and_template() {
        let out = Path::new("/out");
        let upload = Path::new("/tmp/req1/student/student_sheet.png");
        let alice = OutputPaths::for_tag(out, &OutputTag::new("template", "alice"));
        let bob = OutputPaths::for_tag(out, &OutputTag::new("template", "bob"));
        assert_ne!(alice.report, bob.report);
        assert_ne!(alice.answer_key, bob.answer_key);

        let same_name = OutputTag::from_paths(Path::new("/t1/template.png"), upload);
        let other_template = OutputTag::from_paths(Path::new("/t2/quiz.png"), upload);
        assert_ne!(
            OutputPaths::for_tag(out, &same_name).report,
            OutputPaths::for_tag(out, &other_template).report
        );
    }

    #[test]
    fn test_outcome_envelope() {
        let ok: Outcome<u32> = Ok::<u32, String>(7).into();
        assert_eq!(serde_json::to_value(&ok).unwrap(), serde_json::json!({"success": true, "result": 7}));

        let err: Outcome<u32> = Err::<u32, _>("boom").into();
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!({"success": false, "error": "boom"})
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = GraderConfig::default();
        config.scoring.partial_credit_threshold = 2.0;
        let result = GradingPipeline::new(config, Arc::new(RecordedOcr::new()), Arc::new(RuleBasedFeedback));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_repeated_construction_keeps_thread_pool() {
        let dir = tempfile::tempdir().unwrap();
        pipeline(dir.path());
        pipeline(dir.path());
    }

    #[test]
    fn test_evaluate_files() {
        let dir = tempfile::tempdir().unwrap();
        let key = AnswerKey::new(
            vec![ReferenceQuestion {
                key: "1".into(),
                kind: "mcq".to_string().into(),
                correct: "B".into(),
                correct_options: Vec::new(),
                marks: 1.0,
            }],
            vec![ReferenceQuestion {
                key: "Capital of France".into(),
                kind: "fill_blank".to_string().into(),
                correct: "Paris".into(),
                correct_options: Vec::new(),
                marks: 2.0,
            }],
        )
        .unwrap();
        let answers = AnswerSheet {
            multiple_choice: vec![McqEntry {
                question_number: "1".into(),
                selected_answer: "b".into(),
            }],
            fill_in_the_blanks: vec![FillBlankEntry {
                question_prompt: "Capital of France".into(),
                written_answer: "paris".into(),
            }],
        };
        let key_path = dir.path().join("key.json");
        let answers_path = dir.path().join("s7_answers.json");
        key.save_json(&key_path).unwrap();
        answers.save_json(&answers_path).unwrap();

        let out = dir.path().join("out");
        let outcome = pipeline(&out).evaluate_files(&key_path, &answers_path).unwrap();

        assert_eq!(outcome.report_path, out.join("s7_report.json"));
        assert_eq!(outcome.insights_path, out.join("s7_insights.json"));
        assert!(outcome.report_path.exists() && outcome.insights_path.exists());
        assert_eq!(outcome.report.summary.correct_answers, 2);
        assert_eq!(outcome.report.summary.obtained_marks, 3.0);
        assert_eq!(outcome.insights.score_percentage, "100.00%");
    }

    #[test]
    fn test_missing_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = pipeline(dir.path())
            .evaluate_files(&dir.path().join("key.json"), &dir.path().join("answers.json"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Eval(EvalError::Load { .. })));
    }
}
