use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EvalError, EvalResult};
use crate::report::write_json_pretty;

/// The two sections of an answer sheet, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    MultipleChoice,
    FillInTheBlanks,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::MultipleChoice => "multiple_choice",
            Section::FillInTheBlanks => "fill_in_the_blanks",
        }
    }

    /// Human-readable name for feedback text
    pub fn label(&self) -> &'static str {
        match self {
            Section::MultipleChoice => "multiple-choice",
            Section::FillInTheBlanks => "fill-in-the-blanks",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a reference question is graded.
///
/// Any type string other than the known ones is kept verbatim as
/// `Unsupported` and graded as such instead of failing the run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum QuestionKind {
    Mcq,
    FillBlank,
    OneWord,
    Unsupported(String),
}

impl QuestionKind {
    pub fn as_str(&self) -> &str {
        match self {
            QuestionKind::Mcq => "mcq",
            QuestionKind::FillBlank => "fill_blank",
            QuestionKind::OneWord => "one_word",
            QuestionKind::Unsupported(other) => other,
        }
    }
}

impl From<String> for QuestionKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "mcq" => QuestionKind::Mcq,
            "fill_blank" => QuestionKind::FillBlank,
            "one_word" => QuestionKind::OneWord,
            _ => QuestionKind::Unsupported(s),
        }
    }
}

impl From<QuestionKind> for String {
    fn from(kind: QuestionKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Question numbers appear both as `"3"` and `3` in sheet JSON
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Number(n) => n.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McqEntry {
    #[serde(deserialize_with = "string_or_number")]
    pub question_number: String,
    pub selected_answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillBlankEntry {
    pub question_prompt: String,
    pub written_answer: String,
}

/// Answers read off one sheet, as produced by OCR extraction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerSheet {
    #[serde(default)]
    pub multiple_choice: Vec<McqEntry>,
    #[serde(default)]
    pub fill_in_the_blanks: Vec<FillBlankEntry>,
}

impl AnswerSheet {
    pub fn is_empty(&self) -> bool {
        self.multiple_choice.is_empty() && self.fill_in_the_blanks.is_empty()
    }

    pub fn save_json(&self, path: &Path) -> EvalResult<()> {
        write_json_pretty(path, self)
    }

    pub fn load_json(path: &Path) -> EvalResult<Self> {
        load_json(path)
    }
}

pub(crate) fn load_json<T: for<'de> Deserialize<'de>>(path: &Path) -> EvalResult<T> {
    let content = fs::read_to_string(path).map_err(|source| EvalError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&content)?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceQuestion {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub correct: String,
    /// Accepted spellings; `correct` alone when empty
    #[serde(default)]
    pub correct_options: Vec<String>,
    pub marks: f64,
}

impl ReferenceQuestion {
    pub fn accepted_options(&self) -> Vec<&str> {
        if self.correct_options.is_empty() {
            vec![self.correct.as_str()]
        } else {
            self.correct_options.iter().map(String::as_str).collect()
        }
    }
}

/// Reference answers, one ordered list per section with unique keys
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnswerKey {
    #[serde(default)]
    pub multiple_choice: Vec<ReferenceQuestion>,
    #[serde(default)]
    pub fill_in_the_blanks: Vec<ReferenceQuestion>,
}

impl AnswerKey {
    pub fn new(multiple_choice: Vec<ReferenceQuestion>, fill_in_the_blanks: Vec<ReferenceQuestion>) -> EvalResult<Self> {
        let key = Self {
            multiple_choice,
            fill_in_the_blanks,
        };
        key.validate()?;
        Ok(key)
    }

    /// Build the key from a teacher's sheet.
    ///
    /// Written answers of the form `a / b` list several accepted spellings.
    pub fn from_sheet(sheet: &AnswerSheet, default_marks: f64) -> EvalResult<Self> {
        let multiple_choice = sheet
            .multiple_choice
            .iter()
            .map(|e| ReferenceQuestion {
                key: e.question_number.trim().to_string(),
                kind: QuestionKind::Mcq,
                correct: e.selected_answer.trim().to_string(),
                correct_options: Vec::new(),
                marks: default_marks,
            })
            .collect();

        let fill_in_the_blanks = sheet
            .fill_in_the_blanks
            .iter()
            .map(|e| {
                let options: Vec<String> = e
                    .written_answer
                    .split('/')
                    .map(str::trim)
                    .filter(|o| !o.is_empty())
                    .map(str::to_string)
                    .collect();
                ReferenceQuestion {
                    key: e.question_prompt.trim().to_string(),
                    kind: QuestionKind::FillBlank,
                    correct: options.first().cloned().unwrap_or_default(),
                    correct_options: if options.len() > 1 { options } else { Vec::new() },
                    marks: default_marks,
                }
            })
            .collect();

        Self::new(multiple_choice, fill_in_the_blanks)
    }

    pub fn section(&self, section: Section) -> &[ReferenceQuestion] {
        match section {
            Section::MultipleChoice => &self.multiple_choice,
            Section::FillInTheBlanks => &self.fill_in_the_blanks,
        }
    }

    pub fn len(&self) -> usize {
        self.multiple_choice.len() + self.fill_in_the_blanks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn validate(&self) -> EvalResult<()> {
        for section in [Section::MultipleChoice, Section::FillInTheBlanks] {
            let mut seen = HashSet::new();
            for q in self.section(section) {
                if !seen.insert(q.key.as_str()) {
                    return Err(EvalError::DuplicateKey {
                        section,
                        key: q.key.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn save_json(&self, path: &Path) -> EvalResult<()> {
        write_json_pretty(path, self)
    }

    /// Load and check key uniqueness
    pub fn load_json(path: &Path) -> EvalResult<Self> {
        let key: Self = load_json(path)?;
        key.validate()?;
        Ok(key)
    }
}

/// Student answers looked up by question key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StudentAnswers {
    multiple_choice: BTreeMap<String, String>,
    fill_in_the_blanks: BTreeMap<String, String>,
}

impl StudentAnswers {
    pub fn from_sheet(sheet: &AnswerSheet) -> EvalResult<Self> {
        let mut answers = Self::default();
        for e in &sheet.multiple_choice {
            answers.insert(Section::MultipleChoice, &e.question_number, &e.selected_answer)?;
        }
        for e in &sheet.fill_in_the_blanks {
            answers.insert(Section::FillInTheBlanks, &e.question_prompt, &e.written_answer)?;
        }
        Ok(answers)
    }

    /// Add one answer; a key already present in the section is an error
    pub fn insert(&mut self, section: Section, key: &str, answer: &str) -> EvalResult<()> {
        let key = key.trim().to_string();
        let map = match section {
            Section::MultipleChoice => &mut self.multiple_choice,
            Section::FillInTheBlanks => &mut self.fill_in_the_blanks,
        };
        if map.contains_key(&key) {
            return Err(EvalError::DuplicateKey { section, key });
        }
        map.insert(key, answer.to_string());
        Ok(())
    }

    pub fn get(&self, section: Section, key: &str) -> Option<&str> {
        let map = match section {
            Section::MultipleChoice => &self.multiple_choice,
            Section::FillInTheBlanks => &self.fill_in_the_blanks,
        };
        map.get(key.trim()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.multiple_choice.len() + self.fill_in_the_blanks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet() -> AnswerSheet {
        serde_json::from_str(
            r#"{
                "multiple_choice": [
                    {"question_number": "1", "selected_answer": "B"},
                    {"question_number": 2, "selected_answer": " c "}
                ],
                "fill_in_the_blanks": [
                    {"question_prompt": "Plants make food by", "written_answer": "photosynthesis / photosynthetic"},
                    {"question_prompt": "Capital of France", "written_answer": "Paris"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_question_kind_round_trips_unknown_types() {
        let q: ReferenceQuestion =
            serde_json::from_str(r#"{"key": "7", "type": "essay", "correct": "x", "marks": 5}"#).unwrap();
        assert_eq!(q.kind, QuestionKind::Unsupported("essay".to_string()));
        assert!(q.correct_options.is_empty());

        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json["type"], "essay");
        assert_eq!(serde_json::to_value(QuestionKind::FillBlank).unwrap(), "fill_blank");
    }

    #[test]
    fn test_key_from_sheet() {
        let key = AnswerKey::from_sheet(&sheet(), 2.0).unwrap();

        assert_eq!(key.len(), 4);
        assert_eq!(key.multiple_choice[1].key, "2");
        assert_eq!(key.multiple_choice[1].correct, "c");
        assert_eq!(key.multiple_choice[0].kind, QuestionKind::Mcq);

        let fib = &key.fill_in_the_blanks[0];
        assert_eq!(fib.kind, QuestionKind::FillBlank);
        assert_eq!(fib.correct, "photosynthesis");
        assert_eq!(fib.accepted_options(), vec!["photosynthesis", "photosynthetic"]);
        assert_eq!(key.fill_in_the_blanks[1].accepted_options(), vec!["Paris"]);
        assert!(key.multiple_choice.iter().all(|q| q.marks == 2.0));
    }

    #[test]
    fn test_duplicate_reference_keys_rejected() {
        let mut s = sheet();
        s.multiple_choice.push(McqEntry {
            question_number: "1".into(),
            selected_answer: "D".into(),
        });
        match AnswerKey::from_sheet(&s, 1.0) {
            Err(EvalError::DuplicateKey { section, key }) => {
                assert_eq!(section, Section::MultipleChoice);
                assert_eq!(key, "1");
            }
            other => panic!("expected DuplicateKey, got {other:?}"),
        }
    }

    #[test]
    fn test_student_answers_lookup_by_key() {
        let answers = StudentAnswers::from_sheet(&sheet()).unwrap();
        assert_eq!(answers.len(), 4);
        assert_eq!(answers.get(Section::MultipleChoice, "2"), Some(" c "));
        assert_eq!(answers.get(Section::FillInTheBlanks, "Capital of France"), Some("Paris"));
        assert_eq!(answers.get(Section::FillInTheBlanks, "2"), None);
        assert_eq!(answers.get(Section::MultipleChoice, "9"), None);
    }

    #[test]
    fn test_duplicate_student_keys_rejected() {
        let mut s = sheet();
        s.fill_in_the_blanks.push(FillBlankEntry {
            question_prompt: "Capital of France ".into(),
            written_answer: "Lyon".into(),
        });
        assert!(matches!(
            StudentAnswers::from_sheet(&s),
            Err(EvalError::DuplicateKey { section: Section::FillInTheBlanks, .. })
        ));
    }

    #[test]
    fn test_sheet_and_key_persist() {
        let dir = tempfile::tempdir().unwrap();
        let sheet_path = dir.path().join("nested").join("answers.json");
        sheet().save_json(&sheet_path).unwrap();
        let loaded = AnswerSheet::load_json(&sheet_path).unwrap();
        assert_eq!(loaded.multiple_choice[1].question_number, "2");

        let key_path = dir.path().join("key.json");
        let key = AnswerKey::from_sheet(&loaded, 1.0).unwrap();
        key.save_json(&key_path).unwrap();
        assert_eq!(AnswerKey::load_json(&key_path).unwrap(), key);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AnswerSheet::load_json(&dir.path().join("missing.json")),
            Err(EvalError::Load { .. })
        ));
    }
}
