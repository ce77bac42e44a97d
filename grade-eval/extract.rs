//! Turning OCR text spans into an answer sheet.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::answers::{AnswerSheet, FillBlankEntry, McqEntry};

/// Text recognised on one sheet, in reading order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrOutput {
    pub handwritten_spans: Vec<String>,
    pub printed_spans: Vec<String>,
}

/// One answer slot on the printed sheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayoutField {
    Mcq { question_number: String },
    FillBlank { question_prompt: String },
}

/// Answer slots of a sheet in reading order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetLayout {
    pub fields: Vec<LayoutField>,
}

impl LayoutField {
    /// Question number or prompt, as used in logs and results
    pub fn label(&self) -> &str {
        match self {
            LayoutField::Mcq { question_number } => question_number,
            LayoutField::FillBlank { question_prompt } => question_prompt,
        }
    }
}

fn single_letter(span: &str) -> Option<char> {
    let mut chars = span.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_alphabetic() => Some(c),
        _ => None,
    }
}

pub struct AnswerExtractor;

impl AnswerExtractor {
    /// Build an answer sheet from the handwritten spans.
    ///
    /// With a layout, spans fill the declared fields in order. Without one, a
    /// lone letter is read as a multiple-choice answer and everything else
    /// as a fill-in-the-blank answer, both numbered from 1.
    pub fn extract(ocr: &OcrOutput, layout: Option<&SheetLayout>) -> AnswerSheet {
        let spans: Vec<&str> = ocr
            .handwritten_spans
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();

        let sheet = match layout {
            Some(layout) => Self::extract_with_layout(&spans, layout),
            None => Self::extract_by_content(&spans),
        };

        debug!(
            spans = spans.len(),
            multiple_choice = sheet.multiple_choice.len(),
            fill_in_the_blanks = sheet.fill_in_the_blanks.len(),
            "answers extracted"
        );
        sheet
    }

    /// Fill the layout's fields with spans in reading order.
    ///
    /// When there are fewer spans than fields, a multiple-choice field whose
    /// next span is not a single letter is left unanswered and the span moves
    /// on to the following field, so one missing answer does not shift the
    /// rest of the sheet.
    fn extract_with_layout(spans: &[&str], layout: &SheetLayout) -> AnswerSheet {
        let mut sheet = AnswerSheet::default();
        let short = spans.len() < layout.fields.len();
        let mut pending = spans.iter().copied().peekable();
        let mut unfilled: Vec<&str> = Vec::new();

        for field in &layout.fields {
            let fits = match (field, pending.peek()) {
                (_, None) => false,
                (LayoutField::Mcq { .. }, Some(span)) if short => single_letter(span).is_some(),
                _ => true,
            };
            let Some(span) = pending.next_if(|_| fits) else {
                unfilled.push(field.label());
                continue;
            };

            match field {
                LayoutField::Mcq { question_number } => sheet.multiple_choice.push(McqEntry {
                    question_number: question_number.clone(),
                    selected_answer: span.to_uppercase(),
                }),
                LayoutField::FillBlank { question_prompt } => sheet.fill_in_the_blanks.push(FillBlankEntry {
                    question_prompt: question_prompt.clone(),
                    written_answer: span.to_string(),
                }),
            }
        }

        if !unfilled.is_empty() {
            warn!(
                spans = spans.len(),
                fields = layout.fields.len(),
                unanswered = ?unfilled,
                "layout fields without a handwritten span"
            );
        }
        let surplus: Vec<&str> = pending.collect();
        if !surplus.is_empty() {
            warn!(ignored = ?surplus, "more handwritten spans than layout fields");
        }
        sheet
    }

    fn extract_by_content(spans: &[&str]) -> AnswerSheet {
        let mut sheet = AnswerSheet::default();

        for span in spans {
            match single_letter(span) {
                Some(c) => {
                    let n = sheet.multiple_choice.len() + 1;
                    sheet.multiple_choice.push(McqEntry {
                        question_number: n.to_string(),
                        selected_answer: c.to_uppercase().collect(),
                    });
                }
                None => {
                    let n = sheet.fill_in_the_blanks.len() + 1;
                    sheet.fill_in_the_blanks.push(FillBlankEntry {
                        question_prompt: format!("Fill in the blank {n}"),
                        written_answer: span.to_string(),
                    });
                }
            }
        }
        sheet
    }
}
