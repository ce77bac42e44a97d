//! Handwriting recognition backends.
//!
//! The pipeline only sees [`OcrEngine`]. [`RecordedOcr`] replays spans from
//! JSON fixtures; [`AzureLayoutOcr`] calls the Azure Document Intelligence
//! layout model and keeps the spans styled as handwritten.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use grade_align::SheetRole;
use grade_eval::OcrOutput;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

pub const AZURE_ENDPOINT_VAR: &str = "AZURE_VISION_ENDPOINT";
pub const AZURE_KEY_VAR: &str = "AZURE_VISION_KEY";
const API_VERSION: &str = "2024-11-30";
const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("no recorded OCR output for the {0} sheet")]
    NoRecording(SheetRole),
    #[error("failed to read OCR fixture {path}: {source}")]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid OCR fixture {path}: {source}")]
    FixtureFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("environment variable {0} is not set")]
    MissingCredentials(&'static str),
    #[error("OCR request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("OCR service returned {status}: {body}")]
    Service { status: u16, body: String },
    #[error("OCR service did not return an Operation-Location header")]
    MissingOperation,
    #[error("OCR analysis ended with status '{0}'")]
    AnalysisFailed(String),
    #[error("OCR analysis still running after {0} polls")]
    Timeout(usize),
}

pub type OcrResult<T> = Result<T, OcrError>;

/// One aligned sheet handed to the recogniser
#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub role: SheetRole,
    pub image_path: PathBuf,
    pub image_bytes: Vec<u8>,
}

pub trait OcrEngine: Send + Sync {
    fn recognize(&self, request: &OcrRequest) -> OcrResult<OcrOutput>;
}

/// Replays previously captured OCR output per sheet role
#[derive(Debug, Clone, Default)]
pub struct RecordedOcr {
    outputs: HashMap<SheetRole, OcrOutput>,
}

impl RecordedOcr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, role: SheetRole, output: OcrOutput) -> Self {
        self.outputs.insert(role, output);
        self
    }

    /// Load both fixtures; each file holds an [`OcrOutput`] as JSON
    pub fn from_files(teacher: &Path, student: &Path) -> OcrResult<Self> {
        Ok(Self::new()
            .with_output(SheetRole::Teacher, load_fixture(teacher)?)
            .with_output(SheetRole::Student, load_fixture(student)?))
    }
}

fn load_fixture(path: &Path) -> OcrResult<OcrOutput> {
    let content = fs::read_to_string(path).map_err(|source| OcrError::Fixture {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| OcrError::FixtureFormat {
        path: path.to_path_buf(),
        source,
    })
}

impl OcrEngine for RecordedOcr {
    fn recognize(&self, request: &OcrRequest) -> OcrResult<OcrOutput> {
        self.outputs
            .get(&request.role)
            .cloned()
            .ok_or(OcrError::NoRecording(request.role))
    }
}

/// Azure Document Intelligence `prebuilt-layout` client
#[derive(Debug, Clone)]
pub struct AzureLayoutOcr {
    endpoint: String,
    key: String,
    poll_interval: Duration,
    max_polls: usize,
    request_timeout: Duration,
}

impl AzureLayoutOcr {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: key.into(),
            poll_interval: Duration::from_secs(1),
            max_polls: 60,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Read the endpoint and key from `AZURE_VISION_ENDPOINT` / `AZURE_VISION_KEY`
    pub fn from_env() -> OcrResult<Self> {
        let endpoint = std::env::var(AZURE_ENDPOINT_VAR).map_err(|_| OcrError::MissingCredentials(AZURE_ENDPOINT_VAR))?;
        let key = std::env::var(AZURE_KEY_VAR).map_err(|_| OcrError::MissingCredentials(AZURE_KEY_VAR))?;
        Ok(Self::new(endpoint, key))
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: usize) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/documentintelligence/documentModels/prebuilt-layout:analyze?api-version={API_VERSION}&stringIndexType=unicodeCodePoint",
            self.endpoint.trim_end_matches('/')
        )
    }
}

fn check_status(response: reqwest::blocking::Response) -> OcrResult<reqwest::blocking::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(OcrError::Service {
        status: status.as_u16(),
        body: response.text().unwrap_or_default(),
    })
}

impl OcrEngine for AzureLayoutOcr {
    fn recognize(&self, request: &OcrRequest) -> OcrResult<OcrOutput> {
        // Built per call: the blocking client must not be dropped inside an async runtime
        let client = reqwest::blocking::Client::builder()
            .timeout(self.request_timeout)
            .build()?;

        let response = client
            .post(self.analyze_url())
            .header(KEY_HEADER, &self.key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(request.image_bytes.clone())
            .send()?;
        let response = check_status(response)?;

        let operation = response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .ok_or(OcrError::MissingOperation)?;
        debug!(role = %request.role, %operation, "layout analysis submitted");

        for attempt in 1..=self.max_polls {
            thread::sleep(self.poll_interval);
            let response = check_status(client.get(&operation).header(KEY_HEADER, &self.key).send()?)?;
            let body: AnalyzeOperation = response.json()?;

            match body.status.as_str() {
                "succeeded" => {
                    let output = spans_from_layout(&body.analyze_result.unwrap_or_default());
                    info!(
                        role = %request.role,
                        handwritten = output.handwritten_spans.len(),
                        printed = output.printed_spans.len(),
                        polls = attempt,
                        "layout analysis finished"
                    );
                    return Ok(output);
                }
                "failed" | "canceled" => return Err(OcrError::AnalysisFailed(body.status.clone())),
                status => debug!(attempt, status, "layout analysis pending"),
            }
        }
        Err(OcrError::Timeout(self.max_polls))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeOperation {
    status: String,
    #[serde(default)]
    analyze_result: Option<AnalyzeResult>,
}

/// Subset of the layout model's `analyzeResult`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzeResult {
    pub content: String,
    pub styles: Vec<DocumentStyle>,
    pub paragraphs: Vec<DocumentParagraph>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DocumentStyle {
    pub is_handwritten: Option<bool>,
    pub spans: Vec<DocumentSpan>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DocumentParagraph {
    pub content: String,
    pub spans: Vec<DocumentSpan>,
}

/// Range of `content` in code points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DocumentSpan {
    pub offset: usize,
    pub length: usize,
}

impl DocumentSpan {
    fn end(&self) -> usize {
        self.offset + self.length
    }

    fn overlaps(&self, other: &DocumentSpan) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// Handwritten spans in reading order, plus the paragraphs they do not touch
pub fn spans_from_layout(result: &AnalyzeResult) -> OcrOutput {
    let chars: Vec<char> = result.content.chars().collect();

    let mut handwritten: Vec<DocumentSpan> = result
        .styles
        .iter()
        .filter(|s| s.is_handwritten == Some(true))
        .flat_map(|s| s.spans.iter().copied())
        .collect();
    handwritten.sort_by_key(|s| s.offset);

    let handwritten_spans = handwritten
        .iter()
        .map(|span| {
            let start = span.offset.min(chars.len());
            let end = span.end().min(chars.len());
            chars[start..end].iter().collect::<String>()
        })
        .collect();

    let printed_spans = result
        .paragraphs
        .iter()
        .filter(|p| !p.spans.iter().any(|ps| handwritten.iter().any(|h| h.overlaps(ps))))
        .map(|p| p.content.clone())
        .collect();

    OcrOutput {
        handwritten_spans,
        printed_spans,
    }
}
