//! HTTP front end for the grading pipeline.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{GradingOutcome, GradingPipeline, Outcome, PipelineError, PipelineResult};

/// Multipart fields of an evaluation request, in pipeline order
pub const UPLOAD_FIELDS: [&str; 3] = ["template", "teacher_sheet", "student_sheet"];
/// Optional text field naming the student; output files are named after it
pub const STUDENT_ID_FIELD: &str = "student_id";
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;
const UPLOAD_DIR_PREFIX: &str = "grade-";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<GradingPipeline>,
}

pub fn build_router(pipeline: Arc<GradingPipeline>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/evaluate", post(evaluate))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { pipeline })
}

pub async fn serve(addr: SocketAddr, pipeline: Arc<GradingPipeline>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "grading server listening");
    axum::serve(listener, build_router(pipeline)).await
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn evaluate(State(state): State<AppState>, multipart: Multipart) -> Response {
    match grade_upload(state, multipart).await {
        Ok(outcome) => (StatusCode::OK, Json(Outcome::success(outcome))).into_response(),
        Err(e) => {
            error!(error = %e, "evaluation request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(Outcome::<()>::failure(e))).into_response()
        }
    }
}

/// The client's `student_id`, or the upload's file stem made unique with the
/// request's upload directory name
fn student_id(explicit: Option<&str>, student_sheet: &Path, upload_dir: &Path) -> String {
    if let Some(id) = explicit.map(str::trim).filter(|id| !id.is_empty()) {
        return id.to_string();
    }
    let stem = student_sheet
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "student".to_string());
    let request = upload_dir
        .file_name()
        .map(|n| n.to_string_lossy().trim_start_matches(UPLOAD_DIR_PREFIX).to_string())
        .unwrap_or_default();
    format!("{stem}-{request}")
}

/// Keep only the final path component of a client-supplied file name
fn upload_name(field: &str, file_name: Option<&str>) -> String {
    file_name
        .and_then(|n| Path::new(n).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("{field}.png"))
}

async fn grade_upload(state: AppState, mut multipart: Multipart) -> PipelineResult<GradingOutcome> {
    // Removed when the request finishes
    let upload_dir = tempfile::Builder::new().prefix(UPLOAD_DIR_PREFIX).tempdir()?;
    let mut paths: [Option<PathBuf>; 3] = Default::default();
    let mut explicit_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PipelineError::Upload(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == STUDENT_ID_FIELD {
            explicit_id = Some(field.text().await.map_err(|e| PipelineError::Upload(e.to_string()))?);
            continue;
        }
        let Some(slot) = UPLOAD_FIELDS.iter().position(|f| *f == name) else {
            continue;
        };
        let file_name = upload_name(&name, field.file_name());
        let bytes = field.bytes().await.map_err(|e| PipelineError::Upload(e.to_string()))?;

        // One directory per field; client file names may repeat
        let dir = upload_dir.path().join(&name);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(file_name);
        tokio::fs::write(&path, &bytes).await?;
        paths[slot] = Some(path);
    }

    let missing: Vec<&str> = UPLOAD_FIELDS
        .iter()
        .zip(&paths)
        .filter(|(_, p)| p.is_none())
        .map(|(f, _)| *f)
        .collect();
    let (template, teacher, student) = match paths {
        [Some(template), Some(teacher), Some(student)] => (template, teacher, student),
        _ => return Err(PipelineError::Upload(format!("missing field(s): {}", missing.join(", ")))),
    };

    let id = student_id(explicit_id.as_deref(), &student, upload_dir.path());
    info!(student = %id, "evaluating uploaded sheet");
    let pipeline = state.pipeline.clone();
    tokio::task::spawn_blocking(move || {
        let outcome = pipeline.grade_student(&template, &teacher, &student, &id);
        drop(upload_dir);
        outcome
    })
    .await
    .map_err(|e| PipelineError::Upload(format!("grading task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GraderConfig, RecordedOcr};
    use grade_eval::RuleBasedFeedback;

    async fn spawn_server(output_dir: &Path) -> SocketAddr {
        let config = GraderConfig {
            output_dir: output_dir.to_path_buf(),
            ..GraderConfig::default()
        };
        let pipeline =
            GradingPipeline::new(config, Arc::new(RecordedOcr::new()), Arc::new(RuleBasedFeedback)).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_router(Arc::new(pipeline))).await.unwrap();
        });
        addr
    }

    #[test]
    fn test_upload_name_strips_directories() {
        assert_eq!(upload_name("template", Some("../../etc/passwd")), "passwd");
        assert_eq!(upload_name("template", Some("scan 1.jpg")), "scan 1.jpg");
        assert_eq!(upload_name("student_sheet", None), "student_sheet.png");
        assert_eq!(upload_name("student_sheet", Some("")), "student_sheet.png");
    }

    #[test]
    fn test_student_id_is_unique_per_request() {
        let sheet = Path::new("student_sheet.png");
        let first = student_id(None, sheet, Path::new("/tmp/grade-aB12cD"));
        let second = student_id(None, sheet, Path::new("/tmp/grade-Zx98yW"));
        assert_eq!(first, "student_sheet-aB12cD");
        assert_ne!(first, second);

        assert_eq!(student_id(Some(" roll-42 "), sheet, Path::new("/tmp/grade-aB12cD")), "roll-42");
        assert_eq!(student_id(Some(""), sheet, Path::new("/tmp/grade-q")), "student_sheet-q");
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(dir.path()).await;

        let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, json!({ "status": "healthy" }));
    }

    #[tokio::test]
    async fn test_missing_fields_give_error_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(dir.path()).await;

        let form = reqwest::multipart::Form::new()
            .part("template", reqwest::multipart::Part::bytes(vec![0u8; 16]).file_name("template.png"));
        let response = reqwest::Client::new()
            .post(format!("http://{addr}/api/v1/evaluate"))
            .multipart(form)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["success"], false);
        let error = body["error"].as_str().unwrap();
        assert!(error.contains("teacher_sheet") && error.contains("student_sheet"));
        assert!(!error.contains("template"));
    }

    #[tokio::test]
    async fn test_undecodable_upload_fails_alignment() {
        let dir = tempfile::tempdir().unwrap();
        let addr = spawn_server(dir.path()).await;

        let part = |name: &str| reqwest::multipart::Part::bytes(b"not an image".to_vec()).file_name(format!("{name}.png"));
        let form = reqwest::multipart::Form::new()
            .part("template", part("template"))
            .part("teacher_sheet", part("teacher"))
            .part("student_sheet", part("student"));
        let response = reqwest::Client::new()
            .post(format!("http://{addr}/api/v1/evaluate"))
            .multipart(form)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().starts_with("alignment failed"));
        assert!(!dir.path().join("student_report.json").exists());
    }
}
