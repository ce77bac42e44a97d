use std::path::PathBuf;

use thiserror::Error;

use crate::answers::Section;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Duplicate key '{key}' in {section} section")]
    DuplicateKey { section: Section, key: String },
    #[error("Failed to write {path}: {source}")]
    ReportPersistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type EvalResult<T> = Result<T, EvalError>;
