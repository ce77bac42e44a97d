use std::path::PathBuf;

use grade_fast::FastError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("Failed to load image {path}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("No features detected in the {image} image")]
    FeatureDetection { image: String },
    #[error("Not enough good matches: found {found}, need at least {required}")]
    InsufficientMatches { found: usize, required: usize },
    #[error("Homography computation failed: {0}")]
    HomographyComputation(String),
    #[error("Alignment confidence {confidence:.3} below minimum {minimum:.3}")]
    LowConfidence { confidence: f64, minimum: f64 },
    #[error("Failed to write aligned image {path}: {source}")]
    ImagePersist {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Detector error: {0}")]
    Detector(#[from] FastError),
}

pub type AlignResult<T> = Result<T, AlignError>;
