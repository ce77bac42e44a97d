//! Alignment of a scanned sheet onto its blank template.
//!
//! Keypoints from both images are matched by Hamming distance, a
//! sheet-to-template homography is fitted with RANSAC and the sheet is
//! warped into the template frame. The inlier ratio doubles as the
//! alignment confidence and gates the result.

pub mod engine;
pub mod error;
pub mod homography;
pub mod matcher;
pub mod visualize;
pub mod warp;

pub use engine::{
    output_path_for, passes_confidence_gate, AlignedImage, AlignmentConfig, AlignmentEngine, AlignmentResult,
    OutputTag, SheetRole,
};
pub use error::{AlignError, AlignResult};
pub use homography::{HomographyConfig, HomographyEstimate, HomographyEstimator};
pub use matcher::{Correspondence, FeatureMatcher, MatchConfig};
