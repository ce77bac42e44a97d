//! Multi-scale FAST-9 corner detection.
//!
//! Corners are found on every level of a bilinear scale pyramid, thinned by
//! non-maximum suppression, oriented by the intensity centroid and finally
//! ranked by response across all levels.

pub mod corner_detection;
pub mod detector;
pub mod error;
pub mod pyramid;
pub mod refinement;
pub mod types;
pub mod utils;

pub use detector::FastDetector;
pub use error::{FastError, FastResult};
pub use types::{Detection, PyramidLevel, ScaleLevel, ScoredKeypoint};
