use grade_core::{Image, Keypoint};

/// Keypoint with corner response score for NMS
#[derive(Debug, Clone, Copy)]
pub struct ScoredKeypoint {
    pub keypoint: Keypoint,
    pub response: f32,
}

/// Scale information for pyramid levels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleLevel {
    pub level: usize,
    pub scale: f32,
    pub width: usize,
    pub height: usize,
}

/// One downsampled image of the pyramid together with its geometry
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub scale_level: ScaleLevel,
    pub image: Image,
}

/// Keypoints of one image plus the pyramid they were found on.
///
/// The pyramid is kept so descriptors can be sampled at the level each
/// keypoint belongs to.
#[derive(Debug, Clone)]
pub struct Detection {
    pub keypoints: Vec<Keypoint>,
    pub pyramid: Vec<PyramidLevel>,
}

/// Corner type classification for a circle pixel
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CornerType {
    Bright,
    Dark,
    None,
}
