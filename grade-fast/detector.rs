use grade_core::{FeatureConfig, Image, Keypoint};
use crate::corner_detection::CornerDetector;
use crate::error::{FastError, FastResult};
use crate::pyramid::ImagePyramid;
use crate::refinement::KeypointRefinement;
use crate::types::{Detection, PyramidLevel, ScaleLevel, ScoredKeypoint};
use tracing::debug;

/// FAST requires at least 7x7 image (3-pixel border on each side)
pub const MIN_IMAGE_SIZE: usize = 7;

/// Main FAST corner detector with multi-scale capability
#[derive(Debug, Clone)]
pub struct FastDetector {
    cfg: FeatureConfig,
    w: usize,
    h: usize,
    scale_levels: Vec<ScaleLevel>,
}

impl FastDetector {
    /// Creates a new FAST detector with validation
    pub fn new(cfg: FeatureConfig, width: usize, height: usize) -> FastResult<Self> {
        if width == 0 || height == 0 {
            return Err(FastError::InvalidImageSize { width, height });
        }

        if width < MIN_IMAGE_SIZE || height < MIN_IMAGE_SIZE {
            return Err(FastError::ImageTooSmall {
                width,
                height,
                min_size: MIN_IMAGE_SIZE,
            });
        }

        // 0 would detect everything, >127 could cause issues with u8 arithmetic
        if cfg.threshold == 0 || cfg.threshold > 127 {
            return Err(FastError::InvalidThreshold(cfg.threshold));
        }

        let min_dim = width.min(height);
        if cfg.patch_size % 2 == 0 || cfg.patch_size < 3 || cfg.patch_size >= min_dim {
            return Err(FastError::InvalidPatchSize {
                patch_size: cfg.patch_size,
                min_image_dim: min_dim,
            });
        }

        let scale_levels = ImagePyramid::generate_scale_levels(width, height, cfg.n_levels, cfg.scale_factor)?;

        Ok(Self {
            cfg,
            w: width,
            h: height,
            scale_levels,
        })
    }

    /// Validates image data before processing
    fn validate_image(&self, img: &Image) -> FastResult<()> {
        let expected_len = self.w * self.h;
        if img.len() != expected_len {
            return Err(FastError::InvalidImageData {
                expected_len,
                actual_len: img.len(),
            });
        }
        Ok(())
    }

    /// Detect keypoints over the whole pyramid, strongest `max_features` first
    pub fn detect(&self, img: &Image) -> FastResult<Detection> {
        self.validate_image(img)?;

        let pyramid = ImagePyramid::build_image_pyramid(img, self.w, self.h, &self.scale_levels);

        let mut keypoints: Vec<Keypoint> = pyramid
            .iter()
            .flat_map(|level| self.detect_keypoints_at_level(level))
            .collect();

        keypoints.sort_by(|a, b| b.response.total_cmp(&a.response));
        keypoints.truncate(self.cfg.max_features);

        debug!(
            keypoints = keypoints.len(),
            levels = pyramid.len(),
            "FAST detection finished"
        );

        Ok(Detection { keypoints, pyramid })
    }

    /// Keypoints only, for callers that do not need the pyramid
    pub fn detect_keypoints(&self, img: &Image) -> FastResult<Vec<Keypoint>> {
        Ok(self.detect(img)?.keypoints)
    }

    /// Corners of a single level with orientation, mapped to level-0 coordinates
    fn detect_keypoints_at_level(&self, level: &PyramidLevel) -> Vec<Keypoint> {
        let scale_level = &level.scale_level;
        let candidates = CornerDetector::detect_keypoints_at_scale(
            &level.image,
            scale_level,
            self.cfg.threshold,
            self.cfg.edge_threshold(),
        );
        let mut suppressed: Vec<ScoredKeypoint> =
            KeypointRefinement::non_maximum_suppression(&candidates, self.cfg.nms_distance);
        // The global cap keeps at most `max_features` from any one level
        suppressed.truncate(self.cfg.max_features);

        debug!(
            level = scale_level.level,
            candidates = candidates.len(),
            kept = suppressed.len(),
            "level corners"
        );

        suppressed
            .into_iter()
            .map(|sk| {
                let angle = KeypointRefinement::compute_orientation(
                    &level.image,
                    scale_level.width,
                    scale_level.height,
                    sk.keypoint.x,
                    sk.keypoint.y,
                    self.cfg.patch_size,
                );
                Keypoint {
                    x: sk.keypoint.x * scale_level.scale,
                    y: sk.keypoint.y * scale_level.scale,
                    angle,
                    response: sk.response,
                    level: scale_level.level,
                    scale: scale_level.scale,
                }
            })
            .collect()
    }

    /// Get scale levels for this detector
    pub fn scale_levels(&self) -> &[ScaleLevel] {
        &self.scale_levels
    }

    /// Get detector configuration
    pub fn config(&self) -> &FeatureConfig {
        &self.cfg
    }

    /// Get image dimensions
    pub fn dimensions(&self) -> (usize, usize) {
        (self.w, self.h)
    }
}
