use serde::{Deserialize, Serialize};

/// Row-major 8-bit grayscale image
pub type Image = Vec<u8>;

/// Key-point ≙ FAST corner + orientation (radians), expressed in level-0 pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
    /// FAST response used for ranking and NMS
    pub response: f32,
    /// Pyramid level the corner was detected on
    pub level: usize,
    /// Downscale factor of that level (1.0 for level 0)
    pub scale: f32,
}

impl Keypoint {
    /// Position inside the pyramid level the keypoint was found on
    pub fn level_position(&self) -> (f32, f32) {
        (self.x / self.scale, self.y / self.scale)
    }
}

/// 256-bit binary descriptor = 32 bytes
pub type Descriptor = [u8; 32];

/// Number of differing bits between two descriptors (0..=256)
#[inline]
pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Settings shared by FAST detection and BRIEF description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub threshold: u8,
    pub patch_size: usize,
    pub n_threads: usize,
    /// Upper bound on keypoints kept per image, strongest first
    pub max_features: usize,
    pub n_levels: usize,
    pub scale_factor: f32,
    pub nms_distance: f32,
}

impl FeatureConfig {
    /// Border (in level pixels) where no keypoint is reported so the
    /// orientation and descriptor patches stay inside the image
    pub fn edge_threshold(&self) -> usize {
        self.patch_size / 2 + 1
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            threshold: 20,
            patch_size: 31,
            n_threads: num_cpus::get().max(1),
            max_features: 5000,
            n_levels: 8,
            scale_factor: 1.2,
            nms_distance: 3.0,
        }
    }
}

/// Initialize Rayon thread pool with the specified number of threads
pub fn init_thread_pool(n_threads: usize) -> Result<(), rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build_global()
}
