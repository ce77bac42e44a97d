//! Steered BRIEF: 256 intensity comparisons around each keypoint, rotated by
//! the keypoint orientation and sampled from a smoothed pyramid level.

use grade_core::{Descriptor, Image, Keypoint};
use grade_fast::{Detection, PyramidLevel};
use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::debug;

const DESCRIPTOR_BITS: usize = 256;
const PATTERN_SEED: u64 = 0x5EED_B1EF;
const SMOOTHING_SIGMA: f32 = 2.0;

/// A test pair `(x1, y1, x2, y2)` relative to the keypoint
pub type TestPair = (f32, f32, f32, f32);

pub struct BriefGenerator {
    pattern: Vec<TestPair>,
}

/// Pyramid level after Gaussian smoothing
struct SmoothedLevel {
    width: usize,
    height: usize,
    image: Image,
}

impl BriefGenerator {
    /// Pattern fitting inside a `patch_size` square at any rotation
    pub fn new(patch_size: usize) -> Self {
        Self {
            pattern: Self::sampling_pattern(patch_size, PATTERN_SEED),
        }
    }

    /// Fixed pseudo-random test pairs drawn uniformly from a disc.
    ///
    /// The disc radius keeps rotated samples inside the patch; the seed
    /// makes descriptors comparable across runs and images.
    pub fn sampling_pattern(patch_size: usize, seed: u64) -> Vec<TestPair> {
        let radius = ((patch_size / 2) as f32 - 2.0).max(1.0);
        let mut rng = StdRng::seed_from_u64(seed);
        let draw = |rng: &mut StdRng| loop {
            let x: f32 = rng.gen_range(-radius..=radius);
            let y: f32 = rng.gen_range(-radius..=radius);
            if x * x + y * y <= radius * radius {
                return (x.round(), y.round());
            }
        };

        let mut pattern = Vec::with_capacity(DESCRIPTOR_BITS);
        while pattern.len() < DESCRIPTOR_BITS {
            let (x1, y1) = draw(&mut rng);
            let (x2, y2) = draw(&mut rng);
            if (x1, y1) != (x2, y2) {
                pattern.push((x1, y1, x2, y2));
            }
        }
        pattern
    }

    pub fn pattern(&self) -> &[TestPair] {
        &self.pattern
    }

    /// Describe every keypoint of a detection, in keypoint order
    pub fn describe(&self, detection: &Detection) -> Vec<Descriptor> {
        let levels: Vec<SmoothedLevel> = detection.pyramid.iter().map(Self::smooth_level).collect();

        let descriptors: Vec<Descriptor> = detection
            .keypoints
            .par_iter()
            .map(|kp| match levels.get(kp.level) {
                Some(level) => self.describe_keypoint(level, kp),
                None => [0u8; 32],
            })
            .collect();

        debug!(descriptors = descriptors.len(), "BRIEF descriptors computed");
        descriptors
    }

    fn smooth_level(level: &PyramidLevel) -> SmoothedLevel {
        let (width, height) = (level.scale_level.width, level.scale_level.height);
        let image = match GrayImage::from_raw(width as u32, height as u32, level.image.clone()) {
            Some(gray) => gaussian_blur_f32(&gray, SMOOTHING_SIGMA).into_raw(),
            None => level.image.clone(),
        };
        SmoothedLevel { width, height, image }
    }

    fn describe_keypoint(&self, level: &SmoothedLevel, kp: &Keypoint) -> Descriptor {
        let (s, c) = kp.angle.sin_cos();
        let (cx, cy) = kp.level_position();
        let mut d = [0u8; 32];

        for (i, &(dx1, dy1, dx2, dy2)) in self.pattern.iter().enumerate() {
            let (rx1, ry1) = (cx + c * dx1 - s * dy1, cy + s * dx1 + c * dy1);
            let (rx2, ry2) = (cx + c * dx2 - s * dy2, cy + s * dx2 + c * dy2);

            let val1 = bilinear_sample(&level.image, level.width, level.height, rx1, ry1);
            let val2 = bilinear_sample(&level.image, level.width, level.height, rx2, ry2);

            let bit = (val1 < val2) as u8;
            d[i / 8] |= bit << (i % 8);
        }
        d
    }
}

/// Bilinear interpolation, clamping samples that fall off the image
fn bilinear_sample(img: &Image, w: usize, h: usize, x: f32, y: f32) -> f32 {
    let x0 = x.floor();
    let y0 = y.floor();
    let x1 = x0 + 1.0;
    let y1 = y0 + 1.0;

    if x0 < 0.0 || y0 < 0.0 || x1 >= w as f32 || y1 >= h as f32 {
        let cx = x.round().clamp(0.0, (w - 1) as f32) as usize;
        let cy = y.round().clamp(0.0, (h - 1) as f32) as usize;
        return img[cy * w + cx] as f32;
    }

    let dx = x - x0;
    let dy = y - y0;
    let (x0, y0, x1, y1) = (x0 as usize, y0 as usize, x1 as usize, y1 as usize);

    let p00 = img[y0 * w + x0] as f32;
    let p10 = img[y0 * w + x1] as f32;
    let p01 = img[y1 * w + x0] as f32;
    let p11 = img[y1 * w + x1] as f32;

    let top = p00 * (1.0 - dx) + p10 * dx;
    let bottom = p01 * (1.0 - dx) + p11 * dx;

    top * (1.0 - dy) + bottom * dy
}
