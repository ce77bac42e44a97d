use grade_core::{Image, Keypoint};
use crate::types::{CornerType, ScoredKeypoint, ScaleLevel};
use crate::utils::has_contiguous_arc;
use rayon::prelude::*;

/// Minimum arc length for FAST-9
pub const FAST_ARC_LENGTH: usize = 9;

/// FAST segment-test corner detection
pub struct CornerDetector;

impl CornerDetector {
    /// Bresenham circle of radius 3, clockwise from 12 o'clock
    pub const FAST_OFFSETS: [(i32, i32); 16] = [
        (0, -3), (1, -3), (2, -2), (3, -1),
        (3, 0), (3, 1), (2, 2), (1, 3),
        (0, 3), (-1, 3), (-2, 2), (-3, 1),
        (-3, 0), (-3, -1), (-2, -2), (-1, -3),
    ];

    /// Detect corners on one pyramid level, rows in parallel.
    ///
    /// Pixels within `border` of the level edge are skipped. Returned
    /// coordinates are in level pixels; the caller maps them to level 0.
    pub fn detect_keypoints_at_scale(
        img: &Image,
        scale_level: &ScaleLevel,
        threshold: u8,
        border: usize,
    ) -> Vec<ScoredKeypoint> {
        let width = scale_level.width;
        let height = scale_level.height;
        let border = border.max(3);
        if width <= 2 * border || height <= 2 * border {
            return Vec::new();
        }

        (border..height - border)
            .into_par_iter()
            .flat_map_iter(|y| {
                let mut row = Vec::new();
                for x in border..width - border {
                    if let Some(response) = Self::segment_test(img, width, x, y, threshold) {
                        row.push(ScoredKeypoint {
                            keypoint: Keypoint {
                                x: x as f32,
                                y: y as f32,
                                angle: 0.0,
                                response,
                                level: scale_level.level,
                                scale: scale_level.scale,
                            },
                            response,
                        });
                    }
                }
                row
            })
            .collect()
    }

    /// Classify a circle pixel against the centre intensity
    #[inline]
    fn classify(center: i32, pixel: i32, threshold: i32) -> CornerType {
        if pixel > center + threshold {
            CornerType::Bright
        } else if pixel < center - threshold {
            CornerType::Dark
        } else {
            CornerType::None
        }
    }

    /// FAST-9 test. Returns the corner response when at least nine
    /// contiguous circle pixels are all brighter or all darker.
    ///
    /// The caller guarantees a border of at least three pixels.
    pub fn segment_test(img: &Image, width: usize, x: usize, y: usize, threshold: u8) -> Option<f32> {
        let center = img[y * width + x] as i32;
        let t = threshold as i32;

        // Quick rejection on the four compass points: a 9-arc covers at least two of them
        let compass = [0usize, 4, 8, 12];
        let mut compass_bright = 0;
        let mut compass_dark = 0;
        for &i in &compass {
            let (dx, dy) = Self::FAST_OFFSETS[i];
            let p = img[(y as i32 + dy) as usize * width + (x as i32 + dx) as usize] as i32;
            match Self::classify(center, p, t) {
                CornerType::Bright => compass_bright += 1,
                CornerType::Dark => compass_dark += 1,
                CornerType::None => {}
            }
        }
        if compass_bright < 2 && compass_dark < 2 {
            return None;
        }

        let mut bright_mask = 0u16;
        let mut dark_mask = 0u16;
        let mut diffs = [0i32; 16];
        for (i, &(dx, dy)) in Self::FAST_OFFSETS.iter().enumerate() {
            let p = img[(y as i32 + dy) as usize * width + (x as i32 + dx) as usize] as i32;
            diffs[i] = p - center;
            match Self::classify(center, p, t) {
                CornerType::Bright => bright_mask |= 1 << i,
                CornerType::Dark => dark_mask |= 1 << i,
                CornerType::None => {}
            }
        }

        let mask = if has_contiguous_arc(bright_mask, FAST_ARC_LENGTH) {
            bright_mask
        } else if has_contiguous_arc(dark_mask, FAST_ARC_LENGTH) {
            dark_mask
        } else {
            return None;
        };

        Some(Self::arc_response(mask, &diffs))
    }

    /// Mean squared intensity difference over the qualifying circle pixels
    fn arc_response(mask: u16, diffs: &[i32; 16]) -> f32 {
        let mut sum = 0.0f32;
        let mut count = 0u32;
        for (i, &d) in diffs.iter().enumerate() {
            if mask & (1 << i) != 0 {
                sum += (d * d) as f32;
                count += 1;
            }
        }
        if count > 0 {
            sum / count as f32
        } else {
            0.0
        }
    }
}
