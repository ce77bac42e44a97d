use std::collections::HashMap;

use grade_core::Image;
use crate::types::ScoredKeypoint;

/// Orientation and suppression passes applied after the segment test
pub struct KeypointRefinement;

impl KeypointRefinement {
    /// Orientation by the intensity centroid of a square patch.
    ///
    /// The patch is clipped to the image, so points near the border still
    /// get a finite angle.
    pub fn compute_orientation(img: &Image, width: usize, height: usize, x: f32, y: f32, patch_size: usize) -> f32 {
        let half = (patch_size / 2) as i64;
        let (cx, cy) = (x.round() as i64, y.round() as i64);
        let mut m10 = 0i64;
        let mut m01 = 0i64;

        for dy in -half..=half {
            let yy = cy + dy;
            if yy < 0 || yy >= height as i64 {
                continue;
            }
            let row = yy as usize * width;
            for dx in -half..=half {
                let xx = cx + dx;
                if xx < 0 || xx >= width as i64 {
                    continue;
                }
                let val = img[row + xx as usize] as i64;
                m10 += dx * val;
                m01 += dy * val;
            }
        }

        if m10 == 0 && m01 == 0 {
            0.0
        } else {
            (m01 as f32).atan2(m10 as f32)
        }
    }

    /// Greedy non-maximum suppression, strongest first.
    ///
    /// Kept points are bucketed in a grid of `min_distance` cells, so each
    /// candidate is only compared against the 3x3 cells around it.
    pub fn non_maximum_suppression(keypoints: &[ScoredKeypoint], min_distance: f32) -> Vec<ScoredKeypoint> {
        let mut sorted_keypoints = keypoints.to_vec();
        sorted_keypoints.sort_by(|a, b| b.response.total_cmp(&a.response));

        if min_distance.is_nan() || min_distance <= 0.0 {
            return sorted_keypoints;
        }

        let min_distance_sq = min_distance * min_distance;
        let cell_of = |x: f32, y: f32| ((x / min_distance).floor() as i64, (y / min_distance).floor() as i64);
        let mut grid: HashMap<(i64, i64), Vec<(f32, f32)>> = HashMap::new();
        let mut suppressed: Vec<ScoredKeypoint> = Vec::new();

        for candidate in sorted_keypoints {
            let (x, y) = (candidate.keypoint.x, candidate.keypoint.y);
            let (cx, cy) = cell_of(x, y);

            let is_local_max = (cy - 1..=cy + 1).all(|gy| {
                (cx - 1..=cx + 1).all(|gx| {
                    grid.get(&(gx, gy)).map_or(true, |kept| {
                        kept.iter().all(|&(kx, ky)| {
                            let (dx, dy) = (x - kx, y - ky);
                            dx * dx + dy * dy >= min_distance_sq
                        })
                    })
                })
            });

            if is_local_max {
                grid.entry((cx, cy)).or_default().push((x, y));
                suppressed.push(candidate);
            }
        }

        suppressed
    }
}
