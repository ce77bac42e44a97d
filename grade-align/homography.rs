//! Sheet-to-template homography via normalised DLT inside RANSAC.
//!
//! Points are `[x, y]` pairs in pixels. The estimated matrix maps sheet
//! coordinates onto template coordinates and is scaled so `h33 = 1`.

use nalgebra::{DMatrix, Matrix3, SymmetricEigen, Vector3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AlignError, AlignResult};
use crate::matcher::Correspondence;

/// Below this |det| a model is treated as singular
const SINGULAR_EPS: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomographyConfig {
    /// Inlier tolerance in template pixels
    pub reprojection_threshold: f64,
    pub max_iters: usize,
    pub seed: u64,
}

impl Default for HomographyConfig {
    fn default() -> Self {
        Self {
            reprojection_threshold: 5.0,
            max_iters: 2000,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HomographyEstimate {
    pub matrix: Matrix3<f64>,
    pub inlier_mask: Vec<bool>,
    pub inliers: usize,
    /// Number of correspondences the model was fitted on
    pub filtered: usize,
    /// `inliers / filtered`, in [0, 1]
    pub confidence: f64,
    /// Mean reprojection error over the inliers
    pub mean_error: f64,
}

impl HomographyEstimate {
    /// Row-major copy of the matrix
    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        let m = &self.matrix;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
        ]
    }
}

/// Project a point through `h`; NaN when it lands at infinity
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> [f64; 2] {
    let p = h * Vector3::new(x, y, 1.0);
    if p[2].abs() < 1e-15 {
        return [f64::NAN, f64::NAN];
    }
    [p[0] / p[2], p[1] / p[2]]
}

pub fn reprojection_error(h: &Matrix3<f64>, src: &[f64; 2], dst: &[f64; 2]) -> f64 {
    let p = project(h, src[0], src[1]);
    let dx = p[0] - dst[0];
    let dy = p[1] - dst[1];
    (dx * dx + dy * dy).sqrt()
}

/// Hartley normalisation: centroid to the origin, mean distance sqrt(2)
fn normalize_points(pts: &[[f64; 2]]) -> (Matrix3<f64>, Vec<[f64; 2]>) {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p[1]).sum::<f64>() / n;

    let mean_dist = pts
        .iter()
        .map(|p| ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts.iter().map(|p| [s * (p[0] - cx), s * (p[1] - cy)]).collect();
    (t, normalized)
}

/// Direct linear transform from four or more correspondences, `dst ≈ H·src`
pub fn estimate_dlt(src: &[[f64; 2]], dst: &[[f64; 2]]) -> AlignResult<Matrix3<f64>> {
    let n = src.len();
    if n < 4 || dst.len() != n {
        return Err(AlignError::HomographyComputation(format!(
            "need at least 4 paired points, got {} and {}",
            n,
            dst.len()
        )));
    }

    let (t_src, src_n) = normalize_points(src);
    let (t_dst, dst_n) = normalize_points(dst);

    let mut a = DMatrix::zeros(2 * n, 9);
    for i in 0..n {
        let (sx, sy) = (src_n[i][0], src_n[i][1]);
        let (dx, dy) = (dst_n[i][0], dst_n[i][1]);

        a[(2 * i, 3)] = -sx;
        a[(2 * i, 4)] = -sy;
        a[(2 * i, 5)] = -1.0;
        a[(2 * i, 6)] = dy * sx;
        a[(2 * i, 7)] = dy * sy;
        a[(2 * i, 8)] = dy;

        a[(2 * i + 1, 0)] = sx;
        a[(2 * i + 1, 1)] = sy;
        a[(2 * i + 1, 2)] = 1.0;
        a[(2 * i + 1, 6)] = -dx * sx;
        a[(2 * i + 1, 7)] = -dx * sy;
        a[(2 * i + 1, 8)] = -dx;
    }

    // Null vector of A is the eigenvector of AᵀA with the smallest eigenvalue
    let eig = SymmetricEigen::new(a.transpose() * &a);
    let min_idx = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|(_, x), (_, y)| x.abs().total_cmp(&y.abs()))
        .map(|(i, _)| i)
        .unwrap_or(0);
    let v = eig.eigenvectors.column(min_idx);
    let h_norm = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);

    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or_else(|| AlignError::HomographyComputation("normalisation not invertible".into()))?;
    let h = t_dst_inv * h_norm * t_src;

    let scale = h[(2, 2)];
    if scale.abs() < 1e-15 {
        return Err(AlignError::HomographyComputation("h33 vanishes".into()));
    }
    Ok(h / scale)
}

/// Finite and invertible
fn is_well_conditioned(h: &Matrix3<f64>) -> bool {
    h.iter().all(|v| v.is_finite()) && h.determinant().abs() > SINGULAR_EPS
}

pub struct HomographyEstimator {
    config: HomographyConfig,
}

impl HomographyEstimator {
    pub fn new(config: HomographyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HomographyConfig {
        &self.config
    }

    /// Fit on already filtered correspondences, sheet points onto template points
    pub fn estimate(&self, correspondences: &[Correspondence]) -> AlignResult<HomographyEstimate> {
        let src: Vec<[f64; 2]> = correspondences.iter().map(|c| c.sheet_point).collect();
        let dst: Vec<[f64; 2]> = correspondences.iter().map(|c| c.template_point).collect();
        self.estimate_from_points(&src, &dst)
    }

    /// RANSAC over 4-point models, refit on the consensus set
    pub fn estimate_from_points(&self, src: &[[f64; 2]], dst: &[[f64; 2]]) -> AlignResult<HomographyEstimate> {
        let n = src.len();
        if n < 4 || dst.len() != n {
            return Err(AlignError::HomographyComputation(format!(
                "need at least 4 correspondences, got {n}"
            )));
        }

        let threshold = self.config.reprojection_threshold;
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let mut best_inliers = 0usize;
        let mut best_mask = vec![false; n];
        let mut best_h: Option<Matrix3<f64>> = None;
        let mut iterations = 0usize;

        for _ in 0..self.config.max_iters {
            iterations += 1;
            let sample = rand::seq::index::sample(&mut rng, n, 4);
            let s4: Vec<[f64; 2]> = sample.iter().map(|i| src[i]).collect();
            let d4: Vec<[f64; 2]> = sample.iter().map(|i| dst[i]).collect();

            let h = match estimate_dlt(&s4, &d4) {
                Ok(h) if is_well_conditioned(&h) => h,
                _ => continue,
            };

            let mask: Vec<bool> = (0..n)
                .map(|i| reprojection_error(&h, &src[i], &dst[i]) < threshold)
                .collect();
            let count = mask.iter().filter(|&&m| m).count();

            if count > best_inliers {
                best_inliers = count;
                best_mask = mask;
                best_h = Some(h);

                // Early exit above 90 % inliers
                if count * 10 > n * 9 {
                    break;
                }
            }
        }

        debug!(iterations, best_inliers, candidates = n, "RANSAC finished");

        let best_h = match best_h {
            Some(h) if best_inliers >= 4 => h,
            _ => {
                return Err(AlignError::HomographyComputation(format!(
                    "no model with at least 4 inliers among {n} correspondences"
                )))
            }
        };

        let inlier_src: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| src[i]).collect();
        let inlier_dst: Vec<[f64; 2]> = (0..n).filter(|&i| best_mask[i]).map(|i| dst[i]).collect();
        let refit = match estimate_dlt(&inlier_src, &inlier_dst) {
            Ok(h) if is_well_conditioned(&h) => h,
            _ => best_h,
        };

        let errors: Vec<f64> = (0..n).map(|i| reprojection_error(&refit, &src[i], &dst[i])).collect();
        let inlier_mask: Vec<bool> = errors.iter().map(|&e| e < threshold).collect();
        let inliers = inlier_mask.iter().filter(|&&m| m).count();

        if inliers < 4 || !is_well_conditioned(&refit) {
            return Err(AlignError::HomographyComputation(
                "refined model is degenerate".into(),
            ));
        }

        let mean_error = errors
            .iter()
            .zip(&inlier_mask)
            .filter(|(_, m)| **m)
            .map(|(e, _)| e)
            .sum::<f64>()
            / inliers as f64;

        Ok(HomographyEstimate {
            matrix: refit,
            inlier_mask,
            inliers,
            filtered: n,
            confidence: inliers as f64 / n as f64,
            mean_error,
        })
    }
}
