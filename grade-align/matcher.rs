use grade_brief::BriefGenerator;
use grade_core::{hamming_distance, Descriptor, FeatureConfig, Keypoint};
use grade_fast::{FastDetector, FastError};
use image::GrayImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AlignError, AlignResult};

/// Correspondence filtering applied before homography estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Correspondences at or above this Hamming distance are dropped
    pub max_distance: u32,
    pub min_matches: usize,
    pub cross_check: bool,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_distance: 70,
            min_matches: 10,
            cross_check: true,
        }
    }
}

/// A template keypoint paired with its nearest sheet keypoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub template_index: usize,
    pub sheet_index: usize,
    pub template_point: [f64; 2],
    pub sheet_point: [f64; 2],
    /// Hamming distance between the two descriptors (0..=256)
    pub distance: u32,
}

/// Keypoints of one image with their descriptors, index-aligned
#[derive(Debug, Clone)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Outcome of matching a sheet against a template
#[derive(Debug, Clone)]
pub struct MatchSet {
    pub template: Features,
    pub sheet: Features,
    /// Sorted by ascending distance
    pub correspondences: Vec<Correspondence>,
}

/// ORB-style detection plus brute-force Hamming matching
pub struct FeatureMatcher {
    features: FeatureConfig,
    brief: BriefGenerator,
}

impl FeatureMatcher {
    pub fn new(features: FeatureConfig) -> Self {
        let brief = BriefGenerator::new(features.patch_size);
        Self { features, brief }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.features
    }

    /// Detect and describe keypoints of one image.
    ///
    /// `label` names the image in the error raised when nothing is found.
    pub fn extract(&self, image: &GrayImage, label: &str) -> AlignResult<Features> {
        let (w, h) = image.dimensions();
        let detector = FastDetector::new(self.features.clone(), w as usize, h as usize).map_err(|e| match e {
            // An image too small to hold one patch has no features to find
            FastError::InvalidImageSize { .. } | FastError::ImageTooSmall { .. } => AlignError::FeatureDetection {
                image: label.to_string(),
            },
            FastError::InvalidPatchSize { patch_size, min_image_dim } if patch_size >= min_image_dim => {
                AlignError::FeatureDetection {
                    image: label.to_string(),
                }
            }
            other => AlignError::Detector(other),
        })?;
        let detection = detector.detect(image.as_raw())?;

        if detection.keypoints.is_empty() {
            return Err(AlignError::FeatureDetection {
                image: label.to_string(),
            });
        }

        let descriptors = self.brief.describe(&detection);
        Ok(Features {
            keypoints: detection.keypoints,
            descriptors,
        })
    }

    /// Extract features from both images and pair them up
    pub fn match_images(&self, template: &GrayImage, sheet: &GrayImage, config: &MatchConfig) -> AlignResult<MatchSet> {
        let template_features = self.extract(template, "template")?;
        let sheet_features = self.extract(sheet, "sheet")?;

        let correspondences: Vec<Correspondence> = match_descriptors(
            &template_features.descriptors,
            &sheet_features.descriptors,
            config.cross_check,
        )
        .into_iter()
        .map(|(ti, si, distance)| {
            let t = &template_features.keypoints[ti];
            let s = &sheet_features.keypoints[si];
            Correspondence {
                template_index: ti,
                sheet_index: si,
                template_point: [t.x as f64, t.y as f64],
                sheet_point: [s.x as f64, s.y as f64],
                distance,
            }
        })
        .collect();

        debug!(
            template_keypoints = template_features.len(),
            sheet_keypoints = sheet_features.len(),
            matches = correspondences.len(),
            "descriptor matching finished"
        );

        Ok(MatchSet {
            template: template_features,
            sheet: sheet_features,
            correspondences,
        })
    }
}

/// Nearest candidate by Hamming distance; ties go to the lower index
fn nearest(descriptor: &Descriptor, candidates: &[Descriptor]) -> Option<(usize, u32)> {
    let mut best: Option<(usize, u32)> = None;
    for (i, c) in candidates.iter().enumerate() {
        let d = hamming_distance(descriptor, c);
        match best {
            Some((_, bd)) if bd <= d => {}
            _ => best = Some((i, d)),
        }
    }
    best
}

/// Brute-force matching of `query` against `train`.
///
/// Returns `(query_index, train_index, distance)` sorted by distance. With
/// `cross_check` a pair survives only when each side is the other's nearest
/// neighbour.
pub fn match_descriptors(query: &[Descriptor], train: &[Descriptor], cross_check: bool) -> Vec<(usize, usize, u32)> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }

    let forward: Vec<Option<(usize, u32)>> = query.par_iter().map(|d| nearest(d, train)).collect();
    let backward: Vec<Option<(usize, u32)>> = if cross_check {
        train.par_iter().map(|d| nearest(d, query)).collect()
    } else {
        Vec::new()
    };

    let mut matches: Vec<(usize, usize, u32)> = forward
        .into_iter()
        .enumerate()
        .filter_map(|(qi, best)| {
            let (ti, dist) = best?;
            if cross_check && backward[ti].map(|(back, _)| back) != Some(qi) {
                return None;
            }
            Some((qi, ti, dist))
        })
        .collect();

    matches.sort_by_key(|&(_, _, dist)| dist);
    matches
}

/// Keep correspondences under `max_distance` and require `min_matches` of them
pub fn filter_correspondences(correspondences: &[Correspondence], config: &MatchConfig) -> AlignResult<Vec<Correspondence>> {
    let filtered: Vec<Correspondence> = correspondences
        .iter()
        .filter(|c| c.distance < config.max_distance)
        .copied()
        .collect();

    debug!(
        total = correspondences.len(),
        filtered = filtered.len(),
        max_distance = config.max_distance,
        "correspondences filtered"
    );

    if filtered.len() < config.min_matches {
        return Err(AlignError::InsufficientMatches {
            found: filtered.len(),
            required: config.min_matches,
        });
    }
    Ok(filtered)
}
