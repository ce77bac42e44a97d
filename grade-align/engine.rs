use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use grade_core::{FeatureConfig, Keypoint};
use image::{GrayImage, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AlignError, AlignResult};
use crate::homography::{HomographyConfig, HomographyEstimator};
use crate::matcher::{filter_correspondences, FeatureMatcher, MatchConfig};
use crate::visualize::save_keypoint_overlay;
use crate::warp::warp_to_template;

/// Whose sheet is being aligned; part of the output file name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetRole {
    Student,
    Teacher,
}

impl SheetRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SheetRole::Student => "student",
            SheetRole::Teacher => "teacher",
        }
    }
}

impl fmt::Display for SheetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SheetRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "student" => Ok(SheetRole::Student),
            "teacher" => Ok(SheetRole::Teacher),
            other => Err(format!("unknown sheet role '{other}' (expected student or teacher)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Alignments below this inlier ratio are rejected
    pub min_confidence: f64,
    pub output_dir: PathBuf,
    /// Also write the sheet with its keypoints circled
    pub write_overlay: bool,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            output_dir: PathBuf::from("outputs"),
            write_overlay: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransformationsApplied {
    pub homography_alignment: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeypointCounts {
    pub template: usize,
    pub sheet: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchCounts {
    pub total: usize,
    pub filtered: usize,
    pub inliers: usize,
}

/// Record of one successful alignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    pub success: bool,
    /// Absent for in-memory alignment
    pub aligned_image_path: Option<PathBuf>,
    /// Row-major, maps sheet pixels onto template pixels
    pub transform_matrix: [[f64; 3]; 3],
    pub confidence_score: f64,
    pub mean_reprojection_error: f64,
    pub transformations_applied: TransformationsApplied,
    pub keypoints: KeypointCounts,
    pub matches: MatchCounts,
}

/// In-memory alignment output
#[derive(Debug, Clone)]
pub struct AlignedImage {
    pub image: GrayImage,
    pub sheet_keypoints: Vec<Keypoint>,
    pub result: AlignmentResult,
}

/// Hard gate on alignment quality; the minimum itself passes
pub fn passes_confidence_gate(confidence: f64, minimum: f64) -> bool {
    confidence >= minimum
}

/// Names every file written for one sheet: the template stem plus a sheet
/// identifier, so pipelines for different students never share a path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputTag {
    pub template: String,
    pub sheet: String,
}

impl OutputTag {
    /// Both parts are reduced to `[A-Za-z0-9_-]`
    pub fn new(template: &str, sheet: &str) -> Self {
        Self {
            template: sanitize_tag(template, "template"),
            sheet: sanitize_tag(sheet, "sheet"),
        }
    }

    pub fn from_paths(template_path: &Path, sheet_path: &Path) -> Self {
        Self::new(&file_stem(template_path), &file_stem(sheet_path))
    }

    /// Same template, a different sheet identifier
    pub fn with_sheet(&self, sheet: &str) -> Self {
        Self::new(&self.template, sheet)
    }

    /// `{template}_{sheet}`
    pub fn stem(&self) -> String {
        format!("{}_{}", self.template, self.sheet)
    }
}

impl fmt::Display for OutputTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem())
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sanitize_tag(raw: &str, fallback: &str) -> String {
    let tag: String = raw
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if tag.is_empty() {
        fallback.to_string()
    } else {
        tag
    }
}

/// `{output_dir}/aligned_{template}_{sheet}_{role}.{ext}`, the extension
/// taken from `sheet_path` and falling back to `png`
pub fn output_path_for(output_dir: &Path, tag: &OutputTag, role: SheetRole, sheet_path: &Path) -> PathBuf {
    let ext = sheet_path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_else(|| "png".to_string());
    output_dir.join(format!("aligned_{}_{role}.{ext}", tag.stem()))
}

fn overlay_path_for(output_dir: &Path, tag: &OutputTag, role: SheetRole) -> PathBuf {
    output_dir.join(format!("keypoints_{}_{role}.png", tag.stem()))
}

pub fn load_grayscale(path: &Path) -> AlignResult<GrayImage> {
    let load_err = |source| AlignError::ImageLoad {
        path: path.to_path_buf(),
        source,
    };
    let reader = ImageReader::open(path)
        .map_err(image::ImageError::IoError)
        .map_err(load_err)?;
    let decoded = reader.with_guessed_format().map_err(image::ImageError::IoError).map_err(load_err)?;
    Ok(decoded.decode().map_err(load_err)?.to_luma8())
}

/// Matcher, estimator and warp composed into one alignment step
pub struct AlignmentEngine {
    matcher: FeatureMatcher,
    match_config: MatchConfig,
    estimator: HomographyEstimator,
    config: AlignmentConfig,
}

impl AlignmentEngine {
    pub fn new(
        features: FeatureConfig,
        match_config: MatchConfig,
        homography: HomographyConfig,
        config: AlignmentConfig,
    ) -> Self {
        Self {
            matcher: FeatureMatcher::new(features),
            match_config,
            estimator: HomographyEstimator::new(homography),
            config,
        }
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    /// Align the sheet at `sheet_path` to the template and persist the result,
    /// named after the template and sheet file stems
    pub fn align(&self, template_path: &Path, sheet_path: &Path, role: SheetRole) -> AlignResult<AlignmentResult> {
        let tag = OutputTag::from_paths(template_path, sheet_path);
        Ok(self.align_tagged(template_path, sheet_path, role, &tag)?.result)
    }

    /// Align and persist under `tag`; the warped image stays available in memory
    pub fn align_tagged(
        &self,
        template_path: &Path,
        sheet_path: &Path,
        role: SheetRole,
        tag: &OutputTag,
    ) -> AlignResult<AlignedImage> {
        let template = load_grayscale(template_path)?;
        let sheet = load_grayscale(sheet_path)?;

        let mut aligned = self.align_images(&template, &sheet)?;

        fs::create_dir_all(&self.config.output_dir).map_err(|e| AlignError::ImagePersist {
            path: self.config.output_dir.clone(),
            source: image::ImageError::IoError(e),
        })?;

        let out_path = output_path_for(&self.config.output_dir, tag, role, sheet_path);
        aligned.image.save(&out_path).map_err(|source| AlignError::ImagePersist {
            path: out_path.clone(),
            source,
        })?;

        if self.config.write_overlay {
            let overlay = overlay_path_for(&self.config.output_dir, tag, role);
            save_keypoint_overlay(&sheet, &aligned.sheet_keypoints, &overlay)?;
            debug!(path = %overlay.display(), "keypoint overlay written");
        }

        info!(
            role = %role,
            confidence = aligned.result.confidence_score,
            path = %out_path.display(),
            "sheet aligned"
        );

        aligned.result.aligned_image_path = Some(out_path);
        Ok(aligned)
    }

    /// Alignment without any file I/O
    pub fn align_images(&self, template: &GrayImage, sheet: &GrayImage) -> AlignResult<AlignedImage> {
        let match_set = self.matcher.match_images(template, sheet, &self.match_config)?;
        let filtered = filter_correspondences(&match_set.correspondences, &self.match_config)?;
        let estimate = self.estimator.estimate(&filtered)?;

        debug!(
            inliers = estimate.inliers,
            filtered = estimate.filtered,
            mean_error = estimate.mean_error,
            "homography estimated"
        );

        if !passes_confidence_gate(estimate.confidence, self.config.min_confidence) {
            return Err(AlignError::LowConfidence {
                confidence: estimate.confidence,
                minimum: self.config.min_confidence,
            });
        }

        let (w, h) = template.dimensions();
        let image = warp_to_template(sheet, &estimate.matrix, w, h)?;

        let result = AlignmentResult {
            success: true,
            aligned_image_path: None,
            transform_matrix: estimate.to_rows(),
            confidence_score: estimate.confidence,
            mean_reprojection_error: estimate.mean_error,
            transformations_applied: TransformationsApplied {
                homography_alignment: true,
            },
            keypoints: KeypointCounts {
                template: match_set.template.len(),
                sheet: match_set.sheet.len(),
            },
            matches: MatchCounts {
                total: match_set.correspondences.len(),
                filtered: estimate.filtered,
                inliers: estimate.inliers,
            },
        };

        Ok(AlignedImage {
            image,
            sheet_keypoints: match_set.sheet.keypoints,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use image::Luma;

    /// Hashed 8x8 blocks; the sheet is the same page shifted by `offset`
    fn page(width: u32, height: u32, offset: (u32, u32)) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let (bx, by) = ((x + offset.0) / 8, (y + offset.1) / 8);
            let h = bx.wrapping_mul(73_856_093) ^ by.wrapping_mul(19_349_663);
            Luma([(h.wrapping_mul(2_654_435_761) >> 24) as u8])
        })
    }

    fn engine(config: AlignmentConfig) -> AlignmentEngine {
        let features = FeatureConfig { n_levels: 1, n_threads: 1, ..FeatureConfig::default() };
        AlignmentEngine::new(features, MatchConfig::default(), HomographyConfig::default(), config)
    }

    #[test]
    fn test_confidence_gate_boundary() {
        assert!(!passes_confidence_gate(0.499, 0.5));
        assert!(passes_confidence_gate(0.5, 0.5));
        assert!(passes_confidence_gate(0.501, 0.5));
    }

    #[test]
    fn test_output_path_naming() {
        let dir = Path::new("outputs");
        let tag = OutputTag::from_paths(Path::new("blank/quiz 3.png"), Path::new("scans/student_sheet_001.jpg"));
        assert_eq!(
            output_path_for(dir, &tag, SheetRole::Student, Path::new("scans/student_sheet_001.jpg")),
            PathBuf::from("outputs/aligned_quiz_3_student_sheet_001_student.jpg")
        );
        assert_eq!(
            output_path_for(dir, &tag.with_sheet("s-17"), SheetRole::Teacher, Path::new("key")),
            PathBuf::from("outputs/aligned_quiz_3_s-17_teacher.png")
        );
        assert_eq!(OutputTag::new("", "../x").stem(), "template____x");
    }

    #[test]
    fn test_output_paths_differ_per_template_and_student() {
        let dir = Path::new("/out");
        let sheet = Path::new("/t1/teacher_key.png");
        let a = OutputTag::from_paths(Path::new("/t1/template.png"), sheet);
        let b = OutputTag::from_paths(Path::new("/t2/quiz.png"), sheet);
        assert_ne!(
            output_path_for(dir, &a, SheetRole::Teacher, sheet),
            output_path_for(dir, &b, SheetRole::Teacher, sheet)
        );

        let upload = Path::new("/tmp/req1/student/student_sheet.png");
        let first = OutputTag::new("template", "alice");
        let second = OutputTag::new("template", "bob");
        assert_ne!(
            output_path_for(dir, &first, SheetRole::Student, upload),
            output_path_for(dir, &second, SheetRole::Student, upload)
        );
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("Teacher".parse::<SheetRole>().unwrap(), SheetRole::Teacher);
        assert_eq!(SheetRole::Student.to_string(), "student");
        assert!("parent".parse::<SheetRole>().is_err());
    }

    #[test]
    fn test_recovers_translation() {
        let template = page(200, 200, (0, 0));
        let sheet = page(200, 200, (6, 4));

        let aligned = engine(AlignmentConfig::default()).align_images(&template, &sheet).unwrap();
        let r = &aligned.result;

        assert!(r.success);
        assert!(r.confidence_score >= 0.5);
        assert!(r.matches.inliers <= r.matches.filtered && r.matches.filtered <= r.matches.total);
        // Sheet pixel (x, y) shows template content at (x + 6, y + 4)
        assert_abs_diff_eq!(r.transform_matrix[0][2], 6.0, epsilon = 1.5);
        assert_abs_diff_eq!(r.transform_matrix[1][2], 4.0, epsilon = 1.5);
        assert_abs_diff_eq!(r.transform_matrix[0][0], 1.0, epsilon = 0.02);
        assert_abs_diff_eq!(r.transform_matrix[1][1], 1.0, epsilon = 0.02);
        assert_eq!(aligned.image.dimensions(), template.dimensions());
    }

    #[test]
    fn test_unreachable_minimum_is_rejected() {
        let template = page(200, 200, (0, 0));
        let sheet = page(200, 200, (6, 4));
        let config = AlignmentConfig { min_confidence: 1.01, ..AlignmentConfig::default() };

        match engine(config).align_images(&template, &sheet) {
            Err(AlignError::LowConfidence { minimum, .. }) => assert_eq!(minimum, 1.01),
            other => panic!("expected LowConfidence, got {other:?}"),
        }
    }

    #[test]
    fn test_solid_template_fails_detection() {
        let template = GrayImage::from_pixel(200, 200, Luma([250]));
        let sheet = page(200, 200, (0, 0));
        match engine(AlignmentConfig::default()).align_images(&template, &sheet) {
            Err(AlignError::FeatureDetection { image }) => assert_eq!(image, "template"),
            other => panic!("expected FeatureDetection, got {other:?}"),
        }
    }

    #[test]
    fn test_align_writes_image() {
        let dir = tempfile::tempdir().unwrap();
        let template_path = dir.path().join("template.png");
        let sheet_path = dir.path().join("student_001.png");
        page(200, 200, (0, 0)).save(&template_path).unwrap();
        page(200, 200, (6, 4)).save(&sheet_path).unwrap();

        let config = AlignmentConfig {
            output_dir: dir.path().join("out"),
            write_overlay: true,
            ..AlignmentConfig::default()
        };
        let result = engine(config).align(&template_path, &sheet_path, SheetRole::Student).unwrap();

        let expected = dir.path().join("out").join("aligned_template_student_001_student.png");
        assert_eq!(result.aligned_image_path.as_deref(), Some(expected.as_path()));
        assert!(expected.exists());
        assert!(dir.path().join("out").join("keypoints_template_student_001_student.png").exists());
        assert_eq!(image::open(&expected).unwrap().to_luma8().dimensions(), (200, 200));
    }

    #[test]
    fn test_missing_file_is_image_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.png");
        let err = engine(AlignmentConfig::default())
            .align(&missing, &missing, SheetRole::Teacher)
            .unwrap_err();
        assert!(matches!(err, AlignError::ImageLoad { .. }));
    }
}
