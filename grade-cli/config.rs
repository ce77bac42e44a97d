use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use grade_align::{AlignmentConfig, HomographyConfig, MatchConfig};
use grade_core::FeatureConfig;
use grade_eval::{ScoringPolicy, SheetLayout};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid TOML config: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("failed to serialise TOML config: {0}")]
    TomlWrite(#[from] toml::ser::Error),
    #[error("unsupported config format '{0}' (expected json or toml)")]
    UnsupportedFormat(String),
    #[error("unknown preset '{0}' (expected default, fast or precise)")]
    UnknownPreset(String),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Format implied by the file extension
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        ext.parse()
    }
}

impl FromStr for ConfigFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ConfigFormat::Json),
            "toml" => Ok(ConfigFormat::Toml),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Default,
    Fast,
    Precise,
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(Preset::Default),
            "fast" => Ok(Preset::Fast),
            "precise" => Ok(Preset::Precise),
            other => Err(ConfigError::UnknownPreset(other.to_string())),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Preset::Default => "default",
            Preset::Fast => "fast",
            Preset::Precise => "precise",
        })
    }
}

/// How handwritten spans map onto answer fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Declared answer slots; without one answers are classified by content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<SheetLayout>,
}

/// Complete grader configuration with every stage's settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraderConfig {
    /// Where answer, report and insights JSON are written
    pub output_dir: PathBuf,
    /// Marks per question when building a key from a teacher sheet
    pub default_marks: f64,
    pub detector: FeatureConfig,
    pub matching: MatchConfig,
    pub homography: HomographyConfig,
    pub alignment: AlignmentConfig,
    pub scoring: ScoringPolicy,
    pub extraction: ExtractionConfig,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            default_marks: 1.0,
            detector: FeatureConfig::default(),
            matching: MatchConfig::default(),
            homography: HomographyConfig::default(),
            alignment: AlignmentConfig::default(),
            scoring: ScoringPolicy::default(),
            extraction: ExtractionConfig::default(),
        }
    }
}

impl GraderConfig {
    pub fn preset(preset: Preset) -> Self {
        match preset {
            Preset::Default => Self::default(),
            Preset::Fast => Self::fast_preset(),
            Preset::Precise => Self::precise_preset(),
        }
    }

    /// Fewer features and pyramid levels, shorter RANSAC
    pub fn fast_preset() -> Self {
        let base = Self::default();
        Self {
            detector: FeatureConfig {
                threshold: 30,
                max_features: 1500,
                n_levels: 4,
                nms_distance: 5.0,
                ..base.detector
            },
            homography: HomographyConfig {
                max_iters: 500,
                ..base.homography
            },
            ..base
        }
    }

    /// More features and a lower FAST threshold for faint or skewed scans
    pub fn precise_preset() -> Self {
        let base = Self::default();
        Self {
            detector: FeatureConfig {
                threshold: 12,
                max_features: 10_000,
                n_levels: 8,
                nms_distance: 2.0,
                ..base.detector
            },
            homography: HomographyConfig {
                reprojection_threshold: 3.0,
                max_iters: 5000,
                ..base.homography
            },
            ..base
        }
    }

    /// Human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "GraderConfig: threshold={}, max_features={}, levels={}, max_distance={}, ransac_px={:.1}, min_confidence={:.2}, credit=[full>={:.2}, partial>={:.2}], output={}",
            self.detector.threshold,
            self.detector.max_features,
            self.detector.n_levels,
            self.matching.max_distance,
            self.homography.reprojection_threshold,
            self.alignment.min_confidence,
            self.scoring.full_credit_threshold,
            self.scoring.partial_credit_threshold,
            self.output_dir.display()
        )
    }

    /// Validate parameter ranges
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |field, reason: String| Err(ConfigError::Invalid { field, reason });

        let d = &self.detector;
        if d.threshold == 0 || d.threshold > 127 {
            return invalid("detector.threshold", format!("{} (must be 1-127)", d.threshold));
        }
        if d.patch_size < 3 || d.patch_size % 2 == 0 {
            return invalid("detector.patch_size", format!("{} (must be odd and at least 3)", d.patch_size));
        }
        if d.n_levels == 0 {
            return invalid("detector.n_levels", "must be at least 1".to_string());
        }
        if d.n_levels > 1 && d.scale_factor <= 1.0 {
            return invalid("detector.scale_factor", format!("{} (must be > 1)", d.scale_factor));
        }
        if d.max_features == 0 {
            return invalid("detector.max_features", "must be at least 1".to_string());
        }

        if self.matching.min_matches < 4 {
            return invalid(
                "matching.min_matches",
                format!("{} (a homography needs at least 4)", self.matching.min_matches),
            );
        }

        let h = &self.homography;
        if !(h.reprojection_threshold > 0.0) {
            return invalid("homography.reprojection_threshold", format!("{} (must be > 0)", h.reprojection_threshold));
        }
        if h.max_iters == 0 {
            return invalid("homography.max_iters", "must be at least 1".to_string());
        }

        let min_confidence = self.alignment.min_confidence;
        if !(0.0..=1.0).contains(&min_confidence) {
            return invalid("alignment.min_confidence", format!("{min_confidence} (must be in [0, 1])"));
        }

        let s = &self.scoring;
        if !(0.0 <= s.partial_credit_threshold
            && s.partial_credit_threshold <= s.full_credit_threshold
            && s.full_credit_threshold <= 1.0)
        {
            return invalid(
                "scoring thresholds",
                format!(
                    "partial {} / full {} (need 0 <= partial <= full <= 1)",
                    s.partial_credit_threshold, s.full_credit_threshold
                ),
            );
        }
        if !(0.0..=1.0).contains(&s.partial_fraction) {
            return invalid("scoring.partial_fraction", format!("{} (must be in [0, 1])", s.partial_fraction));
        }

        if !(self.default_marks.is_finite() && self.default_marks > 0.0) {
            return invalid("default_marks", format!("{} (must be > 0)", self.default_marks));
        }
        Ok(())
    }

    /// Save by file extension (`.json` or `.toml`)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let path = path.as_ref();
        let text = self.to_format(ConfigFormat::from_path(path)?)?;
        fs::write(path, text).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load and validate by file extension (`.json` or `.toml`)
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_format(&content, format)
    }

    pub fn to_format(&self, format: ConfigFormat) -> ConfigResult<String> {
        match format {
            ConfigFormat::Json => self.to_json(),
            ConfigFormat::Toml => self.to_toml(),
        }
    }

    pub fn from_format(content: &str, format: ConfigFormat) -> ConfigResult<Self> {
        match format {
            ConfigFormat::Json => Self::from_json(content),
            ConfigFormat::Toml => Self::from_toml(content),
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML string
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Deserialize from TOML string
    pub fn from_toml(toml_str: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }
}
