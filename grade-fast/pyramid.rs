use grade_core::Image;
use crate::error::{FastError, FastResult};
use crate::types::{PyramidLevel, ScaleLevel};

/// Levels narrower or shorter than this are not generated
pub const MIN_LEVEL_SIZE: usize = 32;

/// Image pyramid operations for multi-scale feature detection
pub struct ImagePyramid;

impl ImagePyramid {
    /// Generate scale levels for image pyramid
    pub fn generate_scale_levels(
        width: usize,
        height: usize,
        n_levels: usize,
        scale_factor: f32,
    ) -> FastResult<Vec<ScaleLevel>> {
        if n_levels == 0 || !(scale_factor > 1.0) || !scale_factor.is_finite() {
            return Err(FastError::InvalidPyramid { n_levels, scale_factor });
        }

        let mut levels = Vec::with_capacity(n_levels);
        let mut current_scale = 1.0f32;

        for level in 0..n_levels {
            let scaled_width = ((width as f32) / current_scale) as usize;
            let scaled_height = ((height as f32) / current_scale) as usize;

            // The base level is always kept; later ones stop once too small
            if level > 0 && (scaled_width < MIN_LEVEL_SIZE || scaled_height < MIN_LEVEL_SIZE) {
                break;
            }

            levels.push(ScaleLevel {
                level,
                scale: current_scale,
                width: scaled_width,
                height: scaled_height,
            });

            current_scale *= scale_factor;
        }

        Ok(levels)
    }

    /// Build image pyramid from base image
    pub fn build_image_pyramid(
        img: &Image,
        width: usize,
        height: usize,
        scale_levels: &[ScaleLevel],
    ) -> Vec<PyramidLevel> {
        scale_levels
            .iter()
            .map(|scale_level| {
                let image = if scale_level.level == 0 {
                    img.clone()
                } else {
                    Self::downsample_image(img, width, height, scale_level)
                };
                PyramidLevel { scale_level: *scale_level, image }
            })
            .collect()
    }

    /// Downsample with bilinear interpolation so that level pixel `x`
    /// samples base pixel `x * scale`
    fn downsample_image(img: &Image, src_width: usize, src_height: usize, level: &ScaleLevel) -> Image {
        let mut downsampled = vec![0u8; level.width * level.height];

        for y in 0..level.height {
            let src_y = y as f32 * level.scale;
            for x in 0..level.width {
                let src_x = x as f32 * level.scale;
                let value = Self::bilinear_sample(img, src_width, src_height, src_x, src_y);
                downsampled[y * level.width + x] = value.round().clamp(0.0, 255.0) as u8;
            }
        }

        downsampled
    }

    /// Sample image at fractional coordinates using bilinear interpolation
    fn bilinear_sample(img: &Image, width: usize, height: usize, x: f32, y: f32) -> f32 {
        let x1 = (x.floor().max(0.0) as usize).min(width - 1);
        let y1 = (y.floor().max(0.0) as usize).min(height - 1);
        let x2 = (x1 + 1).min(width - 1);
        let y2 = (y1 + 1).min(height - 1);

        let fx = (x - x1 as f32).clamp(0.0, 1.0);
        let fy = (y - y1 as f32).clamp(0.0, 1.0);

        let p11 = img[y1 * width + x1] as f32;
        let p12 = img[y1 * width + x2] as f32;
        let p21 = img[y2 * width + x1] as f32;
        let p22 = img[y2 * width + x2] as f32;

        let interpolated_top = p11 * (1.0 - fx) + p12 * fx;
        let interpolated_bottom = p21 * (1.0 - fx) + p22 * fx;

        interpolated_top * (1.0 - fy) + interpolated_bottom * fy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_levels_shrink() {
        let levels = ImagePyramid::generate_scale_levels(640, 480, 8, 1.2).unwrap();
        assert_eq!(levels.len(), 8);
        assert_eq!(levels[0].width, 640);
        assert_eq!(levels[0].scale, 1.0);
        for pair in levels.windows(2) {
            assert!(pair[1].width < pair[0].width);
            assert!(pair[1].scale > pair[0].scale);
        }
    }

    #[test]
    fn test_small_image_keeps_base_level() {
        let levels = ImagePyramid::generate_scale_levels(20, 20, 8, 1.2).unwrap();
        assert_eq!(levels.len(), 1);
    }

    #[test]
    fn test_invalid_pyramid() {
        assert!(ImagePyramid::generate_scale_levels(100, 100, 0, 1.2).is_err());
        assert!(ImagePyramid::generate_scale_levels(100, 100, 4, 1.0).is_err());
        assert!(ImagePyramid::generate_scale_levels(100, 100, 4, f32::NAN).is_err());
    }

    #[test]
    fn test_uniform_image_stays_uniform() {
        let img = vec![77u8; 100 * 80];
        let levels = ImagePyramid::generate_scale_levels(100, 80, 3, 1.5).unwrap();
        let pyramid = ImagePyramid::build_image_pyramid(&img, 100, 80, &levels);
        assert_eq!(pyramid.len(), levels.len());
        for level in &pyramid {
            assert_eq!(level.image.len(), level.scale_level.width * level.scale_level.height);
            assert!(level.image.iter().all(|&p| p == 77));
        }
    }
}
