use std::path::Path;

use grade_core::Keypoint;
use image::{DynamicImage, GrayImage, Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_circle_mut;

use crate::error::{AlignError, AlignResult};

/// RGBA copy of `image` with a red circle on every keypoint
pub fn draw_keypoints(image: &GrayImage, keypoints: &[Keypoint]) -> RgbaImage {
    let mut output: RgbaImage = DynamicImage::ImageLuma8(image.clone()).into_rgba8();
    for kp in keypoints {
        let radius = (3.0 * kp.scale).round().max(3.0) as i32;
        draw_hollow_circle_mut(&mut output, (kp.x as i32, kp.y as i32), radius, Rgba([255, 0, 0, 255]));
    }
    output
}

pub fn save_keypoint_overlay(image: &GrayImage, keypoints: &[Keypoint], path: &Path) -> AlignResult<()> {
    draw_keypoints(image, keypoints)
        .save(path)
        .map_err(|source| AlignError::ImagePersist {
            path: path.to_path_buf(),
            source,
        })
}
