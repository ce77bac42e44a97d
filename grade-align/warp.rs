use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use nalgebra::Matrix3;

use crate::error::{AlignError, AlignResult};

/// Resample `sheet` into a `width`×`height` canvas in template coordinates.
///
/// `transform` maps sheet pixels onto template pixels. Pixels with no
/// source are black.
pub fn warp_to_template(sheet: &GrayImage, transform: &Matrix3<f64>, width: u32, height: u32) -> AlignResult<GrayImage> {
    let t = transform;
    let matrix = [
        t[(0, 0)] as f32, t[(0, 1)] as f32, t[(0, 2)] as f32,
        t[(1, 0)] as f32, t[(1, 1)] as f32, t[(1, 2)] as f32,
        t[(2, 0)] as f32, t[(2, 1)] as f32, t[(2, 2)] as f32,
    ];
    let projection = Projection::from_matrix(matrix)
        .ok_or_else(|| AlignError::HomographyComputation("transform is not invertible".into()))?;

    let mut out = GrayImage::new(width, height);
    warp_into(sheet, &projection, Interpolation::Bilinear, Luma([0]), &mut out);
    Ok(out)
}
