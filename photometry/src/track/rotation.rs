//! Field-rotation matrices.

use nalgebra::{Matrix2, Vector2};

use crate::grid::PixelPos;

/// Clockwise rotation matrix for `angle` radians.
pub fn clockwise(angle: f64) -> Matrix2<f64> {
    let (sin, cos) = angle.sin_cos();
    Matrix2::new(cos, sin, -sin, cos)
}

/// Counter-clockwise rotation matrix for `angle` radians.
pub fn counter_clockwise(angle: f64) -> Matrix2<f64> {
    let (sin, cos) = angle.sin_cos();
    Matrix2::new(cos, -sin, sin, cos)
}

/// Rotate `pos` about `center` with the given matrix.
pub fn rotate_about(matrix: &Matrix2<f64>, pos: PixelPos, center: PixelPos) -> PixelPos {
    let rotated = matrix * Vector2::new(pos.row - center.row, pos.col - center.col);
    PixelPos::new(rotated.x + center.row, rotated.y + center.col)
}
