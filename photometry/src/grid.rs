//! Pixel positions and background-grid scaling.
//!
//! Photometry can run on an upscaled working grid for
//! sub-pixel-equivalent precision: every sensor pixel is replicated
//! `multiplier` times along both axes with its value split evenly
//! across the replicas, so the total flux in any region is preserved.
//! Star positions are quoted against a 200x200 reference grid and map
//! onto the working grid through [`scale_position`].

use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Side length of the reference grid all positions are quoted against.
pub const REFERENCE_GRID: usize = 200;

/// A (possibly sub-pixel) position on an image grid, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPos {
    pub row: f64,
    pub col: f64,
}

impl PixelPos {
    pub fn new(row: f64, col: f64) -> Self {
        Self { row, col }
    }

    /// Nearest integer pixel indices.
    pub fn rounded(&self) -> (i64, i64) {
        (self.row.round() as i64, self.col.round() as i64)
    }

    /// Euclidean distance to another position.
    pub fn distance_to(&self, other: &PixelPos) -> f64 {
        let dr = self.row - other.row;
        let dc = self.col - other.col;
        (dr * dr + dc * dc).sqrt()
    }
}

impl std::ops::Add for PixelPos {
    type Output = PixelPos;

    fn add(self, rhs: PixelPos) -> PixelPos {
        PixelPos::new(self.row + rhs.row, self.col + rhs.col)
    }
}

impl std::ops::Sub for PixelPos {
    type Output = PixelPos;

    fn sub(self, rhs: PixelPos) -> PixelPos {
        PixelPos::new(self.row - rhs.row, self.col - rhs.col)
    }
}

/// Working-grid scale factor for an integer grid multiplier.
///
/// A multiplier of zero is treated as the native grid.
pub fn scale_factor(multiplier: u32) -> f64 {
    multiplier.max(1) as f64
}

/// Map a reference-grid position onto the working grid.
///
/// Each reference pixel becomes a `multiplier` x `multiplier` block on
/// the working grid; the half-block offset lands the position on the
/// block center rather than its corner.
pub fn scale_position(pos: PixelPos, multiplier: u32) -> PixelPos {
    let scale = scale_factor(multiplier);
    let offset = (scale / 2.0).floor();
    PixelPos::new(pos.row * scale + offset, pos.col * scale + offset)
}

/// Working-grid coordinates of the image center.
pub fn grid_center(base_shape: (usize, usize), multiplier: u32) -> PixelPos {
    let center = PixelPos::new((base_shape.0 / 2) as f64, (base_shape.1 / 2) as f64);
    scale_position(center, multiplier)
}

/// Replicate every pixel `multiplier` times per axis, dividing values by
/// `multiplier^2` so total flux is preserved.
pub fn upscale(image: &Array2<f64>, multiplier: u32) -> Array2<f64> {
    let m = multiplier.max(1) as usize;
    if m == 1 {
        return image.clone();
    }
    let (rows, cols) = image.dim();
    let norm = (m * m) as f64;
    Array2::from_shape_fn((rows * m, cols * m), |(r, c)| image[[r / m, c / m]] / norm)
}

/// Replicate a boolean mask onto the working grid (no renormalization).
pub fn upscale_mask(mask: &Array2<bool>, multiplier: u32) -> Array2<bool> {
    let m = multiplier.max(1) as usize;
    if m == 1 {
        return mask.clone();
    }
    let (rows, cols) = mask.dim();
    Array2::from_shape_fn((rows * m, cols * m), |(r, c)| mask[[r / m, c / m]])
}
