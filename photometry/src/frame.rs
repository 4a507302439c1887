//! Input frame sequence and working-grid preparation.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{PhotometryError, Result};
use crate::grid::{self, PixelPos};

/// Externally measured centroid location, in native-grid pixel units
/// with `x` along columns and `y` along rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CentroidOffset {
    pub x: f64,
    pub y: f64,
}

impl CentroidOffset {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Time-ordered image sequence with its per-frame metadata.
///
/// Owns the native-resolution image cube, the roll angle (degrees) and
/// timestamp (days) of every frame, the optional externally supplied
/// centroid series, and the frame-0 forbidden-pixel mask. Images are
/// served at working-grid resolution: eagerly cached when memory is
/// plentiful, recomputed per access in low-memory mode so workers never
/// share a mutable cache.
#[derive(Debug, Clone)]
pub struct FrameSet {
    images: Vec<Array2<f64>>,
    upscaled: Option<Vec<Array2<f64>>>,
    roll_angles: Vec<f64>,
    timestamps: Vec<f64>,
    offsets: Vec<CentroidOffset>,
    intended_loc: Option<CentroidOffset>,
    forbidden: Array2<bool>,
    grid: u32,
    low_memory: bool,
    base_shape: (usize, usize),
}

impl FrameSet {
    /// Assemble a frame set.
    ///
    /// The forbidden mask defaults to the NaN pixels of frame 0; an
    /// explicit mask can be attached with [`FrameSet::with_forbidden`].
    pub fn new(
        images: Vec<Array2<f64>>,
        roll_angles: Vec<f64>,
        timestamps: Vec<f64>,
        grid: u32,
        low_memory: bool,
    ) -> Result<Self> {
        if images.is_empty() {
            return Err(PhotometryError::FrameData("no frames provided".into()));
        }
        if images.len() != roll_angles.len() || images.len() != timestamps.len() {
            return Err(PhotometryError::FrameData(format!(
                "{} frames but {} roll angles and {} timestamps",
                images.len(),
                roll_angles.len(),
                timestamps.len()
            )));
        }
        let base_shape = images[0].dim();
        if images.iter().any(|img| img.dim() != base_shape) {
            return Err(PhotometryError::FrameData(
                "frames have inconsistent shapes".into(),
            ));
        }
        let grid = grid.max(1);

        let nan_mask = images[0].mapv(|v| v.is_nan());
        let forbidden = grid::upscale_mask(&nan_mask, grid);

        let upscaled = if low_memory {
            None
        } else {
            Some(images.iter().map(|img| grid::upscale(img, grid)).collect())
        };

        Ok(Self {
            images,
            upscaled,
            roll_angles,
            timestamps,
            offsets: Vec::new(),
            intended_loc: None,
            forbidden,
            grid,
            low_memory,
            base_shape,
        })
    }

    /// Attach the externally supplied centroid series (one entry per
    /// frame) and the intended target location it is measured against.
    pub fn with_offsets(
        mut self,
        offsets: Vec<CentroidOffset>,
        intended_loc: CentroidOffset,
    ) -> Result<Self> {
        if offsets.len() != self.images.len() {
            return Err(PhotometryError::FrameData(format!(
                "{} centroid offsets for {} frames",
                offsets.len(),
                self.images.len()
            )));
        }
        self.offsets = offsets;
        self.intended_loc = Some(intended_loc);
        Ok(self)
    }

    /// Attach an explicit native-grid forbidden mask, replacing the
    /// NaN-derived default.
    pub fn with_forbidden(mut self, mask: Array2<bool>) -> Result<Self> {
        if mask.dim() != self.base_shape {
            return Err(PhotometryError::FrameData(
                "forbidden mask shape does not match frames".into(),
            ));
        }
        self.forbidden = grid::upscale_mask(&mask, self.grid);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Working-grid copy of the given frame.
    pub fn image(&self, index: usize) -> Array2<f64> {
        match &self.upscaled {
            Some(cache) => cache[index].clone(),
            None => grid::upscale(&self.images[index], self.grid),
        }
    }

    /// Roll angle of the frame, in degrees.
    pub fn roll_angle(&self, index: usize) -> f64 {
        self.roll_angles[index]
    }

    /// Timestamp of the frame, in days.
    pub fn timestamp(&self, index: usize) -> f64 {
        self.timestamps[index]
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn offsets(&self) -> &[CentroidOffset] {
        &self.offsets
    }

    pub fn intended_loc(&self) -> Option<CentroidOffset> {
        self.intended_loc
    }

    /// Working-grid forbidden-pixel mask.
    pub fn forbidden(&self) -> &Array2<bool> {
        &self.forbidden
    }

    pub fn grid(&self) -> u32 {
        self.grid
    }

    pub fn grid_scale(&self) -> f64 {
        grid::scale_factor(self.grid)
    }

    pub fn low_memory(&self) -> bool {
        self.low_memory
    }

    /// Native-resolution frame shape.
    pub fn base_shape(&self) -> (usize, usize) {
        self.base_shape
    }

    /// Working-grid coordinates of the image center.
    pub fn center(&self) -> PixelPos {
        grid::grid_center(self.base_shape, self.grid)
    }
}
