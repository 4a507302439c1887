//! Per-frame position tracking.
//!
//! After frame `i` is measured, the tracker predicts every star's
//! position on frame `i + 1`. Up to three strategies run in a fixed
//! order (static rotation, re-detection, external offsets); each role
//! is served by the strategy the configuration assigns it, and a
//! later strategy overwrites the slot an earlier one filled for stars
//! it owns. There is no terminal state: the tracker simply stops being
//! invoked after the last frame, and a fresh run re-seeds from frame 0.

pub mod rotation;

use log::warn;

use crate::aperture::shape;
use crate::config::{RunConfig, TrackingMode, ZeroRegionPolicy};
use crate::error::{PhotometryError, Result};
use crate::frame::FrameSet;
use crate::grid::{self, PixelPos};
use crate::star::StarField;

/// Roll rate (degrees per minute) assumed when the stored roll-angle
/// difference is not finite.
const FALLBACK_ROLL_RATE: f64 = 3.6;

const MINUTES_PER_DAY: f64 = 24.0 * 60.0;

/// Per-run position tracker.
pub struct Tracker<'a> {
    config: &'a RunConfig,
}

impl<'a> Tracker<'a> {
    pub fn new(config: &'a RunConfig) -> Self {
        Self { config }
    }

    /// Predict positions for frame `index + 1`. A no-op on the last
    /// frame.
    pub fn advance(&self, frames: &FrameSet, field: &mut StarField, index: usize) -> Result<()> {
        if index + 1 >= frames.len() {
            return Ok(());
        }
        self.static_step(frames, field, index);
        self.redetect_step(frames, field, index)?;
        self.offsets_step(frames, field, index)?;
        Ok(())
    }

    /// Rotate the frame-0 position by the roll accumulated since frame 0.
    fn static_step(&self, frames: &FrameSet, field: &mut StarField, index: usize) {
        let owned = self
            .config
            .tracking
            .owned_ids(&TrackingMode::Static, field.len());
        if owned.is_empty() {
            return;
        }

        let angle = (frames.roll_angle(index + 1) - frames.roll_angle(0)).to_radians();
        let rot = rotation::clockwise(angle);
        let center = frames.center();

        for id in owned {
            if let Some(star) = field.get_mut(id) {
                let pos = rotation::rotate_about(&rot, star.initial_position(), center);
                star.set_position(index + 1, pos);
            }
        }
    }

    /// Rotation-predicted position of every star for frame `index + 1`,
    /// from its latest position through the frame-to-frame roll delta.
    fn predictions(&self, frames: &FrameSet, field: &StarField, index: usize) -> Vec<PixelPos> {
        let mut delta = frames.roll_angle(index + 1) - frames.roll_angle(index);
        if !delta.is_finite() {
            let gap_minutes = (frames.timestamp(index + 1) - frames.timestamp(index)) * MINUTES_PER_DAY;
            delta = FALLBACK_ROLL_RATE * gap_minutes;
            warn!(
                "roll angle missing for frame {}; assuming {:.3} deg from the timestamp gap",
                index + 1,
                delta
            );
        }

        let rot = rotation::clockwise(delta.to_radians());
        let center = frames.center();
        field
            .iter()
            .map(|star| rotation::rotate_about(&rot, star.latest_position(), center))
            .collect()
    }

    /// Re-detect bright regions on the next frame and match their
    /// centroids against the rotation-predicted positions.
    ///
    /// Matched stars adopt the detected centroid; unmatched stars keep
    /// their prediction. When no region is found at all, the configured
    /// zero-region policy decides which prediction each star falls back
    /// to.
    fn redetect_step(&self, frames: &FrameSet, field: &mut StarField, index: usize) -> Result<()> {
        let owned = self
            .config
            .tracking
            .owned_ids(&TrackingMode::Redetect, field.len());
        if owned.is_empty() {
            return Ok(());
        }

        let predictions = self.predictions(frames, field, index);
        let image = frames.image(index + 1);
        let scale = frames.grid_scale();
        let regions = shape::extract_with_peeling(&image, scale, self.config.repeat_removal)?;

        if regions.is_empty() {
            warn!(
                "no bright regions found in frame {}; shifting masks by prediction",
                index + 1
            );
            for &id in &owned {
                let pos = match self.config.zero_region_policy {
                    ZeroRegionPolicy::OwnPrediction => predictions[id],
                    ZeroRegionPolicy::PrimaryPrediction => predictions[0],
                };
                if let Some(star) = field.get_mut(id) {
                    star.set_position(index + 1, pos);
                }
            }
            return Ok(());
        }

        let tolerance = self.config.match_tolerance_px * scale;
        let mut available: Vec<(usize, PixelPos)> =
            predictions.iter().copied().enumerate().collect();
        let mut adopted: Vec<Option<PixelPos>> = vec![None; field.len()];

        // every detected centroid consumes the first prediction it sits
        // within tolerance of, so two stars cannot claim one region
        for region in &regions {
            let centroid = region.centroid;
            let slot = available.iter().position(|(_, pred)| {
                (pred.row - centroid.row).abs() <= tolerance
                    && (pred.col - centroid.col).abs() <= tolerance
            });
            if let Some(slot) = slot {
                let (id, _) = available.remove(slot);
                adopted[id] = Some(centroid);
            }
        }

        for &id in &owned {
            let pos = adopted[id].unwrap_or(predictions[id]);
            if let Some(star) = field.get_mut(id) {
                star.set_position(index + 1, pos);
            }
        }
        Ok(())
    }

    /// Drive the primary star from the external centroid series and
    /// propagate its whole-field drift to the secondaries.
    fn offsets_step(&self, frames: &FrameSet, field: &mut StarField, index: usize) -> Result<()> {
        let primary_owned = self.config.tracking.primary == TrackingMode::Offsets;
        let secondary_owned = self.config.tracking.secondary == TrackingMode::Offsets;
        if !primary_owned && !secondary_owned {
            return Ok(());
        }

        let offsets = frames.offsets();
        if offsets.len() != frames.len() {
            return Err(PhotometryError::FrameData(
                "offset tracking requires a centroid series covering every frame".into(),
            ));
        }
        let intended = frames.intended_loc().ok_or_else(|| {
            PhotometryError::FrameData("offset tracking requires the intended location".into())
        })?;

        let scale = frames.grid_scale();
        let (rows, cols) = frames.base_shape();

        // displacement of the field since frame 0, in working-grid pixels
        let displacement = if primary_owned {
            let next = offsets[index + 1];
            let central = PixelPos::new(
                (next.y - intended.y) + (rows / 2) as f64,
                (next.x - intended.x) + (cols / 2) as f64,
            );
            let central = grid::scale_position(central, frames.grid());
            let first = match field.get(0) {
                Some(primary) => primary.initial_position(),
                None => return Ok(()),
            };
            if let Some(primary) = field.get_mut(0) {
                primary.set_position(index + 1, central);
            }
            central - first
        } else {
            let next = offsets[index + 1];
            let first = offsets[0];
            PixelPos::new((next.y - first.y) * scale, (next.x - first.x) * scale)
        };

        if secondary_owned {
            let angle = (frames.roll_angle(index + 1) - frames.roll_angle(0)).to_radians();
            let rot = rotation::clockwise(angle);
            let center = frames.center();
            for id in 1..field.len() {
                if let Some(star) = field.get_mut(id) {
                    let rotated = rotation::rotate_about(&rot, star.initial_position(), center);
                    star.set_position(index + 1, rotated + displacement);
                }
            }
        }
        Ok(())
    }
}
