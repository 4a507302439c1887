//! Star bookkeeping: identity, tracked positions, flux, and aperture.

use log::{debug, info};
use ndarray::Array2;

use crate::aperture::ApertureMasks;
use crate::error::{PhotometryError, Result};
use crate::grid::PixelPos;

/// One tracked point source.
///
/// A star owns its aperture masks, its per-frame position history
/// (frame 0 holds the initial detection), its accumulated flux series,
/// and its forbidden-region bookkeeping. Ids are handed out by the
/// [`StarField`] that creates the star and survive resets.
#[derive(Debug, Clone)]
pub struct Star {
    id: usize,
    active: bool,
    init_pos: PixelPos,
    dist_center: f64,
    positions: Vec<PixelPos>,
    aperture: Option<ApertureMasks>,
    flux: Vec<f64>,
    uncertainties: Vec<f64>,
    out_of_bounds: Vec<usize>,
}

impl Star {
    fn new(id: usize, pos: PixelPos, dist_center: f64) -> Self {
        Self {
            id,
            active: true,
            init_pos: pos,
            dist_center,
            positions: vec![pos],
            aperture: None,
            flux: Vec::new(),
            uncertainties: Vec::new(),
            out_of_bounds: Vec::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Exclude this star from flux accumulation for the rest of the run.
    pub fn disable(&mut self) {
        info!("star {} was disabled", self.id);
        self.active = false;
    }

    /// Position recorded for frame 0.
    pub fn initial_position(&self) -> PixelPos {
        self.init_pos
    }

    /// Distance from the initial position to the image center.
    pub fn distance_to_center(&self) -> f64 {
        self.dist_center
    }

    pub fn positions(&self) -> &[PixelPos] {
        &self.positions
    }

    pub fn latest_position(&self) -> PixelPos {
        self.positions[self.positions.len() - 1]
    }

    /// Record the position for `frame`, overwriting a slot an earlier
    /// tracking mode already filled for the same frame.
    pub fn set_position(&mut self, frame: usize, pos: PixelPos) {
        debug_assert!(frame <= self.positions.len());
        if frame < self.positions.len() {
            self.positions[frame] = pos;
        } else {
            self.positions.push(pos);
        }
    }

    /// Replace the initial detection, discarding any tracked history.
    ///
    /// Used when a second initial-detection source overrides the
    /// image-based positions.
    pub fn override_initial_position(&mut self, pos: PixelPos, dist_center: f64) {
        self.init_pos = pos;
        self.dist_center = dist_center;
        self.positions = vec![pos];
    }

    /// Attach the frame-0 aperture mask.
    pub fn set_aperture(
        &mut self,
        mask: Array2<bool>,
        factor: f64,
        grid_scale: f64,
        low_memory: bool,
    ) -> Result<()> {
        debug!("star {} - attaching initial mask", self.id);
        self.aperture = Some(ApertureMasks::new(mask, factor, grid_scale, low_memory)?);
        Ok(())
    }

    pub fn aperture(&self) -> Option<&ApertureMasks> {
        self.aperture.as_ref()
    }

    /// Translate the aperture to this star's position for `frame`,
    /// using the cumulative displacement from the initial position.
    pub fn shift_aperture(&mut self, frame: usize) -> Result<()> {
        if frame == 0 {
            return Ok(());
        }
        let latest = self.latest_position();
        let d_row = (latest.row - self.init_pos.row).round() as i64;
        let d_col = (latest.col - self.init_pos.col).round() as i64;
        let aperture = self
            .aperture
            .as_mut()
            .ok_or_else(|| PhotometryError::FrameData(format!("star {} has no aperture", self.id)))?;
        aperture.shift_to(d_row, d_col, frame);
        Ok(())
    }

    /// Latest aperture mask, failing if no aperture was attached.
    pub fn latest_mask(&self) -> Result<&Array2<bool>> {
        self.aperture
            .as_ref()
            .map(|a| a.latest())
            .ok_or_else(|| PhotometryError::FrameData(format!("star {} has no aperture", self.id)))
    }

    pub fn record_flux(&mut self, value: f64) {
        self.flux.push(value);
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn record_uncertainty(&mut self, value: f64) {
        self.uncertainties.push(value);
    }

    pub fn uncertainties(&self) -> &[f64] {
        &self.uncertainties
    }

    /// Tally a frame in which the aperture overlapped invalid pixels.
    pub fn record_out_of_bounds(&mut self, frame: usize) {
        self.out_of_bounds.push(frame);
    }

    pub fn out_of_bounds_count(&self) -> usize {
        self.out_of_bounds.len()
    }

    pub fn out_of_bounds_frames(&self) -> &[usize] {
        &self.out_of_bounds
    }

    pub fn is_out_of_bounds(&self) -> bool {
        !self.out_of_bounds.is_empty()
    }

    /// Clear positions, flux, masks, and overlap bookkeeping, keeping
    /// the id and the active flag, so the star can be run again from
    /// frame 0.
    pub fn reset(&mut self) {
        self.positions = vec![self.init_pos];
        self.aperture = None;
        self.flux.clear();
        self.uncertainties.clear();
        self.out_of_bounds.clear();
    }
}

/// Owning collection of a run's stars.
///
/// Assigns sequential ids starting at 0; star 0 is always the primary
/// (innermost) star. The id counter belongs to the field, so a fresh
/// run starts from a fresh counter with no global state involved.
#[derive(Debug, Clone, Default)]
pub struct StarField {
    stars: Vec<Star>,
    next_id: usize,
}

impl StarField {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new star and return its id.
    pub fn add(&mut self, pos: PixelPos, dist_center: f64) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.stars.push(Star::new(id, pos, dist_center));
        id
    }

    pub fn len(&self) -> usize {
        self.stars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stars.is_empty()
    }

    pub fn stars(&self) -> &[Star] {
        &self.stars
    }

    pub fn get(&self, id: usize) -> Option<&Star> {
        self.stars.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Star> {
        self.stars.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Star> {
        self.stars.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Star> {
        self.stars.iter_mut()
    }

    pub fn disable(&mut self, id: usize) {
        if let Some(star) = self.stars.get_mut(id) {
            star.disable();
        }
    }

    /// Drop every secondary star, keeping the primary and rewinding the
    /// id counter so replacements number from 1 again.
    pub fn retain_primary(&mut self) {
        self.stars.truncate(1);
        self.next_id = self.stars.len();
    }

    pub fn reset_all(&mut self) {
        for star in &mut self.stars {
            star.reset();
        }
    }
}
