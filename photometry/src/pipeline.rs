//! End-to-end photometric run: build apertures, track, accumulate flux.

use log::{error, info, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::aperture::{circular, shape};
use crate::config::{ApertureRule, Factor, InitialDetection, RunConfig};
use crate::detect::{self, CatalogStar};
use crate::error::{PhotometryError, Result};
use crate::frame::FrameSet;
use crate::grid::PixelPos;
use crate::star::StarField;
use crate::track::Tracker;
use crate::validator;

/// Calibration inputs for per-frame flux uncertainties.
///
/// All series are per frame, quoted per reference-grid pixel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UncertaintyParams {
    /// Background electrons.
    pub background: Vec<f64>,
    /// Dark-current electrons.
    pub dark: Vec<f64>,
    /// Read noise RMS in electrons.
    pub read_noise: Vec<f64>,
    /// Number of co-added exposures per frame.
    pub stack_count: f64,
}

/// Per-star results of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StarSummary {
    pub id: usize,
    pub active: bool,
    pub flux: Vec<f64>,
    pub positions: Vec<PixelPos>,
    pub uncertainties: Vec<f64>,
    pub out_of_bounds_frames: Vec<usize>,
    pub mask_pixels: usize,
    pub factor: f64,
}

/// Results of a completed run, for downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub stars: Vec<StarSummary>,
}

/// One full photometric pass over a frame sequence.
///
/// `prepare` seeds the stars and builds their frame-0 apertures;
/// `process` walks the frames, shifting each star's aperture to its
/// tracked position, accumulating flux, checking the forbidden region,
/// and predicting the next positions. Any hard error flips the abort
/// flag and leaves the run unusable.
pub struct PhotometryRun<'a> {
    config: &'a RunConfig,
    frames: &'a FrameSet,
    uncertainty: Option<&'a UncertaintyParams>,
    field: StarField,
    aborted: bool,
}

impl<'a> PhotometryRun<'a> {
    pub fn new(config: &'a RunConfig, frames: &'a FrameSet) -> Self {
        Self {
            config,
            frames,
            uncertainty: None,
            field: StarField::new(),
            aborted: false,
        }
    }

    /// Enable per-frame uncertainty estimation.
    pub fn with_uncertainties(mut self, params: &'a UncertaintyParams) -> Self {
        self.uncertainty = Some(params);
        self
    }

    /// Seed stars and build their frame-0 apertures.
    pub fn prepare(&mut self, factor: &Factor, catalog: Option<&[CatalogStar]>) -> Result<()> {
        match self.try_prepare(factor, catalog) {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("aperture preparation failed: {e}");
                self.aborted = true;
                Err(e)
            }
        }
    }

    fn try_prepare(&mut self, factor: &Factor, catalog: Option<&[CatalogStar]>) -> Result<()> {
        let mut field = detect::detect_initial_stars(self.frames, self.config.repeat_removal)?;

        if self.config.initial_detection.uses(&InitialDetection::Catalog) {
            let catalog = catalog.ok_or_else(|| {
                PhotometryError::InvalidConfig(
                    "catalog initial detection selected but no catalog supplied".into(),
                )
            })?;
            detect::apply_catalog_positions(
                &mut field,
                catalog,
                self.frames,
                &self.config.initial_detection,
            )?;
        }

        let image = self.frames.image(0);
        let scale = self.frames.grid_scale();

        let circle_owned = self
            .config
            .aperture
            .owned_ids(&ApertureRule::Circle, field.len());
        let mut masks = circular::circular_masks(image.dim(), field.stars(), factor, &circle_owned);

        let shape_owned = self
            .config
            .aperture
            .owned_ids(&ApertureRule::Shape, field.len());
        if !shape_owned.is_empty() {
            masks.extend(shape::shape_masks(
                &image,
                field.stars(),
                factor,
                scale,
                self.config.repeat_removal,
                &shape_owned,
            )?);
        }

        for (id, mask) in masks {
            if let Some(star) = field.get_mut(id) {
                star.set_aperture(mask, factor.for_star(id), scale, self.config.low_memory)?;
            }
        }

        self.field = field;
        Ok(())
    }

    /// Exclude a star from flux accumulation (optimizer cost avoidance).
    pub fn disable_star(&mut self, id: usize) {
        self.field.disable(id);
    }

    /// Process every frame in order.
    pub fn process(&mut self) -> Result<()> {
        match self.try_process() {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("photometric pass failed: {e}");
                self.aborted = true;
                Err(e)
            }
        }
    }

    fn try_process(&mut self) -> Result<()> {
        if self.aborted {
            return Err(PhotometryError::FrameData(
                "run was aborted by an earlier error".into(),
            ));
        }

        let tracker = Tracker::new(self.config);
        for index in 0..self.frames.len() {
            let image = self.frames.image(index);

            for star in self.field.iter_mut() {
                if !star.is_active() {
                    continue;
                }
                star.shift_aperture(index)?;
                let flux = masked_flux(star.latest_mask()?, &image);
                star.record_flux(flux);

                if let Some(params) = self.uncertainty {
                    let npix = star
                        .aperture()
                        .map(|a| a.normalized_pixel_count())
                        .unwrap_or(0.0);
                    let ron = params.read_noise.get(index).copied().unwrap_or(0.0);
                    let background = params.background.get(index).copied().unwrap_or(0.0);
                    let dark = params.dark.get(index).copied().unwrap_or(0.0);
                    let variance = flux
                        + background * npix
                        + npix * params.stack_count * ron * ron
                        + dark * npix;
                    star.record_uncertainty(variance.max(0.0).sqrt());
                }
            }

            validator::check_forbidden_overlap(&mut self.field, self.frames.forbidden(), index);
            tracker.advance(self.frames, &mut self.field, index)?;
        }

        for star in self.field.iter() {
            if star.is_out_of_bounds() {
                warn!(
                    "star {} overlapped the forbidden region in {} frames",
                    star.id(),
                    star.out_of_bounds_count()
                );
            }
        }
        info!("processed {} frames for {} stars", self.frames.len(), self.field.len());
        Ok(())
    }

    /// Prepare and process in one call.
    pub fn execute(&mut self, factor: &Factor, catalog: Option<&[CatalogStar]>) -> Result<()> {
        self.prepare(factor, catalog)?;
        self.process()
    }

    /// Whether a hard error aborted this run.
    pub fn aborted(&self) -> bool {
        self.aborted
    }

    pub fn stars(&self) -> &StarField {
        &self.field
    }

    pub fn into_field(self) -> StarField {
        self.field
    }

    /// Snapshot the per-star outputs.
    pub fn summary(&self) -> RunSummary {
        let stars = self
            .field
            .iter()
            .map(|star| StarSummary {
                id: star.id(),
                active: star.is_active(),
                flux: star.flux().to_vec(),
                positions: star.positions().to_vec(),
                uncertainties: star.uncertainties().to_vec(),
                out_of_bounds_frames: star.out_of_bounds_frames().to_vec(),
                mask_pixels: star.aperture().map(|a| a.pixel_count()).unwrap_or(0),
                factor: star.aperture().map(|a| a.factor()).unwrap_or(0.0),
            })
            .collect();
        RunSummary { stars }
    }
}

/// Sum of image values under the mask, ignoring non-finite pixels.
fn masked_flux(mask: &Array2<bool>, image: &Array2<f64>) -> f64 {
    mask.iter()
        .zip(image.iter())
        .filter(|(&masked, &value)| masked && value.is_finite())
        .map(|(_, &value)| value)
        .sum()
}
