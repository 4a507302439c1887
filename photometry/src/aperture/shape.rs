//! Bright-region ("shape") apertures.
//!
//! Regions come from normalizing a frame, thresholding it, and labeling
//! 8-connected components; components below a minimum area are
//! discarded as noise. Fainter stars partially blended with a brighter
//! neighbor can be separated by iteratively peeling the brightest
//! region and re-extracting from the residual image.

use std::collections::HashMap;

use log::error;
use ndarray::Array2;

use crate::aperture::dilate;
use crate::config::Factor;
use crate::error::{PhotometryError, Result};
use crate::grid::PixelPos;
use crate::star::Star;

/// Fraction of the frame maximum used as the binarization threshold.
const INTENSITY_THRESHOLD: f64 = 10.0 / 255.0;

/// Minimum region area at reference-grid resolution; scaled by the
/// working-grid factor before use.
const MIN_REGION_AREA: f64 = 50.0;

/// Dilation layers (reference-grid pixels) applied around a peeled
/// region before invalidating its footprint in the residual image.
const PEEL_EXCLUSION_LAYERS: f64 = 7.0;

/// Centroids closer than this (pixels) to an already-peeled region are
/// treated as re-detections of the same region and dropped.
const DEDUP_TOLERANCE: f64 = 15.0;

/// A connected bright region extracted from a frame.
#[derive(Debug, Clone)]
pub struct Region {
    /// Binary footprint of the region.
    pub mask: Array2<bool>,
    /// Intensity-weighted first-moment center of the footprint.
    pub centroid: PixelPos,
    /// Number of pixels in the footprint.
    pub area: usize,
    /// Brightest image value inside the footprint.
    pub peak: f64,
}

/// First-moment center of a binary region.
pub fn centroid_of(mask: &Array2<bool>) -> PixelPos {
    let mut sum_r = 0.0;
    let mut sum_c = 0.0;
    let mut count = 0.0;
    for ((r, c), &set) in mask.indexed_iter() {
        if set {
            sum_r += r as f64;
            sum_c += c as f64;
            count += 1.0;
        }
    }
    if count == 0.0 {
        return PixelPos::new(0.0, 0.0);
    }
    PixelPos::new(sum_r / count, sum_c / count)
}

fn binarize(image: &Array2<f64>) -> Array2<bool> {
    let max = image
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if !(max > 0.0) {
        return Array2::from_elem(image.dim(), false);
    }
    let cutoff = max * INTENSITY_THRESHOLD;
    image.mapv(|v| v.is_finite() && v > cutoff)
}

/// Label 8-connected components of a binary mask.
fn label_components(mask: &Array2<bool>) -> (Array2<u32>, u32) {
    let (rows, cols) = mask.dim();
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut label_counter = 0;

    for r in 0..rows {
        for c in 0..cols {
            if !mask[[r, c]] || labels[[r, c]] != 0 {
                continue;
            }
            label_counter += 1;
            let mut stack = vec![(r, c)];
            while let Some((y, x)) = stack.pop() {
                if labels[[y, x]] != 0 {
                    continue;
                }
                labels[[y, x]] = label_counter;
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        let ny = y as i64 + dy;
                        let nx = x as i64 + dx;
                        if ny < 0 || ny >= rows as i64 || nx < 0 || nx >= cols as i64 {
                            continue;
                        }
                        let (ny, nx) = (ny as usize, nx as usize);
                        if mask[[ny, nx]] && labels[[ny, nx]] == 0 {
                            stack.push((ny, nx));
                        }
                    }
                }
            }
        }
    }

    (labels, label_counter)
}

/// Extract connected bright regions above the minimum area.
pub fn extract_regions(image: &Array2<f64>, grid_scale: f64) -> Vec<Region> {
    let binary = binarize(image);
    let (labels, count) = label_components(&binary);
    let min_area = MIN_REGION_AREA * grid_scale;

    (1..=count)
        .filter_map(|label| {
            let mask = labels.mapv(|l| l == label);
            let area = mask.iter().filter(|&&p| p).count();
            if (area as f64) <= min_area {
                return None;
            }
            let peak = mask
                .indexed_iter()
                .filter(|(_, &set)| set)
                .map(|(idx, _)| image[idx])
                .filter(|v| v.is_finite())
                .fold(f64::NEG_INFINITY, f64::max);
            let centroid = centroid_of(&mask);
            Some(Region {
                mask,
                centroid,
                area,
                peak,
            })
        })
        .collect()
}

/// Extract regions with iterative brightest-region peeling.
///
/// Each pass records the brightest remaining region, then invalidates a
/// dilated footprint around it in the residual image before
/// re-extracting, so a faint neighbor hiding in the skirt of a bright
/// star can surface on a later pass. The final extraction is deduped
/// against the peeled regions by centroid proximity.
pub fn extract_with_peeling(
    image: &Array2<f64>,
    grid_scale: f64,
    repeat_removal: usize,
) -> Result<Vec<Region>> {
    let mut residual = image.clone();
    let mut kept: Vec<Region> = Vec::new();

    for _ in 0..repeat_removal {
        let mut regions = extract_regions(&residual, grid_scale);
        if regions.is_empty() {
            break;
        }
        regions.sort_by(|a, b| b.peak.total_cmp(&a.peak));
        let brightest = regions.swap_remove(0);

        let exclusion = dilate::grow(
            &brightest.mask,
            dilate::layers_from(PEEL_EXCLUSION_LAYERS * grid_scale),
        )?;
        for ((r, c), &cut) in exclusion.indexed_iter() {
            if cut {
                residual[[r, c]] = f64::NAN;
            }
        }
        kept.push(brightest);
    }

    for region in extract_regions(&residual, grid_scale) {
        let duplicate = kept.iter().any(|k| {
            (k.centroid.row - region.centroid.row).abs() <= DEDUP_TOLERANCE
                && (k.centroid.col - region.centroid.col).abs() <= DEDUP_TOLERANCE
        });
        if !duplicate {
            kept.push(region);
        }
    }

    Ok(kept)
}

/// Frame-0 shape apertures for the stars owned by the shape rule.
///
/// Region extraction must find exactly one region per registered star,
/// and every owned star must sit inside one of them; anything else
/// aborts the run before any mask is attached.
pub fn shape_masks(
    image: &Array2<f64>,
    stars: &[Star],
    factor: &Factor,
    grid_scale: f64,
    repeat_removal: usize,
    owned: &[usize],
) -> Result<HashMap<usize, Array2<bool>>> {
    let regions = extract_with_peeling(image, grid_scale, repeat_removal)?;
    if regions.len() != stars.len() {
        error!(
            "bright-region count {} does not match star count {}",
            regions.len(),
            stars.len()
        );
        return Err(PhotometryError::DetectionMismatch {
            regions: regions.len(),
            stars: stars.len(),
        });
    }

    let mut masks = HashMap::new();
    for &id in owned {
        let (row, col) = stars[id].initial_position().rounded();
        let region = regions
            .iter()
            .find(|reg| {
                let (rows, cols) = reg.mask.dim();
                row >= 0
                    && col >= 0
                    && (row as usize) < rows
                    && (col as usize) < cols
                    && reg.mask[[row as usize, col as usize]]
            })
            .ok_or(PhotometryError::UnmatchedStar(id))?;

        let layers = dilate::layers_from(factor.for_star(id));
        masks.insert(id, dilate::grow(&region.mask, layers)?);
    }
    Ok(masks)
}
