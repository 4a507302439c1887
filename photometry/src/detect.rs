//! Initial star detection on the first frame.
//!
//! Stars are seeded either from bright regions detected on frame 0 or
//! from externally catalogued positions, independently per role. The
//! detected set is ordered by distance to the image center, so the
//! closest star always becomes the primary (id 0).

use itertools::Itertools;
use log::{info, warn};

use crate::aperture::shape;
use crate::config::{InitialDetection, RoleConfig};
use crate::error::{PhotometryError, Result};
use crate::frame::FrameSet;
use crate::grid::{self, PixelPos, REFERENCE_GRID};
use crate::star::StarField;

/// Faintest catalog magnitude considered trackable.
const MAGNITUDE_LIMIT: f64 = 13.0;

/// Externally catalogued star position, quoted on the reference grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CatalogStar {
    pub row: f64,
    pub col: f64,
    pub magnitude: f64,
}

/// Detect stars on frame 0 and seed the star collection.
///
/// Region centroids are sorted by distance to the image center before
/// ids are assigned, so the innermost detection becomes the primary.
pub fn detect_initial_stars(frames: &FrameSet, repeat_removal: usize) -> Result<StarField> {
    let image = frames.image(0);
    let scale = frames.grid_scale();
    let center = frames.center();

    let regions = shape::extract_with_peeling(&image, scale, repeat_removal)?;
    let entries: Vec<(PixelPos, f64)> = regions
        .iter()
        .map(|region| (region.centroid, region.centroid.distance_to(&center)))
        .sorted_by(|a, b| a.1.total_cmp(&b.1))
        .collect();

    if entries.is_empty() {
        return Err(PhotometryError::FrameData(
            "no stars detected on frame 0".into(),
        ));
    }

    let mut field = StarField::new();
    for (pos, dist) in entries {
        field.add(pos, dist);
    }
    info!("initial detection found {} stars", field.len());
    Ok(field)
}

/// Override image-detected positions with catalog positions for the
/// roles that select catalog-based initial detection.
///
/// Catalog entries are filtered to trackable magnitudes and to the
/// reference frame bounds, scaled onto the working grid, and assigned
/// to stars in distance order. When the catalog disagrees with the
/// image detection about how many stars are present, the catalog wins:
/// the secondaries are rebuilt from it.
pub fn apply_catalog_positions(
    field: &mut StarField,
    catalog: &[CatalogStar],
    frames: &FrameSet,
    roles: &RoleConfig<InitialDetection>,
) -> Result<()> {
    if !roles.uses(&InitialDetection::Catalog) {
        return Ok(());
    }

    let center = frames.center();
    let reference = REFERENCE_GRID as f64;
    let entries: Vec<(PixelPos, f64)> = catalog
        .iter()
        .filter(|star| star.magnitude <= MAGNITUDE_LIMIT)
        .filter(|star| {
            star.row > 0.0 && star.row < reference && star.col > 0.0 && star.col < reference
        })
        .map(|star| {
            let pos = grid::scale_position(PixelPos::new(star.row, star.col), frames.grid());
            let dist = pos.distance_to(&center);
            (pos, dist)
        })
        .sorted_by(|a, b| a.1.total_cmp(&b.1))
        .collect();

    if entries.is_empty() {
        return Err(PhotometryError::FrameData(
            "catalog contains no usable stars".into(),
        ));
    }

    if entries.len() != field.len() {
        warn!(
            "catalog lists {} stars but image detection found {}; \
             rebuilding secondaries from the catalog",
            entries.len(),
            field.len()
        );
        field.retain_primary();
        if roles.primary == InitialDetection::Catalog {
            if let Some(primary) = field.get_mut(0) {
                primary.override_initial_position(entries[0].0, entries[0].1);
            }
        }
        for (pos, dist) in entries.into_iter().skip(1) {
            field.add(pos, dist);
        }
        return Ok(());
    }

    for (id, (pos, dist)) in entries.into_iter().enumerate() {
        let owned = (id == 0 && roles.primary == InitialDetection::Catalog)
            || (id > 0 && roles.secondary == InitialDetection::Catalog);
        if !owned {
            continue;
        }
        if let Some(star) = field.get_mut(id) {
            star.override_initial_position(pos, dist);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn frame_with_blocks(blocks: &[(usize, usize, f64)]) -> FrameSet {
        let mut image = Array2::<f64>::zeros((60, 60));
        for &(row, col, value) in blocks {
            for r in row - 4..=row + 4 {
                for c in col - 4..=col + 4 {
                    image[[r, c]] = value;
                }
            }
        }
        FrameSet::new(vec![image], vec![0.0], vec![0.0], 1, false).unwrap()
    }

    #[test]
    fn test_closest_detection_becomes_primary() {
        let frames = frame_with_blocks(&[(10, 10, 80.0), (30, 30, 100.0)]);
        let field = detect_initial_stars(&frames, 0).unwrap();

        assert_eq!(field.len(), 2);
        // the block at the center outranks the brighter corner block
        assert_relative_eq!(field.stars()[0].initial_position().row, 30.0);
        assert!(field.stars()[0].distance_to_center() < field.stars()[1].distance_to_center());
    }

    #[test]
    fn test_catalog_overrides_positions() {
        let frames = frame_with_blocks(&[(10, 10, 80.0), (30, 30, 100.0)]);
        let mut field = detect_initial_stars(&frames, 0).unwrap();

        let catalog = vec![
            CatalogStar {
                row: 30.5,
                col: 30.5,
                magnitude: 8.0,
            },
            CatalogStar {
                row: 10.5,
                col: 10.5,
                magnitude: 11.0,
            },
        ];
        let roles = RoleConfig::both(InitialDetection::Catalog);
        apply_catalog_positions(&mut field, &catalog, &frames, &roles).unwrap();

        assert_relative_eq!(field.stars()[0].initial_position().row, 30.5);
        assert_relative_eq!(field.stars()[1].initial_position().col, 10.5);
    }

    #[test]
    fn test_catalog_mismatch_rebuilds_secondaries() {
        let frames = frame_with_blocks(&[(10, 10, 80.0), (30, 30, 100.0)]);
        let mut field = detect_initial_stars(&frames, 0).unwrap();

        let catalog = vec![
            CatalogStar {
                row: 30.0,
                col: 30.0,
                magnitude: 8.0,
            },
            CatalogStar {
                row: 10.0,
                col: 10.0,
                magnitude: 11.0,
            },
            CatalogStar {
                row: 50.0,
                col: 5.0,
                magnitude: 12.0,
            },
        ];
        let roles = RoleConfig {
            primary: InitialDetection::Image,
            secondary: InitialDetection::Catalog,
        };
        apply_catalog_positions(&mut field, &catalog, &frames, &roles).unwrap();

        assert_eq!(field.len(), 3);
        // primary kept its image-based detection
        assert_relative_eq!(field.stars()[0].initial_position().row, 30.0);
        assert_eq!(field.stars()[2].id(), 2);
    }

    #[test]
    fn test_faint_catalog_entries_filtered() {
        let frames = frame_with_blocks(&[(30, 30, 100.0)]);
        let mut field = detect_initial_stars(&frames, 0).unwrap();

        let catalog = vec![
            CatalogStar {
                row: 30.0,
                col: 30.0,
                magnitude: 8.0,
            },
            CatalogStar {
                row: 10.0,
                col: 10.0,
                magnitude: 15.0,
            },
        ];
        let roles = RoleConfig::both(InitialDetection::Catalog);
        apply_catalog_positions(&mut field, &catalog, &frames, &roles).unwrap();

        // the magnitude-15 entry is ignored, leaving a clean 1:1 match
        assert_eq!(field.len(), 1);
    }
}
