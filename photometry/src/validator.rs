//! Forbidden-region overlap checks.

use log::debug;
use ndarray::Array2;

use crate::star::StarField;

/// Record stars whose latest aperture overlaps invalid sensor pixels.
///
/// Non-fatal: an overlap is tallied on the star together with the frame
/// index and only summarized at the end of the run. Flux keeps
/// accumulating; downstream consumers decide what an out-of-bounds
/// series is worth.
pub fn check_forbidden_overlap(field: &mut StarField, forbidden: &Array2<bool>, frame: usize) {
    for star in field.iter_mut() {
        if !star.is_active() {
            continue;
        }
        let overlap = match star.aperture() {
            Some(aperture) => aperture
                .latest()
                .iter()
                .zip(forbidden.iter())
                .any(|(&masked, &invalid)| masked && invalid),
            None => false,
        };
        if overlap {
            debug!("star {} overlaps the forbidden region in frame {}", star.id(), frame);
            star.record_out_of_bounds(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::PixelPos;
    use ndarray::Array2;

    #[test]
    fn test_overlap_recorded_without_halting() {
        let mut forbidden = Array2::from_elem((10, 10), false);
        forbidden[[5, 5]] = true;

        let mut mask = Array2::from_elem((10, 10), false);
        mask[[5, 5]] = true;
        mask[[5, 6]] = true;

        let mut field = StarField::new();
        let id = field.add(PixelPos::new(5.0, 5.0), 0.0);
        field
            .get_mut(id)
            .unwrap()
            .set_aperture(mask, 1.0, 1.0, false)
            .unwrap();

        check_forbidden_overlap(&mut field, &forbidden, 3);
        check_forbidden_overlap(&mut field, &forbidden, 4);

        let star = &field.stars()[0];
        assert_eq!(star.out_of_bounds_count(), 2);
        assert_eq!(star.out_of_bounds_frames(), &[3, 4]);
        assert!(star.is_active());
    }

    #[test]
    fn test_disjoint_mask_is_clean() {
        let mut forbidden = Array2::from_elem((10, 10), false);
        forbidden[[0, 0]] = true;

        let mut mask = Array2::from_elem((10, 10), false);
        mask[[5, 5]] = true;

        let mut field = StarField::new();
        let id = field.add(PixelPos::new(5.0, 5.0), 0.0);
        field
            .get_mut(id)
            .unwrap()
            .set_aperture(mask, 1.0, 1.0, false)
            .unwrap();

        check_forbidden_overlap(&mut field, &forbidden, 0);
        assert!(!field.stars()[0].is_out_of_bounds());
    }

    #[test]
    fn test_inactive_stars_skipped() {
        let mut forbidden = Array2::from_elem((4, 4), false);
        forbidden[[1, 1]] = true;

        let mut mask = Array2::from_elem((4, 4), false);
        mask[[1, 1]] = true;

        let mut field = StarField::new();
        let id = field.add(PixelPos::new(1.0, 1.0), 0.0);
        field
            .get_mut(id)
            .unwrap()
            .set_aperture(mask, 1.0, 1.0, false)
            .unwrap();
        field.disable(id);

        check_forbidden_overlap(&mut field, &forbidden, 0);
        assert!(!field.stars()[0].is_out_of_bounds());
    }
}
