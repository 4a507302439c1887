//! Binary mask dilation with boundary clamping.

use ndarray::Array2;

use crate::error::{PhotometryError, Result};

/// Runaway guard on dilation rounds.
const ITERATION_CAP: usize = 1000;

/// Round a fractional layer count derived from a scale factor.
pub fn layers_from(factor: f64) -> usize {
    factor.max(0.0).round() as usize
}

/// Grow a binary mask outward by `layers` one-pixel rings.
///
/// Each round marks, for every set pixel, the pixel itself and its
/// eight neighbors. Offsets that would leave the array are clamped to
/// the nearest edge pixel, so growth never wraps and never exceeds the
/// array bounds; boundary pixels grow inward only.
pub fn grow(mask: &Array2<bool>, layers: usize) -> Result<Array2<bool>> {
    if layers > ITERATION_CAP {
        return Err(PhotometryError::IterationCapExceeded(ITERATION_CAP));
    }
    let mut current = mask.clone();
    for _ in 0..layers {
        current = grow_once(&current);
    }
    Ok(current)
}

fn grow_once(mask: &Array2<bool>) -> Array2<bool> {
    let (rows, cols) = mask.dim();
    let mut next = Array2::from_elem((rows, cols), false);
    for ((r, c), &set) in mask.indexed_iter() {
        if !set {
            continue;
        }
        for dr in -1i64..=1 {
            for dc in -1i64..=1 {
                let nr = (r as i64 + dr).clamp(0, rows as i64 - 1) as usize;
                let nc = (c as i64 + dc).clamp(0, cols as i64 - 1) as usize;
                next[[nr, nc]] = true;
            }
        }
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(mask: &Array2<bool>) -> usize {
        mask.iter().filter(|&&p| p).count()
    }

    #[test]
    fn test_single_layer_growth() {
        let mut mask = Array2::from_elem((7, 7), false);
        mask[[3, 3]] = true;

        let grown = grow(&mask, 1).unwrap();
        assert_eq!(count(&grown), 9);
        assert!(grown[[2, 2]]);
        assert!(grown[[4, 4]]);
        assert!(!grown[[1, 3]]);
    }

    #[test]
    fn test_zero_layers_is_identity() {
        let mut mask = Array2::from_elem((5, 5), false);
        mask[[2, 2]] = true;
        assert_eq!(grow(&mask, 0).unwrap(), mask);
    }

    #[test]
    fn test_growth_is_additive_away_from_boundary() {
        let mut mask = Array2::from_elem((21, 21), false);
        mask[[10, 10]] = true;

        let two_then_three = grow(&grow(&mask, 2).unwrap(), 3).unwrap();
        let five = grow(&mask, 5).unwrap();
        assert_eq!(two_then_three, five);
    }

    #[test]
    fn test_boundary_pixels_grow_inward_only() {
        let mut mask = Array2::from_elem((4, 4), false);
        mask[[0, 0]] = true;

        let grown = grow(&mask, 1).unwrap();
        // corner pixel expands into the 2x2 in-bounds neighborhood only
        assert_eq!(count(&grown), 4);
        assert!(grown[[0, 0]]);
        assert!(grown[[1, 1]]);
    }

    #[test]
    fn test_iteration_cap() {
        let mask = Array2::from_elem((3, 3), false);
        let err = grow(&mask, 1001).unwrap_err();
        assert!(matches!(
            err,
            PhotometryError::IterationCapExceeded(1000)
        ));
    }

    #[test]
    fn test_layers_from_rounds() {
        assert_eq!(layers_from(2.4), 2);
        assert_eq!(layers_from(2.5), 3);
        assert_eq!(layers_from(-1.0), 0);
        assert_eq!(layers_from(7.0 * 3.0), 21);
    }
}
