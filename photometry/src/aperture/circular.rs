//! Fixed-radius circular apertures.

use std::collections::HashMap;

use ndarray::Array2;

use crate::config::Factor;
use crate::grid::PixelPos;
use crate::star::Star;

/// Build a circular mask containing every pixel whose squared distance
/// to `center` is at most `radius^2`.
pub fn circular_mask(shape: (usize, usize), center: PixelPos, radius: f64) -> Array2<bool> {
    let r2 = radius * radius;
    Array2::from_shape_fn(shape, |(r, c)| {
        let dr = r as f64 - center.row;
        let dc = c as f64 - center.col;
        dr * dr + dc * dc <= r2
    })
}

/// Frame-0 circular apertures for every star owned by the circle rule.
///
/// The radius comes from the run's size factor, so the optimizer can
/// probe a shared radius or distinct per-star radii through the same
/// path.
pub fn circular_masks(
    shape: (usize, usize),
    stars: &[Star],
    radius: &Factor,
    owned: &[usize],
) -> HashMap<usize, Array2<bool>> {
    owned
        .iter()
        .map(|&id| {
            let center = stars[id].initial_position();
            (id, circular_mask(shape, center, radius.for_star(id)))
        })
        .collect()
}
