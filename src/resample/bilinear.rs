//! Bilinear interpolation resampling kernel.

use ndarray::ArrayView2;

use crate::buffer::Sample;

use super::separable_sum;

/// Sample a 2D array using bilinear interpolation.
///
/// Subtracts 0.5 from input coordinates to center on pixel centers
/// (GDAL convention: pixel center at col+0.5, row+0.5).
///
/// Performs 2×2 weighted interpolation. Neighbors that are out of bounds,
/// no-data or NaN drop out and the remaining weights are renormalized.
pub fn sample<T: Sample>(src: &ArrayView2<'_, T>, x: f64, y: f64, nodata: Option<T>) -> Option<T> {
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    // Convert from corner-based to center-based coordinates
    let cx = x - 0.5;
    let cy = y - 0.5;

    let x0 = cx.floor();
    let y0 = cy.floor();
    let dx = cx - x0;
    let dy = cy - y0;

    separable_sum(
        src,
        x0 as isize,
        y0 as isize,
        &[1.0 - dx, dx],
        &[1.0 - dy, dy],
        nodata,
    )
}
