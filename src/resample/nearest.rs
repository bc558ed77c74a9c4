//! Nearest-neighbor resampling kernel.

use ndarray::ArrayView2;

use crate::buffer::Sample;

use super::is_nodata_value;

/// Sample a 2D array using nearest-neighbor interpolation.
///
/// Uses GDAL corner-based pixel convention: pixel (0,0) has its upper-left
/// corner at coordinate (0.0, 0.0) and its center at (0.5, 0.5).
/// Nearest-neighbor simply uses `floor()` to find the containing pixel.
///
/// Returns `None` if the coordinate is outside the array bounds or if
/// the sampled value is no-data.
pub fn sample<T: Sample>(src: &ArrayView2<'_, T>, x: f64, y: f64, nodata: Option<T>) -> Option<T> {
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    let col = x.floor() as isize;
    let row = y.floor() as isize;

    let (rows, cols) = (src.nrows() as isize, src.ncols() as isize);
    if col < 0 || col >= cols || row < 0 || row >= rows {
        return None;
    }

    let val = src[(row as usize, col as usize)];
    if is_nodata_value(val, nodata) {
        return None;
    }
    Some(val)
}
