//! Cubic resampling kernels over a 4×4 neighborhood.
//!
//! `cubic` is Keys (1981) cubic convolution with a = -0.5, `cubic-spline` the
//! cubic B-spline, which smooths rather than interpolates.

use ndarray::ArrayView2;

use crate::buffer::Sample;

use super::separable_sum;

/// Cubic convolution weight function (Keys 1981, a = -0.5).
///
/// ```text
/// W(t) = (a+2)|t|³ - (a+3)|t|² + 1       for 0 ≤ |t| ≤ 1
/// W(t) = a|t|³ - 5a|t|² + 8a|t| - 4a     for 1 < |t| ≤ 2
/// W(t) = 0                                 for |t| > 2
/// ```
fn cubic_weight(t: f64) -> f64 {
    const A: f64 = -0.5;
    let t = t.abs();
    if t <= 1.0 {
        (A + 2.0) * t * t * t - (A + 3.0) * t * t + 1.0
    } else if t <= 2.0 {
        A * t * t * t - 5.0 * A * t * t + 8.0 * A * t - 4.0 * A
    } else {
        0.0
    }
}

/// Uniform cubic B-spline basis.
fn spline_weight(t: f64) -> f64 {
    let t = t.abs();
    if t <= 1.0 {
        (3.0 * t * t * t - 6.0 * t * t + 4.0) / 6.0
    } else if t < 2.0 {
        let u = 2.0 - t;
        u * u * u / 6.0
    } else {
        0.0
    }
}

fn sample_with<T: Sample>(
    src: &ArrayView2<'_, T>,
    x: f64,
    y: f64,
    nodata: Option<T>,
    weight: fn(f64) -> f64,
) -> Option<T> {
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    // Convert from corner-based to center-based coordinates
    let cx = x - 0.5;
    let cy = y - 0.5;

    let ix = cx.floor();
    let iy = cy.floor();
    let dx = cx - ix;
    let dy = cy - iy;

    // Offsets -1..=2 around the anchor
    let mut wx = [0.0_f64; 4];
    let mut wy = [0.0_f64; 4];
    for k in 0..4 {
        let offset = k as f64 - 1.0;
        wx[k] = weight(dx - offset);
        wy[k] = weight(dy - offset);
    }

    separable_sum(src, ix as isize - 1, iy as isize - 1, &wx, &wy, nodata)
}

/// Sample a 2D array using cubic convolution interpolation.
///
/// Uses a 4×4 neighborhood centered on the sample point.
/// Corner-to-center conversion (-0.5 offset), anchor at `floor()`.
/// Excluded neighbors drop out and the weights are renormalized.
pub fn sample<T: Sample>(src: &ArrayView2<'_, T>, x: f64, y: f64, nodata: Option<T>) -> Option<T> {
    sample_with(src, x, y, nodata, cubic_weight)
}

/// Sample a 2D array using the cubic B-spline.
pub fn sample_spline<T: Sample>(
    src: &ArrayView2<'_, T>,
    x: f64,
    y: f64,
    nodata: Option<T>,
) -> Option<T> {
    sample_with(src, x, y, nodata, spline_weight)
}
