//! Lanczos sinc-windowed resampling kernel (a = 3).
//!
//! The support widens with the downsampling factor so that coarse outputs
//! still see every source pixel under their footprint.

use ndarray::ArrayView2;

use crate::buffer::Sample;

use super::separable_sum;

pub(crate) const LANCZOS_A: f64 = 3.0;

/// Normalized sinc function: sinc(x) = sin(πx) / (πx), sinc(0) = 1.
fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        let px = std::f64::consts::PI * x;
        px.sin() / px
    }
}

/// Lanczos weight function: L(t) = sinc(t) * sinc(t/a) for |t| < a, else 0.
fn lanczos_weight(t: f64) -> f64 {
    let t = t.abs();
    if t < LANCZOS_A {
        sinc(t) * sinc(t / LANCZOS_A)
    } else {
        0.0
    }
}

/// First source index and weights along one axis.
fn axis_weights(center: f64, scale: f64) -> (isize, Vec<f64>) {
    let s = if scale.is_finite() { scale.abs().max(1.0) } else { 1.0 };
    let radius = LANCZOS_A * s;
    let first = (center - radius).floor() as isize + 1;
    let last = (center + radius).ceil() as isize - 1;
    let weights = (first..=last)
        .map(|i| lanczos_weight((i as f64 - center) / s))
        .collect();
    (first, weights)
}

/// Sample a 2D array using Lanczos interpolation (a=3).
///
/// The window radius is `3 * max(scale, 1)` per axis with weights
/// `L(t / max(scale, 1))`. Corner-to-center conversion (-0.5 offset).
/// Weights are normalized over the contributing samples.
pub fn sample<T: Sample>(
    src: &ArrayView2<'_, T>,
    x: f64,
    y: f64,
    nodata: Option<T>,
    scale: (f64, f64),
) -> Option<T> {
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    // Convert from corner-based to center-based coordinates
    let (col0, wx) = axis_weights(x - 0.5, scale.0);
    let (row0, wy) = axis_weights(y - 0.5, scale.1);

    separable_sum(src, col0, row0, &wx, &wy, nodata)
}
