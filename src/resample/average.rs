//! Area-weighted average resampling kernel.
//!
//! Computes a weighted average over the source pixel footprint, skipping
//! nodata/NaN pixels (matching GDAL `GRA_Average` behavior). The footprint
//! walk is shared with the other aggregating kernels.

use ndarray::ArrayView2;
use num_traits::NumCast;

use crate::buffer::Sample;

use super::is_nodata_value;

/// Valid samples under the destination pixel footprint with their overlap
/// area as weight.
///
/// The `scale` parameter is the source-to-destination pixel ratio `(sx, sy)`.
/// The window half-width is `max(scale/2, 0.5)` in each axis, centered on the
/// back-projected destination pixel center `(x, y)`.
pub(crate) fn footprint<T: Sample>(
    src: &ArrayView2<'_, T>,
    x: f64,
    y: f64,
    nodata: Option<T>,
    scale: (f64, f64),
) -> Vec<(f64, f64)> {
    if !x.is_finite() || !y.is_finite() {
        return Vec::new();
    }
    let (cx, cy) = (x, y);

    // Window half-width: at least 0.5 (single pixel) in each axis
    let half = |s: f64| if s.is_finite() { (s.abs() / 2.0).max(0.5) } else { 0.5 };
    let hx = half(scale.0);
    let hy = half(scale.1);

    let (rows, cols) = (src.nrows() as isize, src.ncols() as isize);

    // Integer range of source pixels covered by the footprint, clamped
    let x_min = ((cx - hx).floor() as isize).max(0);
    let x_max = ((cx + hx).ceil() as isize).min(cols);
    let y_min = ((cy - hy).floor() as isize).max(0);
    let y_max = ((cy + hy).ceil() as isize).min(rows);

    if x_min >= x_max || y_min >= y_max {
        return Vec::new();
    }

    let overlap = |i: isize, c: f64, h: f64| {
        let lo = (i as f64).max(c - h);
        let hi = ((i + 1) as f64).min(c + h);
        (hi - lo).max(0.0)
    };
    let ox_weights: Vec<f64> = (x_min..x_max).map(|ix| overlap(ix, cx, hx)).collect();

    let mut out = Vec::with_capacity(ox_weights.len() * (y_max - y_min) as usize);
    for iy in y_min..y_max {
        let oy = overlap(iy, cy, hy);
        if oy <= 1e-12 {
            continue;
        }
        for (xi, ix) in (x_min..x_max).enumerate() {
            let w = ox_weights[xi] * oy;
            if w <= 1e-12 {
                continue;
            }
            let val = src[(iy as usize, ix as usize)];
            if is_nodata_value(val, nodata) {
                continue;
            }
            if let Some(fval) = <f64 as NumCast>::from(val) {
                out.push((fval, w));
            }
        }
    }
    out
}

/// Sample a 2D array using area-weighted averaging.
///
/// Nodata/NaN pixels are **skipped** rather than propagating; the average is
/// computed over remaining valid pixels. Returns `None` only if ALL pixels
/// in the footprint are nodata.
pub fn sample<T: Sample>(
    src: &ArrayView2<'_, T>,
    x: f64,
    y: f64,
    nodata: Option<T>,
    scale: (f64, f64),
) -> Option<T> {
    let samples = footprint(src, x, y, nodata, scale);

    let mut weighted_sum = 0.0_f64;
    let mut total_weight = 0.0_f64;
    for (v, w) in samples {
        weighted_sum += w * v;
        total_weight += w;
    }

    if total_weight < 1e-15 {
        return None;
    }

    NumCast::from(weighted_sum / total_weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn block_grid() -> Array2<f64> {
        array![
            [10.0, 20.0, 30.0, 40.0],
            [50.0, 60.0, 70.0, 80.0],
            [90.0, 100.0, 110.0, 120.0],
            [130.0, 140.0, 150.0, 160.0],
        ]
    }

    #[test]
    fn test_aligned_blocks_average_exactly() {
        let arr = block_grid();
        let view = arr.view();
        let expected = [(1.0, 1.0, 35.0), (3.0, 1.0, 55.0), (1.0, 3.0, 115.0), (3.0, 3.0, 135.0)];
        for (x, y, mean) in expected {
            assert_relative_eq!(sample(&view, x, y, None, (2.0, 2.0)).unwrap(), mean, epsilon = 1e-10);
        }
        // The whole raster at 4x
        assert_relative_eq!(sample(&view, 2.0, 2.0, None, (4.0, 4.0)).unwrap(), 85.0, epsilon = 1e-10);
    }

    #[test]
    fn test_footprint_weights() {
        let arr = Array2::from_elem((4, 4), 1.0_f64);
        let view = arr.view();

        // Aligned 2x footprint covers four whole pixels
        let fp = footprint(&view, 1.0, 1.0, None, (2.0, 2.0));
        assert_eq!(fp.len(), 4);
        assert!(fp.iter().all(|&(_, w)| (w - 1.0).abs() < 1e-12));

        // Offset footprint: 3x3 pixels partially covered
        let fp = footprint(&view, 1.5, 1.5, None, (2.0, 2.0));
        assert_eq!(fp.len(), 9);
        let total: f64 = fp.iter().map(|&(_, w)| w).sum();
        assert_relative_eq!(total, 4.0, epsilon = 1e-12);

        // Clipped at the raster edge
        let fp = footprint(&view, 0.0, 0.0, None, (2.0, 2.0));
        assert_eq!(fp.len(), 1);
    }

    #[test]
    fn test_partial_overlap_is_area_weighted() {
        let arr = array![[0.0, 100.0], [0.0, 100.0]];
        let view = arr.view();
        // x footprint [0.5, 2.5): half of column 0, all of column 1
        let val = sample(&view, 1.5, 1.0, None, (2.0, 2.0)).unwrap();
        assert_relative_eq!(val, 100.0 / 1.5, epsilon = 1e-10);
    }

    #[test]
    fn test_excluded_samples_drop_out() {
        let mut arr = block_grid();
        arr[(0, 0)] = -9999.0;
        arr[(1, 1)] = f64::NAN;
        let view = arr.view();
        // Block of 10, 20, 50, 60 without 10 and 60
        let val = sample(&view, 1.0, 1.0, Some(-9999.0), (2.0, 2.0)).unwrap();
        assert_relative_eq!(val, 35.0, epsilon = 1e-10);

        let all = Array2::from_elem((4, 4), -9999.0);
        assert!(sample(&all.view(), 1.5, 1.5, Some(-9999.0), (2.0, 2.0)).is_none());
    }

    #[test]
    fn test_unit_scale_reads_the_pixel() {
        let arr = Array2::from_shape_fn((6, 6), |(r, c)| (r * 6 + c) as f64);
        let view = arr.view();
        assert_relative_eq!(sample(&view, 3.5, 2.5, None, (1.0, 1.0)).unwrap(), 15.0, epsilon = 1e-10);
        assert!(sample::<f64>(&view, -5.0, -5.0, None, (1.0, 1.0)).is_none());
        assert!(sample::<f64>(&view, 3.0, f64::INFINITY, None, (1.0, 1.0)).is_none());
    }

    #[test]
    fn test_integer_samples() {
        let arr = array![[4_u16, 8], [12, 16]];
        assert_eq!(sample(&arr.view(), 1.0, 1.0, None, (2.0, 2.0)), Some(10));
        assert_eq!(sample(&arr.view(), 1.0, 1.0, Some(16), (2.0, 2.0)), Some(8));
    }
}
