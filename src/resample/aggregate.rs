//! Order-statistic and accumulating kernels over the pixel footprint.
//!
//! All of these reduce the same footprint as [`super::average`]: `sum` and
//! `rms` use the overlap weights, `min`/`max`/`mode` only look at which
//! samples are covered, and the quantiles walk the weighted distribution.

use ndarray::ArrayView2;
use num_traits::NumCast;

use crate::buffer::Sample;

use super::average::footprint;

/// Most frequent covered value. Ties go to the smallest value.
pub fn mode<T: Sample>(
    src: &ArrayView2<'_, T>,
    x: f64,
    y: f64,
    nodata: Option<T>,
    scale: (f64, f64),
) -> Option<T> {
    let mut values: Vec<f64> = footprint(src, x, y, nodata, scale)
        .into_iter()
        .map(|(v, _)| v)
        .collect();
    values.sort_by(f64::total_cmp);

    let mut best: Option<(f64, usize)> = None;
    let mut i = 0;
    while i < values.len() {
        let v = values[i];
        let run = values[i..].iter().take_while(|&&u| u == v).count();
        // Strictly greater keeps the first (smallest) of equal counts
        if best.map_or(true, |(_, n)| run > n) {
            best = Some((v, run));
        }
        i += run;
    }
    best.and_then(|(v, _)| NumCast::from(v))
}

pub fn min<T: Sample>(
    src: &ArrayView2<'_, T>,
    x: f64,
    y: f64,
    nodata: Option<T>,
    scale: (f64, f64),
) -> Option<T> {
    footprint(src, x, y, nodata, scale)
        .into_iter()
        .map(|(v, _)| v)
        .reduce(f64::min)
        .and_then(|v| <T as NumCast>::from(v))
}

pub fn max<T: Sample>(
    src: &ArrayView2<'_, T>,
    x: f64,
    y: f64,
    nodata: Option<T>,
    scale: (f64, f64),
) -> Option<T> {
    footprint(src, x, y, nodata, scale)
        .into_iter()
        .map(|(v, _)| v)
        .reduce(f64::max)
        .and_then(|v| <T as NumCast>::from(v))
}

/// Overlap-weighted sum of the covered samples.
pub fn sum<T: Sample>(
    src: &ArrayView2<'_, T>,
    x: f64,
    y: f64,
    nodata: Option<T>,
    scale: (f64, f64),
) -> Option<T> {
    let samples = footprint(src, x, y, nodata, scale);
    if samples.is_empty() {
        return None;
    }
    NumCast::from(samples.iter().map(|&(v, w)| v * w).sum::<f64>())
}

/// Root of the weighted mean of squares.
pub fn rms<T: Sample>(
    src: &ArrayView2<'_, T>,
    x: f64,
    y: f64,
    nodata: Option<T>,
    scale: (f64, f64),
) -> Option<T> {
    let samples = footprint(src, x, y, nodata, scale);
    let total: f64 = samples.iter().map(|&(_, w)| w).sum();
    if total < 1e-15 {
        return None;
    }
    let mean_sq = samples.iter().map(|&(v, w)| w * v * v).sum::<f64>() / total;
    NumCast::from(mean_sq.sqrt())
}

/// Weighted quantile: the first sorted value whose cumulative weight reaches
/// `q` of the total.
pub fn quantile<T: Sample>(
    src: &ArrayView2<'_, T>,
    x: f64,
    y: f64,
    nodata: Option<T>,
    scale: (f64, f64),
    q: f64,
) -> Option<T> {
    let mut samples = footprint(src, x, y, nodata, scale);
    if samples.is_empty() {
        return None;
    }
    samples.sort_by(|a, b| a.0.total_cmp(&b.0));

    let total: f64 = samples.iter().map(|&(_, w)| w).sum();
    let target = q * total - 1e-12;
    let mut cumulative = 0.0;
    for &(v, w) in &samples {
        cumulative += w;
        if cumulative >= target {
            return NumCast::from(v);
        }
    }
    samples.last().and_then(|&(v, _)| NumCast::from(v))
}
