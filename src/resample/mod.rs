//! Resampling kernels for the warp engine.
//!
//! Every kernel reduces a source neighborhood around the back-projected
//! position `(x, y)` (corner-based source pixel coordinates) to one value.
//! Samples equal to no-data, NaN samples and samples outside the source are
//! excluded; a kernel returns `None` only when nothing valid contributes.

pub mod aggregate;
pub mod average;
pub mod bilinear;
pub mod cubic;
pub mod lanczos;
pub mod nearest;

use std::fmt;

use ndarray::ArrayView2;
use num_traits::NumCast;

use crate::buffer::Sample;
use crate::error::Error;

/// Available resampling methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResampleKernel {
    Nearest,
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
    Mode,
    Min,
    Max,
    Median,
    Sum,
    Rms,
    Q1,
    Q3,
}

impl ResampleKernel {
    pub const ALL: [ResampleKernel; 14] = [
        Self::Nearest,
        Self::Bilinear,
        Self::Cubic,
        Self::CubicSpline,
        Self::Lanczos,
        Self::Average,
        Self::Mode,
        Self::Min,
        Self::Max,
        Self::Median,
        Self::Sum,
        Self::Rms,
        Self::Q1,
        Self::Q3,
    ];

    /// Parse from a string name.
    pub fn from_name(s: &str) -> Result<Self, Error> {
        match s.to_lowercase().as_str() {
            "nearest" | "near" => Ok(Self::Nearest),
            "bilinear" => Ok(Self::Bilinear),
            "cubic" => Ok(Self::Cubic),
            "cubic-spline" | "cubicspline" | "cubic_spline" => Ok(Self::CubicSpline),
            "lanczos" => Ok(Self::Lanczos),
            "average" => Ok(Self::Average),
            "mode" => Ok(Self::Mode),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "median" | "med" => Ok(Self::Median),
            "sum" => Ok(Self::Sum),
            "rms" | "root-mean-square" | "root_mean_square" => Ok(Self::Rms),
            "q1" | "first-quartile" | "first_quartile" => Ok(Self::Q1),
            "q3" | "third-quartile" | "third_quartile" => Ok(Self::Q3),
            _ => Err(Error::UnsupportedKernel(s.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
            Self::Cubic => "cubic",
            Self::CubicSpline => "cubic-spline",
            Self::Lanczos => "lanczos",
            Self::Average => "average",
            Self::Mode => "mode",
            Self::Min => "min",
            Self::Max => "max",
            Self::Median => "median",
            Self::Sum => "sum",
            Self::Rms => "rms",
            Self::Q1 => "q1",
            Self::Q3 => "q3",
        }
    }

    /// Kernels that reduce the whole destination-pixel footprint.
    pub fn is_footprint(&self) -> bool {
        !matches!(
            self,
            Self::Nearest | Self::Bilinear | Self::Cubic | Self::CubicSpline | Self::Lanczos
        )
    }

    /// Whether `sample` reads the source-per-destination scale.
    pub fn uses_scale(&self) -> bool {
        matches!(self, Self::Lanczos) || self.is_footprint()
    }

    /// Kernels accepted when building overview pyramids.
    pub fn is_overview_kernel(&self) -> bool {
        matches!(
            self,
            Self::Nearest | Self::Average | Self::Mode | Self::Min | Self::Max | Self::Rms
        )
    }

    /// Kernel radius in source pixels, given the source-per-destination scale.
    pub fn kernel_radius(&self, scale: (f64, f64)) -> f64 {
        let s = scale.0.abs().max(scale.1.abs()).max(1.0);
        match self {
            Self::Nearest => 0.5,
            Self::Bilinear => 1.0,
            Self::Cubic | Self::CubicSpline => 2.0,
            Self::Lanczos => lanczos::LANCZOS_A * s,
            _ => s / 2.0 + 0.5,
        }
    }

    /// Reduce the neighborhood around `(x, y)` to a single sample.
    pub fn sample<T: Sample>(
        &self,
        src: &ArrayView2<'_, T>,
        x: f64,
        y: f64,
        nodata: Option<T>,
        scale: (f64, f64),
    ) -> Option<T> {
        match self {
            Self::Nearest => nearest::sample(src, x, y, nodata),
            Self::Bilinear => bilinear::sample(src, x, y, nodata),
            Self::Cubic => cubic::sample(src, x, y, nodata),
            Self::CubicSpline => cubic::sample_spline(src, x, y, nodata),
            Self::Lanczos => lanczos::sample(src, x, y, nodata, scale),
            Self::Average => average::sample(src, x, y, nodata, scale),
            Self::Mode => aggregate::mode(src, x, y, nodata, scale),
            Self::Min => aggregate::min(src, x, y, nodata, scale),
            Self::Max => aggregate::max(src, x, y, nodata, scale),
            Self::Median => aggregate::quantile(src, x, y, nodata, scale, 0.5),
            Self::Sum => aggregate::sum(src, x, y, nodata, scale),
            Self::Rms => aggregate::rms(src, x, y, nodata, scale),
            Self::Q1 => aggregate::quantile(src, x, y, nodata, scale, 0.25),
            Self::Q3 => aggregate::quantile(src, x, y, nodata, scale, 0.75),
        }
    }
}

impl fmt::Display for ResampleKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ResampleKernel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl TryFrom<String> for ResampleKernel {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_name(&s)
    }
}

impl From<ResampleKernel> for String {
    fn from(k: ResampleKernel) -> String {
        k.name().to_string()
    }
}

/// True when `val` is the sentinel or a floating-point NaN.
pub fn is_nodata_value<T: Copy + NumCast + PartialEq>(val: T, nodata: Option<T>) -> bool {
    if let Some(nd) = nodata {
        if val == nd {
            return true;
        }
    }
    match <f64 as NumCast>::from(val) {
        Some(f) => f.is_nan(),
        None => true,
    }
}

/// Read the sample at signed (row, col), `None` when outside or no-data.
pub(crate) fn valid_at<T: Sample>(
    src: &ArrayView2<'_, T>,
    row: isize,
    col: isize,
    nodata: Option<T>,
) -> Option<f64> {
    if row < 0 || col < 0 {
        return None;
    }
    let val = *src.get((row as usize, col as usize))?;
    if is_nodata_value(val, nodata) {
        return None;
    }
    NumCast::from(val)
}

/// Weights smaller than this do not make a sample "contributing".
const MIN_WEIGHT: f64 = 1e-12;

/// Weighted sum over a separable window anchored at (`row0`, `col0`).
///
/// Excluded samples drop out and the remaining weights are renormalized. If
/// the remaining weights cancel out the unweighted mean of the contributing
/// samples is used instead.
pub(crate) fn separable_sum<T: Sample>(
    src: &ArrayView2<'_, T>,
    col0: isize,
    row0: isize,
    wx: &[f64],
    wy: &[f64],
    nodata: Option<T>,
) -> Option<T> {
    let mut weighted = 0.0_f64;
    let mut total_weight = 0.0_f64;
    let mut plain = 0.0_f64;
    let mut count = 0usize;

    for (j, &w_row) in wy.iter().enumerate() {
        if w_row.abs() < MIN_WEIGHT {
            continue;
        }
        for (i, &w_col) in wx.iter().enumerate() {
            let w = w_row * w_col;
            if w.abs() < MIN_WEIGHT {
                continue;
            }
            let Some(v) = valid_at(src, row0 + j as isize, col0 + i as isize, nodata) else {
                continue;
            };
            weighted += w * v;
            total_weight += w;
            plain += v;
            count += 1;
        }
    }

    if count == 0 {
        return None;
    }
    let result = if total_weight.abs() < 1e-9 {
        plain / count as f64
    } else {
        weighted / total_weight
    };
    NumCast::from(result)
}
