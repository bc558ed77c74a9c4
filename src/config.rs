//! Option structs for the warp, overview and rasterize operations.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::rasterize::BurnRule;
use crate::resample::ResampleKernel;

pub const DEFAULT_CHUNK_SIZE: (usize, usize) = (256, 256);
pub const DEFAULT_EDGE_POINTS: usize = 21;
/// Burned when a layer lacks the requested attribute and no value is given.
pub const DEFAULT_BURN_VALUE: f64 = 1.0;

/// Worker count for one operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadBudget {
    #[default]
    AllCores,
    /// Non-positive counts mean all cores.
    Count(i64),
}

impl ThreadBudget {
    /// Number of workers to spawn, 0 meaning "let rayon pick" (all cores).
    pub fn num_threads(&self) -> usize {
        match *self {
            ThreadBudget::AllCores => 0,
            ThreadBudget::Count(n) if n <= 0 => 0,
            ThreadBudget::Count(n) => usize::try_from(n).unwrap_or(0),
        }
    }

    /// Scoped pool for one operation. The global rayon pool is left untouched.
    pub fn build_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads())
            .thread_name(|i| format!("gridwarp-{i}"))
            .build()
            .map_err(|e| Error::InvalidParameter(format!("Cannot build worker pool: {e}")))
    }
}

/// Parameters of a warp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpOptions {
    pub kernel: ResampleKernel,
    /// Overrides the source no-data sentinel when set.
    pub nodata: Option<f64>,
    pub threads: ThreadBudget,
    /// Destination tile size as (rows, cols).
    pub chunk_size: (usize, usize),
    /// Boundary samples per tile edge used to find the source window.
    pub edge_points: usize,
}

impl Default for WarpOptions {
    fn default() -> Self {
        Self {
            kernel: ResampleKernel::Nearest,
            nodata: None,
            threads: ThreadBudget::AllCores,
            chunk_size: DEFAULT_CHUNK_SIZE,
            edge_points: DEFAULT_EDGE_POINTS,
        }
    }
}

impl WarpOptions {
    pub fn with_kernel(kernel: ResampleKernel) -> Self {
        Self {
            kernel,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_chunk_size(self.chunk_size)?;
        if self.edge_points < 2 {
            return Err(Error::InvalidParameter(format!(
                "edge_points must be >= 2, got {}",
                self.edge_points
            )));
        }
        if let Some(nd) = self.nodata {
            if nd.is_infinite() {
                return Err(Error::InvalidParameter(format!("Invalid no-data value {nd}")));
            }
        }
        Ok(())
    }
}

/// Parameters of an overview build.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverviewOptions {
    pub kernel: ResampleKernel,
    /// Explicit decimation factors; chosen from the raster size when `None`.
    pub levels: Option<Vec<u32>>,
    pub threads: ThreadBudget,
    pub chunk_size: (usize, usize),
}

impl Default for OverviewOptions {
    fn default() -> Self {
        Self {
            kernel: ResampleKernel::Nearest,
            levels: None,
            threads: ThreadBudget::AllCores,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl OverviewOptions {
    pub fn validate(&self) -> Result<()> {
        check_chunk_size(self.chunk_size)?;
        if !self.kernel.is_overview_kernel() {
            return Err(Error::UnsupportedKernel(format!(
                "{} cannot build overviews",
                self.kernel
            )));
        }
        if let Some(levels) = &self.levels {
            if let Some(bad) = levels.iter().find(|&&l| l < 2) {
                return Err(Error::InvalidParameter(format!(
                    "Overview levels must be >= 2, got {bad}"
                )));
            }
        }
        Ok(())
    }
}

/// Parameters of a layer rasterization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterizeOptions {
    pub rule: BurnRule,
    /// Initial value of every pixel, recorded as the raster's no-data.
    pub nodata: f64,
    /// Burned instead of an attribute that no feature of the layer carries.
    pub fallback_value: f64,
}

impl Default for RasterizeOptions {
    fn default() -> Self {
        Self {
            rule: BurnRule::CenterPoint,
            nodata: 0.0,
            fallback_value: DEFAULT_BURN_VALUE,
        }
    }
}

impl RasterizeOptions {
    pub fn validate(&self) -> Result<()> {
        if !self.nodata.is_finite() || !self.fallback_value.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "Rasterize values must be finite, got nodata {} and fallback {}",
                self.nodata, self.fallback_value
            )));
        }
        Ok(())
    }
}

fn check_chunk_size((rows, cols): (usize, usize)) -> Result<()> {
    if rows == 0 || cols == 0 {
        return Err(Error::InvalidParameter(format!(
            "Chunk size must be positive, got {rows}x{cols}"
        )));
    }
    Ok(())
}
