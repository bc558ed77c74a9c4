//! Reduced-resolution overview pyramids.

use rayon::prelude::*;
use tracing::{debug, info};

use crate::buffer::TypedBuffer;
use crate::config::{OverviewOptions, WarpOptions, DEFAULT_EDGE_POINTS};
use crate::error::{Error, Result};
use crate::grid::GeoGrid;
use crate::io::{IoResult, RasterSource};
use crate::proj::Identity;
use crate::warp::engine::assemble;
use crate::warp::Context;

/// Levels stop once the overview's longest side fits in one block.
const TARGET_BLOCK: usize = 256;

/// Where a sink keeps its overviews. Informational for the builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OverviewPlacement {
    /// Inside the raster container itself.
    Internal,
    /// In a companion (`.ovr`-style) file.
    External,
}

/// Receives finished overview levels in ascending factor order.
pub trait OverviewSink {
    fn placement(&self) -> OverviewPlacement;

    fn write_level(&mut self, factor: u32, grid: &GeoGrid, data: &TypedBuffer) -> IoResult<()>;
}

/// Default decimation factors for a `width` x `height` raster: powers of two
/// until the longest side fits in a 256-pixel block.
pub fn select_levels(width: usize, height: usize) -> Vec<u32> {
    let max_dim = width.max(height);
    let mut levels = Vec::new();
    let mut level: usize = 2;
    while level < max_dim {
        levels.push(level as u32);
        if max_dim / level <= TARGET_BLOCK {
            break;
        }
        level *= 2;
    }
    if levels.is_empty() {
        levels.push(2);
    }
    levels
}

pub struct OverviewBuilder {
    options: OverviewOptions,
}

impl OverviewBuilder {
    pub fn new(options: OverviewOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &OverviewOptions {
        &self.options
    }

    /// Explicit levels sorted and deduplicated, else the default selection.
    pub fn levels_for(&self, grid: &GeoGrid) -> Vec<u32> {
        match &self.options.levels {
            Some(explicit) if !explicit.is_empty() => {
                let mut levels = explicit.clone();
                levels.sort_unstable();
                levels.dedup();
                levels
            }
            _ => select_levels(grid.width(), grid.height()),
        }
    }

    /// Build every level from the full-resolution source and hand them to
    /// `sink`. Returns the factors written.
    pub fn build(&self, source: &dyn RasterSource, sink: &mut dyn OverviewSink) -> Result<Vec<u32>> {
        let grid = *source.grid();
        let levels = self.levels_for(&grid);
        let warp_options = WarpOptions {
            kernel: self.options.kernel,
            nodata: None,
            threads: self.options.threads,
            chunk_size: self.options.chunk_size,
            edge_points: DEFAULT_EDGE_POINTS,
        };

        let contexts = levels
            .iter()
            .map(|&factor| {
                let level_grid = grid.decimate(factor)?;
                let ctx =
                    Context::with_transformer(grid, level_grid, Box::new(Identity), &warp_options)?;
                Ok((factor, ctx))
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            source = source.id(),
            levels = ?levels,
            kernel = %self.options.kernel,
            placement = ?sink.placement(),
            "building overviews"
        );

        let pool = self.options.threads.build_pool()?;
        let nodata = source.nodata();
        let computed = pool.install(|| {
            contexts
                .par_iter()
                .map(|(factor, ctx)| {
                    let tiles = ctx.warp_tiles(source)?;
                    Ok((*factor, assemble(ctx.dst_grid(), &tiles, nodata)))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        for (factor, buffer) in &computed {
            let level_grid = grid.decimate(*factor)?;
            let typed = TypedBuffer::narrow(&buffer.view(), source.data_type(), nodata, nodata, (0, 0))?;
            sink.write_level(*factor, &level_grid, &typed)
                .map_err(|e| Error::unwritable(source.id(), e))?;
        }

        info!(source = source.id(), levels = ?levels, "overviews built");
        Ok(levels)
    }
}
