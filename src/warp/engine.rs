//! Inverse-mapping warp engine.
//!
//! For each output pixel, projects the pixel center back to the source grid
//! and samples the source with the selected kernel. The destination is
//! processed in independent tiles on a scoped worker pool, a bounded batch at
//! a time; each batch is written to the sink in plan order once computed.

use ndarray::{s, Array2, ArrayView2};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, trace, warn};

use crate::buffer::{SampleBuffer, TypedBuffer};
use crate::chunk::planner::{local_scale, step_length, to_source_pixel};
use crate::chunk::{plan_tiles, TilePlan};
use crate::config::{ThreadBudget, WarpOptions};
use crate::error::{Error, Result};
use crate::grid::{GeoGrid, Region};
use crate::io::{MemoryRaster, RasterSink, RasterSource};
use crate::proj::{transformer_between, CoordinateTransformer, ReferenceSystem};
use crate::resample::ResampleKernel;

/// Tiles each worker computes before a batch is handed to the sink.
const TILES_PER_WORKER: usize = 4;

/// Everything a warp needs, fixed for the duration of one operation and
/// shared read-only by all workers.
pub struct Context {
    src_grid: GeoGrid,
    dst_grid: GeoGrid,
    kernel: ResampleKernel,
    nodata: Option<f64>,
    threads: ThreadBudget,
    chunk_size: (usize, usize),
    edge_points: usize,
    /// Destination world coordinates to source world coordinates.
    transformer: Box<dyn CoordinateTransformer>,
    /// Scale at the destination center, for pixels whose neighbours cannot
    /// be mapped.
    nominal_scale: (f64, f64),
}

/// One computed destination tile.
#[derive(Clone, Debug, PartialEq)]
pub struct WarpedTile {
    pub region: Region,
    pub data: Array2<f64>,
}

impl Context {
    pub fn new(
        src_grid: GeoGrid,
        src_rs: &ReferenceSystem,
        dst_grid: GeoGrid,
        dst_rs: &ReferenceSystem,
        options: &WarpOptions,
    ) -> Result<Self> {
        Self::with_transformer(src_grid, dst_grid, transformer_between(dst_rs, src_rs), options)
    }

    /// Context with a caller-supplied destination-to-source transformer.
    pub fn with_transformer(
        src_grid: GeoGrid,
        dst_grid: GeoGrid,
        transformer: Box<dyn CoordinateTransformer>,
        options: &WarpOptions,
    ) -> Result<Self> {
        options.validate()?;
        let (cols, rows) = (dst_grid.width() as f64, dst_grid.height() as f64);
        let nominal_scale =
            local_scale(&src_grid, &dst_grid, transformer.as_ref(), cols / 2.0, rows / 2.0)
                .unwrap_or((1.0, 1.0));
        Ok(Self {
            src_grid,
            dst_grid,
            kernel: options.kernel,
            nodata: options.nodata,
            threads: options.threads,
            chunk_size: options.chunk_size,
            edge_points: options.edge_points,
            transformer,
            nominal_scale,
        })
    }

    pub fn src_grid(&self) -> &GeoGrid {
        &self.src_grid
    }

    pub fn dst_grid(&self) -> &GeoGrid {
        &self.dst_grid
    }

    pub fn kernel(&self) -> ResampleKernel {
        self.kernel
    }

    pub fn threads(&self) -> ThreadBudget {
        self.threads
    }

    /// The explicit no-data override, else the source's own sentinel.
    pub fn source_nodata(&self, source: &dyn RasterSource) -> Option<f64> {
        self.nodata.or_else(|| source.nodata())
    }

    pub fn plan(&self) -> Result<Vec<TilePlan>> {
        plan_tiles(
            &self.src_grid,
            &self.dst_grid,
            self.transformer.as_ref(),
            self.chunk_size,
            self.kernel,
            self.edge_points,
        )
    }

    fn check_source(&self, source: &dyn RasterSource) -> Result<()> {
        if source.grid() != &self.src_grid {
            return Err(Error::InvalidParameter(format!(
                "Source '{}' does not match the planned source grid",
                source.id()
            )));
        }
        Ok(())
    }

    fn source_position(&self, col: f64, row: f64) -> Option<(f64, f64)> {
        to_source_pixel(&self.src_grid, &self.dst_grid, self.transformer.as_ref(), col, row)
    }

    /// Source-per-destination ratio at one pixel. `ahead` holds the mapped
    /// centers of its right and lower neighbours.
    fn pixel_scale(
        &self,
        here: (f64, f64),
        ahead: (Option<(f64, f64)>, Option<(f64, f64)>),
        col: f64,
        row: f64,
    ) -> (f64, f64) {
        let axis = |next: Option<(f64, f64)>, dc: f64, dr: f64| {
            next.and_then(|p| step_length(here, p)).or_else(|| {
                self.source_position(col - dc, row - dr)
                    .and_then(|p| step_length(p, here))
            })
        };
        (
            axis(ahead.0, 1.0, 0.0).unwrap_or(self.nominal_scale.0),
            axis(ahead.1, 0.0, 1.0).unwrap_or(self.nominal_scale.1),
        )
    }

    /// Compute one tile. Pixels with no valid sample hold the source no-data
    /// sentinel, or NaN without one.
    ///
    /// Footprint kernels get the scale of each destination pixel, so the
    /// result does not depend on how the destination is tiled.
    pub fn warp_tile(
        &self,
        source: &dyn RasterSource,
        plan: &TilePlan,
        nodata: Option<f64>,
    ) -> Result<Array2<f64>> {
        let fill = nodata.unwrap_or(f64::NAN);
        let mut out = Array2::from_elem(plan.dst_tile_shape(), fill);

        // Tiles without source coverage stay no-data and never read
        let Some(src_region) = plan.src_region else {
            trace!(region = ?plan.dst_region.as_tuple(), "tile has no source coverage");
            return Ok(out);
        };

        let src = source
            .read(&src_region)
            .map_err(|e| Error::unreadable(source.id(), e))?;
        let view = src.view();
        let scaled = self.kernel.uses_scale();

        // Mapped pixel centers, one extra row and column when scales are needed
        let (rows, cols) = plan.dst_tile_shape();
        let extra = usize::from(scaled);
        let (col0, row0) = (plan.dst_region.col_off as f64, plan.dst_region.row_off as f64);
        let positions = Array2::from_shape_fn((rows + extra, cols + extra), |(r, c)| {
            self.source_position(col0 + c as f64 + 0.5, row0 + r as f64 + 0.5)
        });

        for ((r, c), cell) in out.indexed_iter_mut() {
            // Unmappable centers stay no-data
            let Some((sc, sr)) = positions[(r, c)] else {
                continue;
            };
            let scale = if scaled {
                let ahead = (positions[(r, c + 1)], positions[(r + 1, c)]);
                self.pixel_scale((sc, sr), ahead, col0 + c as f64 + 0.5, row0 + r as f64 + 0.5)
            } else {
                (1.0, 1.0)
            };

            // Relative to the window that was read
            let lc = sc - src_region.col_off as f64;
            let lr = sr - src_region.row_off as f64;
            if let Some(v) = self.kernel.sample(&view, lc, lr, nodata, scale) {
                *cell = v;
            }
        }

        trace!(region = ?plan.dst_region.as_tuple(), "tile computed");
        Ok(out)
    }

    fn prepare(&self, source: &dyn RasterSource, threads: usize) -> Result<Vec<TilePlan>> {
        self.check_source(source)?;
        let plans = self.plan()?;
        let with_data = plans.iter().filter(|p| p.has_data()).count();
        debug!(
            tiles = plans.len(),
            tiles_with_data = with_data,
            threads,
            kernel = %self.kernel,
            "planned warp"
        );
        if with_data == 0 {
            warn!(source = source.id(), "destination grid has no source coverage");
        }
        Ok(plans)
    }

    fn compute(
        &self,
        source: &dyn RasterSource,
        plans: &[TilePlan],
        nodata: Option<f64>,
    ) -> Result<Vec<WarpedTile>> {
        plans
            .par_iter()
            .map(|plan| {
                self.warp_tile(source, plan, nodata).map(|data| WarpedTile {
                    region: plan.dst_region,
                    data,
                })
            })
            .collect()
    }

    /// Compute every tile on the current rayon pool.
    ///
    /// Callers run this inside `ThreadPool::install` to honor the budget.
    pub fn warp_tiles(&self, source: &dyn RasterSource) -> Result<Vec<WarpedTile>> {
        let plans = self.prepare(source, rayon::current_num_threads())?;
        self.compute(source, &plans, self.source_nodata(source))
    }

    /// Compute tiles on `pool` a batch at a time and hand them to `emit` in
    /// plan order. At most a few tiles per worker are held in memory. Stops
    /// at the first error. Returns the number of tiles planned.
    pub fn warp_in_batches<F>(
        &self,
        pool: &ThreadPool,
        source: &dyn RasterSource,
        mut emit: F,
    ) -> Result<usize>
    where
        F: FnMut(WarpedTile) -> Result<()>,
    {
        let plans = self.prepare(source, pool.current_num_threads())?;
        let nodata = self.source_nodata(source);
        let batch = pool.current_num_threads().max(1) * TILES_PER_WORKER;
        for chunk in plans.chunks(batch) {
            let tiles = pool.install(|| self.compute(source, chunk, nodata))?;
            for tile in tiles {
                emit(tile)?;
            }
        }
        Ok(plans.len())
    }

    /// Warp into a single in-memory buffer on a pool sized by the budget.
    pub fn warp_to_buffer(&self, source: &dyn RasterSource) -> Result<SampleBuffer<f64>> {
        let pool = self.threads.build_pool()?;
        let mut buffer = SampleBuffer::for_grid(&self.dst_grid, self.source_nodata(source));
        self.warp_in_batches(&pool, source, |tile| {
            place(&mut buffer, &tile);
            Ok(())
        })?;
        Ok(buffer)
    }
}

fn place(buffer: &mut SampleBuffer<f64>, tile: &WarpedTile) {
    let r = tile.region;
    buffer
        .data
        .slice_mut(s![r.row_off..r.row_off + r.height, r.col_off..r.col_off + r.width])
        .assign(&tile.data);
}

/// Stitch computed tiles into one buffer covering `grid`.
pub(crate) fn assemble(grid: &GeoGrid, tiles: &[WarpedTile], nodata: Option<f64>) -> SampleBuffer<f64> {
    let mut buffer = SampleBuffer::for_grid(grid, nodata);
    for tile in tiles {
        place(&mut buffer, tile);
    }
    buffer
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarpState {
    Initialized,
    Running,
    Completed,
    Failed,
}

/// Counts reported by a finished warp.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WarpSummary {
    pub tiles: usize,
    pub tiles_with_data: usize,
}

/// Runs one warp from a source to a sink. Single use.
pub struct WarpExecutor {
    context: Context,
    state: WarpState,
}

impl WarpExecutor {
    pub fn new(context: Context) -> Self {
        Self {
            context,
            state: WarpState::Initialized,
        }
    }

    pub fn state(&self) -> WarpState {
        self.state
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Compute tiles batch by batch, narrowing and writing each batch in plan
    /// order.
    ///
    /// Any failure aborts the run; tiles already written are not rolled back.
    pub fn run(
        &mut self,
        source: &dyn RasterSource,
        sink: &mut dyn RasterSink,
    ) -> Result<WarpSummary> {
        if self.state != WarpState::Initialized {
            return Err(Error::InvalidParameter(format!(
                "Warp executor cannot run from state {:?}",
                self.state
            )));
        }
        self.state = WarpState::Running;
        let result = self.execute(source, sink);
        self.state = match result {
            Ok(_) => WarpState::Completed,
            Err(_) => WarpState::Failed,
        };
        result
    }

    fn execute(
        &self,
        source: &dyn RasterSource,
        sink: &mut dyn RasterSink,
    ) -> Result<WarpSummary> {
        let ctx = &self.context;
        if sink.grid() != &ctx.dst_grid {
            return Err(Error::InvalidParameter(format!(
                "Sink '{}' does not match the destination grid",
                sink.id()
            )));
        }

        let pool = ctx.threads.build_pool()?;
        let nodata = ctx.source_nodata(source);

        let mut tiles_with_data = 0;
        let tiles = ctx.warp_in_batches(&pool, source, |tile| {
            let region = tile.region;
            let typed = TypedBuffer::narrow(
                &tile.data.view(),
                sink.data_type(),
                nodata,
                sink.nodata(),
                (region.row_off, region.col_off),
            )?;
            sink.write(&region, &typed)
                .map_err(|e| Error::unwritable(sink.id(), e))?;
            if tile.data.iter().any(|&v| !crate::resample::is_nodata_value(v, nodata)) {
                tiles_with_data += 1;
            }
            Ok(())
        })?;
        let summary = WarpSummary {
            tiles,
            tiles_with_data,
        };

        info!(
            source = source.id(),
            sink = sink.id(),
            tiles = summary.tiles,
            tiles_with_data = summary.tiles_with_data,
            kernel = %ctx.kernel,
            "warp completed"
        );
        Ok(summary)
    }
}

/// Warp an in-memory array between two grids.
pub fn warp_buffer(
    src: &ArrayView2<'_, f64>,
    src_grid: &GeoGrid,
    src_rs: &ReferenceSystem,
    dst_grid: &GeoGrid,
    dst_rs: &ReferenceSystem,
    options: &WarpOptions,
) -> Result<SampleBuffer<f64>> {
    let source = MemoryRaster::from_f64(
        "buffer",
        *src_grid,
        src_rs.clone(),
        src.to_owned(),
        options.nodata,
    )?;
    let ctx = Context::new(*src_grid, src_rs, *dst_grid, dst_rs, options)?;
    ctx.warp_to_buffer(&source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;
    use crate::buffer::DataType;
    use crate::error::{IoError, Unmappable};
    use crate::io::{MemoryRasterStore, RasterStore, WriteOptions};
    use crate::proj::{Identity, ProjResolver, ReferenceSystemResolver};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn utm() -> ReferenceSystem {
        ProjResolver.resolve("EPSG:32633").unwrap()
    }

    fn grid(origin_y: f64, size: f64, w: usize, h: usize) -> GeoGrid {
        GeoGrid::new(Affine::new(size, 0.0, 500000.0, 0.0, -size, origin_y), w, h).unwrap()
    }

    fn ramp(rows: usize, cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |(r, c)| (r * cols + c) as f64)
    }

    #[test]
    fn test_identity_reprojection() {
        // Same CRS, same affine → output should equal input
        let src = ramp(4, 4);
        let g = grid(6000040.0, 10.0, 4, 4);
        let opts = WarpOptions {
            chunk_size: (3, 3),
            ..WarpOptions::default()
        };

        let result = warp_buffer(&src.view(), &g, &utm(), &g, &utm(), &opts).unwrap();
        assert_eq!(result.data, src);
    }

    #[test]
    fn test_identity_bilinear() {
        let src = ramp(6, 6);
        let g = grid(6000060.0, 10.0, 6, 6);
        let opts = WarpOptions::with_kernel(ResampleKernel::Bilinear);

        let result = warp_buffer(&src.view(), &g, &utm(), &g, &utm(), &opts).unwrap();
        for ((r, c), v) in result.data.indexed_iter() {
            assert_relative_eq!(*v, src[(r, c)], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_nodata_propagation() {
        let mut src = Array2::from_elem((4, 4), 42.0);
        src[(1, 1)] = f64::NAN;
        let g = grid(6000040.0, 10.0, 4, 4);

        let result =
            warp_buffer(&src.view(), &g, &utm(), &g, &utm(), &WarpOptions::default()).unwrap();

        // The NaN pixel should remain NaN
        assert!(result.data[(1, 1)].is_nan());
        assert_relative_eq!(result.data[(0, 0)], 42.0);
        assert_relative_eq!(result.data[(2, 2)], 42.0);
    }

    #[test]
    fn test_downsample_average_matches_block_means() {
        let src = ramp(10, 10);
        let src_grid = grid(6000100.0, 10.0, 10, 10);
        let dst_grid = grid(6000100.0, 20.0, 5, 5);
        let opts = WarpOptions::with_kernel(ResampleKernel::Average);

        let result =
            warp_buffer(&src.view(), &src_grid, &utm(), &dst_grid, &utm(), &opts).unwrap();
        assert_eq!(result.shape(), (5, 5));
        for r in 0..5 {
            for c in 0..5 {
                let block = src.slice(s![2 * r..2 * r + 2, 2 * c..2 * c + 2]);
                let mean = block.sum() / 4.0;
                assert_relative_eq!(result.data[(r, c)], mean, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_destination_outside_source_is_nodata() {
        let src = ramp(4, 4);
        let src_grid = grid(6000040.0, 10.0, 4, 4);
        // Far to the north of the source
        let dst_grid = grid(7000000.0, 10.0, 4, 4);
        let opts = WarpOptions {
            nodata: Some(-1.0),
            ..WarpOptions::default()
        };

        let result =
            warp_buffer(&src.view(), &src_grid, &utm(), &dst_grid, &utm(), &opts).unwrap();
        assert!(result.data.iter().all(|&v| v == -1.0));
    }

    struct Nowhere;

    impl CoordinateTransformer for Nowhere {
        fn transform(&self, x: f64, y: f64) -> std::result::Result<(f64, f64), Unmappable> {
            Err(Unmappable {
                x,
                y,
                reason: "test".into(),
            })
        }
    }

    #[test]
    fn test_unmappable_points_become_nodata() {
        let src = MemoryRaster::from_f64("s", grid(6000040.0, 10.0, 4, 4), utm(), ramp(4, 4), None)
            .unwrap();
        let ctx = Context::with_transformer(
            *src.grid(),
            *src.grid(),
            Box::new(Nowhere),
            &WarpOptions::default(),
        )
        .unwrap();
        let out = ctx.warp_to_buffer(&src).unwrap();
        assert!(out.data.iter().all(|v| v.is_nan()));
    }

    struct FailingSource(MemoryRaster);

    impl RasterSource for FailingSource {
        fn id(&self) -> &str {
            "broken"
        }
        fn grid(&self) -> &GeoGrid {
            self.0.grid()
        }
        fn reference_system(&self) -> &ReferenceSystem {
            self.0.reference_system()
        }
        fn data_type(&self) -> DataType {
            DataType::Float64
        }
        fn nodata(&self) -> Option<f64> {
            None
        }
        fn read(&self, _region: &Region) -> std::result::Result<Array2<f64>, IoError> {
            Err(IoError::UnsupportedFormat("corrupt block".into()))
        }
    }

    #[test]
    fn test_failing_source_is_unreadable() {
        let inner = MemoryRaster::from_f64("s", grid(6000040.0, 10.0, 4, 4), utm(), ramp(4, 4), None)
            .unwrap();
        let source = FailingSource(inner);
        let store = MemoryRasterStore::new();
        let mut sink = store
            .open_writable("out", source.grid(), &utm(), DataType::Float64, &WriteOptions::default())
            .unwrap();

        let ctx =
            Context::with_transformer(*source.grid(), *source.grid(), Box::new(Identity), &WarpOptions::default())
                .unwrap();
        let mut exec = WarpExecutor::new(ctx);
        let err = exec.run(&source, sink.as_mut()).unwrap_err();
        assert!(matches!(err, Error::SourceUnreadable { ref id, .. } if id == "broken"));
        assert_eq!(exec.state(), WarpState::Failed);
    }

    struct RejectingSink(GeoGrid);

    impl RasterSink for RejectingSink {
        fn id(&self) -> &str {
            "readonly"
        }
        fn grid(&self) -> &GeoGrid {
            &self.0
        }
        fn data_type(&self) -> DataType {
            DataType::Float32
        }
        fn nodata(&self) -> Option<f64> {
            None
        }
        fn write(&mut self, _: &Region, _: &TypedBuffer) -> std::result::Result<(), IoError> {
            Err(IoError::PermissionDenied("readonly".into()))
        }
    }

    #[test]
    fn test_rejecting_sink_is_unwritable() {
        let source = MemoryRaster::from_f64("s", grid(6000040.0, 10.0, 4, 4), utm(), ramp(4, 4), None)
            .unwrap();
        let mut sink = RejectingSink(*source.grid());
        let ctx = Context::new(*source.grid(), &utm(), *source.grid(), &utm(), &WarpOptions::default())
            .unwrap();
        let mut exec = WarpExecutor::new(ctx);
        let err = exec.run(&source, &mut sink).unwrap_err();
        assert!(matches!(err, Error::DestinationUnwritable { .. }));
    }

    #[test]
    fn test_executor_runs_once() {
        let g = grid(6000040.0, 10.0, 4, 4);
        let source = MemoryRaster::from_f64("s", g, utm(), ramp(4, 4), None).unwrap();
        let store = MemoryRasterStore::new();
        let mut sink = store
            .open_writable("out", &g, &utm(), DataType::UInt8, &WriteOptions::default())
            .unwrap();

        let ctx = Context::new(g, &utm(), g, &utm(), &WarpOptions::default()).unwrap();
        let mut exec = WarpExecutor::new(ctx);
        assert_eq!(exec.state(), WarpState::Initialized);
        let summary = exec.run(&source, sink.as_mut()).unwrap();
        assert_eq!(summary.tiles, 1);
        assert_eq!(exec.state(), WarpState::Completed);

        let written = store.get("out").unwrap();
        assert_eq!(written.data(), &TypedBuffer::UInt8(ramp(4, 4).mapv(|v| v as u8)));

        assert!(matches!(
            exec.run(&source, sink.as_mut()),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_narrowing_overflow_fails_the_run() {
        let g = grid(6000020.0, 10.0, 2, 2);
        let source =
            MemoryRaster::from_f64("s", g, utm(), array![[1.0, 2.0], [300.0, 4.0]], None).unwrap();
        let store = MemoryRasterStore::new();
        let mut sink = store
            .open_writable("out", &g, &utm(), DataType::UInt8, &WriteOptions::default())
            .unwrap();
        let ctx = Context::new(g, &utm(), g, &utm(), &WarpOptions::default()).unwrap();
        let err = WarpExecutor::new(ctx).run(&source, sink.as_mut()).unwrap_err();
        assert!(matches!(
            err,
            Error::ValueOutOfRange { row: 1, col: 0, dtype: DataType::UInt8, .. }
        ));
    }

    #[test]
    fn test_reprojection_utm_to_geographic() {
        // A constant field survives reprojection wherever it is covered
        let src_grid = grid(6650000.0, 100.0, 100, 100);
        let src = Array2::from_elem((100, 100), 5.0);
        let wgs84 = ProjResolver.resolve("EPSG:4326").unwrap();
        let dst_grid =
            GeoGrid::new(Affine::north_up(14.95, 59.95, 0.002, -0.002), 40, 40).unwrap();

        let opts = WarpOptions::with_kernel(ResampleKernel::Bilinear);
        let out = warp_buffer(&src.view(), &src_grid, &utm(), &dst_grid, &wgs84, &opts).unwrap();
        let valid: Vec<f64> = out.data.iter().copied().filter(|v| !v.is_nan()).collect();
        assert!(!valid.is_empty());
        assert!(valid.iter().all(|&v| (v - 5.0).abs() < 1e-9));
    }

    #[test]
    fn test_output_independent_of_tiling_and_threads() {
        let wgs84 = ProjResolver.resolve("EPSG:4326").unwrap();
        let src_grid = grid(6600000.0, 100.0, 120, 120);
        let src = Array2::from_shape_fn((120, 120), |(r, c)| {
            ((r * 7 + c * 3) % 50) as f64 + 0.25 * c as f64
        });
        let to_wgs84 = transformer_between(&utm(), &wgs84);
        let bounds = src_grid.projected_bounds(to_wgs84.as_ref(), 21).unwrap();
        let dst_grid = GeoGrid::from_bounds_size(&bounds, 60, 60).unwrap();

        for kernel in ResampleKernel::ALL {
            let whole = WarpOptions {
                chunk_size: (1000, 1000),
                threads: ThreadBudget::Count(1),
                ..WarpOptions::with_kernel(kernel)
            };
            let tiled = WarpOptions {
                chunk_size: (7, 5),
                threads: ThreadBudget::Count(3),
                ..WarpOptions::with_kernel(kernel)
            };
            let a = warp_buffer(&src.view(), &src_grid, &utm(), &dst_grid, &wgs84, &whole).unwrap();
            let b = warp_buffer(&src.view(), &src_grid, &utm(), &dst_grid, &wgs84, &tiled).unwrap();
            assert!(a.valid_count() > 1000, "{kernel} left the destination empty");
            for ((idx, x), y) in a.data.indexed_iter().zip(b.data.iter()) {
                if x.is_nan() || y.is_nan() {
                    assert!(x.is_nan() && y.is_nan(), "{kernel} at {idx:?}: {x} vs {y}");
                } else {
                    assert!((x - y).abs() <= 1e-9 * x.abs().max(1.0), "{kernel} at {idx:?}: {x} vs {y}");
                }
            }
        }
    }

    #[test]
    fn test_batches_arrive_in_plan_order() {
        let g = grid(6000160.0, 10.0, 16, 16);
        let source = MemoryRaster::from_f64("s", g, utm(), ramp(16, 16), None).unwrap();
        let opts = WarpOptions {
            chunk_size: (4, 4),
            ..WarpOptions::default()
        };
        let ctx = Context::new(g, &utm(), g, &utm(), &opts).unwrap();
        let pool = ThreadBudget::Count(2).build_pool().unwrap();

        let mut seen = Vec::new();
        let tiles = ctx
            .warp_in_batches(&pool, &source, |tile| {
                seen.push(tile.region);
                Ok(())
            })
            .unwrap();
        assert_eq!(tiles, 16);
        let planned: Vec<Region> = ctx.plan().unwrap().iter().map(|p| p.dst_region).collect();
        assert_eq!(seen, planned);

        // The first failing tile stops the run
        let mut emitted = 0;
        let err = ctx
            .warp_in_batches(&pool, &source, |_| {
                emitted += 1;
                if emitted == 3 {
                    return Err(Error::InvalidParameter("stop".into()));
                }
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter(_)));
        assert_eq!(emitted, 3);
    }

    #[test]
    fn test_executor_writes_every_tile() {
        let g = grid(6000100.0, 10.0, 10, 10);
        let source = MemoryRaster::from_f64("s", g, utm(), ramp(10, 10), None).unwrap();
        let store = MemoryRasterStore::new();
        let mut sink = store
            .open_writable("out", &g, &utm(), DataType::Float64, &WriteOptions::default())
            .unwrap();
        let opts = WarpOptions {
            chunk_size: (3, 4),
            threads: ThreadBudget::Count(1),
            ..WarpOptions::default()
        };
        let ctx = Context::new(g, &utm(), g, &utm(), &opts).unwrap();
        let summary = WarpExecutor::new(ctx).run(&source, sink.as_mut()).unwrap();
        assert_eq!(summary.tiles, 12);
        assert_eq!(summary.tiles_with_data, 12);
        assert_eq!(store.get("out").unwrap().data().to_f64(), ramp(10, 10));
    }
}
