//! Chunk planner: maps destination tiles to source ROIs for chunked reprojection.

use crate::error::{Error, Result};
use crate::grid::{GeoGrid, Region};
use crate::proj::CoordinateTransformer;
use crate::resample::ResampleKernel;

/// A plan for reprojecting a single destination tile.
#[derive(Clone, Debug, PartialEq)]
pub struct TilePlan {
    /// Destination tile window.
    pub dst_region: Region,
    /// Source ROI with halo, clipped to source bounds. `None` when the tile
    /// has no source coverage.
    pub src_region: Option<Region>,
    /// Largest source-per-destination pixel ratio sampled on the tile
    /// boundary, per axis. Sizes the halo.
    pub scale: (f64, f64),
}

impl TilePlan {
    /// Whether the source ROI has valid coverage.
    pub fn has_data(&self) -> bool {
        self.src_region.is_some()
    }

    /// Shape of this destination tile (rows, cols).
    pub fn dst_tile_shape(&self) -> (usize, usize) {
        (self.dst_region.height, self.dst_region.width)
    }
}

/// Generate sample points along the boundary of a rectangular tile.
///
/// Returns (col, row) pairs at pixel centers along all 4 edges.
fn tile_boundary_points(region: &Region, pts_per_edge: usize) -> Vec<(f64, f64)> {
    let pts = pts_per_edge.max(2);
    let mut points = Vec::with_capacity(pts * 4);

    let r0 = region.row_off as f64 + 0.5;
    let r1 = (region.row_off + region.height) as f64 - 0.5;
    let c0 = region.col_off as f64 + 0.5;
    let c1 = (region.col_off + region.width) as f64 - 0.5;

    // Handle degenerate tiles (1 pixel wide/tall)
    let row_step = if r1 > r0 {
        (r1 - r0) / (pts - 1) as f64
    } else {
        0.0
    };
    let col_step = if c1 > c0 {
        (c1 - c0) / (pts - 1) as f64
    } else {
        0.0
    };

    // Top and bottom edges: col varies
    for i in 0..pts {
        let c = (c0 + col_step * i as f64).min(c1);
        points.push((c, r0));
        points.push((c, r1.max(r0)));
    }
    // Left and right edges: row varies (skip corners already covered)
    for i in 1..pts - 1 {
        let r = r0 + row_step * i as f64;
        points.push((c0, r));
        points.push((c1.max(c0), r));
    }

    points
}

/// Map a destination pixel position to source pixel space.
pub(crate) fn to_source_pixel(
    src_grid: &GeoGrid,
    dst_grid: &GeoGrid,
    transformer: &dyn CoordinateTransformer,
    col: f64,
    row: f64,
) -> Option<(f64, f64)> {
    let (dx, dy) = dst_grid.to_world(col, row);
    let (sx, sy) = transformer.transform(dx, dy).ok()?;
    let (sc, sr) = src_grid.to_pixel(sx, sy);
    (sc.is_finite() && sr.is_finite()).then_some((sc, sr))
}

/// Length of the source-space step between two mapped positions.
pub(crate) fn step_length(from: (f64, f64), to: (f64, f64)) -> Option<f64> {
    let d = (to.0 - from.0).hypot(to.1 - from.1);
    (d.is_finite() && d > 0.0).then_some(d)
}

/// Source-per-destination pixel ratio at destination position `(col, row)`,
/// from the forward differences of the mapping. Falls back to the backward
/// difference where the forward neighbour cannot be mapped.
pub(crate) fn local_scale(
    src_grid: &GeoGrid,
    dst_grid: &GeoGrid,
    transformer: &dyn CoordinateTransformer,
    col: f64,
    row: f64,
) -> Option<(f64, f64)> {
    let here = to_source_pixel(src_grid, dst_grid, transformer, col, row)?;
    let step = |dc: f64, dr: f64| {
        let forward = to_source_pixel(src_grid, dst_grid, transformer, col + dc, row + dr);
        forward
            .and_then(|p| step_length(here, p))
            .or_else(|| {
                to_source_pixel(src_grid, dst_grid, transformer, col - dc, row - dr)
                    .and_then(|p| step_length(p, here))
            })
    };
    Some((step(1.0, 0.0)?, step(0.0, 1.0)?))
}

/// Plan tile-level reprojection from source to destination grids.
///
/// Divides the destination grid into tiles of `tile_size` (rows, cols) and for
/// each tile computes the corresponding source ROI, padded by the kernel halo.
/// `transformer` maps destination world coordinates to source world
/// coordinates.
pub fn plan_tiles(
    src_grid: &GeoGrid,
    dst_grid: &GeoGrid,
    transformer: &dyn CoordinateTransformer,
    tile_size: (usize, usize),
    kernel: ResampleKernel,
    pts_per_edge: usize,
) -> Result<Vec<TilePlan>> {
    let (dst_rows, dst_cols) = dst_grid.shape();
    let (src_rows, src_cols) = src_grid.shape();
    let (tile_h, tile_w) = tile_size;

    if tile_h == 0 || tile_w == 0 {
        return Err(Error::InvalidParameter("Tile size must be > 0".into()));
    }

    let mut plans = Vec::new();

    let mut row0 = 0;
    while row0 < dst_rows {
        let row1 = (row0 + tile_h).min(dst_rows);

        let mut col0 = 0;
        while col0 < dst_cols {
            let col1 = (col0 + tile_w).min(dst_cols);
            let dst_region = Region::new(col0, row0, col1 - col0, row1 - row0);

            let mut min_src_col = f64::INFINITY;
            let mut max_src_col = f64::NEG_INFINITY;
            let mut min_src_row = f64::INFINITY;
            let mut max_src_row = f64::NEG_INFINITY;
            let mut valid_count = 0usize;
            let mut sampled_scale: Option<(f64, f64)> = None;

            for (col_px, row_px) in tile_boundary_points(&dst_region, pts_per_edge) {
                if let Some((sc, sr)) =
                    to_source_pixel(src_grid, dst_grid, transformer, col_px, row_px)
                {
                    min_src_col = min_src_col.min(sc);
                    max_src_col = max_src_col.max(sc);
                    min_src_row = min_src_row.min(sr);
                    max_src_row = max_src_row.max(sr);
                    valid_count += 1;

                    if let Some(s) = local_scale(src_grid, dst_grid, transformer, col_px, row_px) {
                        sampled_scale = Some(match sampled_scale {
                            Some(m) => (m.0.max(s.0), m.1.max(s.1)),
                            None => s,
                        });
                    }
                }
            }

            let scale = sampled_scale
                .or_else(|| {
                    // Fall back to the extent ratio of the mapped boundary
                    (valid_count > 1).then(|| {
                        (
                            ((max_src_col - min_src_col) / dst_region.width as f64).max(1e-9),
                            ((max_src_row - min_src_row) / dst_region.height as f64).max(1e-9),
                        )
                    })
                })
                .unwrap_or((1.0, 1.0));

            let src_region = if valid_count == 0 {
                // No valid projections, tile is outside the source extent
                None
            } else {
                // Expand by kernel radius (halo) and clip to the source
                let halo = kernel.kernel_radius(scale).ceil();
                let clip = |v: f64, max: usize| v.clamp(0.0, max as f64) as usize;
                let sr0 = clip((min_src_row - halo).floor(), src_rows);
                let sr1 = clip((max_src_row + halo).ceil() + 1.0, src_rows);
                let sc0 = clip((min_src_col - halo).floor(), src_cols);
                let sc1 = clip((max_src_col + halo).ceil() + 1.0, src_cols);

                (sr1 > sr0 && sc1 > sc0).then(|| Region::new(sc0, sr0, sc1 - sc0, sr1 - sr0))
            };

            plans.push(TilePlan {
                dst_region,
                src_region,
                scale,
            });

            col0 = col1;
        }
        row0 = row1;
    }

    Ok(plans)
}
