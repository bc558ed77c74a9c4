//! Burning polygon features into a sample buffer.
//!
//! Geometries are mapped into corner-based pixel space through the grid's
//! inverse transform, so rotated grids rasterize the same way as north-up ones.

use geo_types::{Geometry, LineString, Polygon};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::buffer::{narrow_one, Pixel, SampleBuffer};
use crate::error::{Error, Result};
use crate::grid::{BoundingBox, GeoGrid};
use crate::io::{AttributeValue, Feature};

/// Where the burned value comes from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurnValue {
    Constant(f64),
    /// Numeric attribute of each feature.
    Attribute(String),
}

/// Which pixels a polygon covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BurnRule {
    /// Pixels whose center lies inside the polygon.
    #[default]
    CenterPoint,
    /// Center pixels plus every pixel whose interior an edge passes through.
    AllTouched,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RasterizeSummary {
    pub features_burned: usize,
    pub features_skipped: usize,
    pub pixels_written: usize,
}

type Ring = Vec<(f64, f64)>;

/// Pixel window `[row0, row1) x [col0, col1)` with a coverage mask.
struct Coverage {
    row0: usize,
    col0: usize,
    mask: Array2<bool>,
}

impl Coverage {
    fn new(row0: usize, row1: usize, col0: usize, col1: usize) -> Self {
        Self {
            row0,
            col0,
            mask: Array2::from_elem((row1 - row0, col1 - col0), false),
        }
    }

    fn rows(&self) -> std::ops::Range<usize> {
        self.row0..self.row0 + self.mask.nrows()
    }

    fn cols(&self) -> std::ops::Range<usize> {
        self.col0..self.col0 + self.mask.ncols()
    }

    fn mark(&mut self, row: usize, col: usize) {
        self.mask[(row - self.row0, col - self.col0)] = true;
    }

    fn covered(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.mask
            .indexed_iter()
            .filter(|(_, &hit)| hit)
            .map(|((r, c), _)| (r + self.row0, c + self.col0))
    }
}

/// Burn `features` into `buffer` in input order, later features painting
/// over earlier ones.
///
/// Only covered pixels are written; the rest of the buffer is left as the
/// caller initialized it.
pub fn rasterize<T: Pixel>(
    grid: &GeoGrid,
    buffer: &mut SampleBuffer<T>,
    features: &[Feature],
    burn: &BurnValue,
    rule: BurnRule,
) -> Result<RasterizeSummary> {
    if buffer.shape() != grid.shape() {
        return Err(Error::InvalidParameter(format!(
            "Buffer shape {:?} does not match grid shape {:?}",
            buffer.shape(),
            grid.shape()
        )));
    }

    let mut summary = RasterizeSummary::default();
    for (index, feature) in features.iter().enumerate() {
        let polygons = pixel_polygons(grid, &feature.geometry, index)?;

        let value = match burn {
            BurnValue::Constant(v) => *v,
            BurnValue::Attribute(name) => {
                match feature.attribute(name).and_then(AttributeValue::as_f64) {
                    Some(v) => v,
                    None => {
                        debug!(feature = index, attribute = %name, "Skipping feature without numeric burn attribute");
                        summary.features_skipped += 1;
                        continue;
                    }
                }
            }
        };

        let Some(mut coverage) = window_for(&polygons, grid) else {
            trace!(feature = index, "Feature lies outside the grid");
            summary.features_burned += 1;
            continue;
        };
        for rings in &polygons {
            scan_centers(rings, &mut coverage);
            if rule == BurnRule::AllTouched {
                for ring in rings {
                    for edge in ring.windows(2) {
                        mark_edge(edge[0], edge[1], &mut coverage);
                    }
                }
            }
        }

        let mut cast: Option<T> = None;
        for (row, col) in coverage.covered() {
            let v = match cast {
                Some(v) => v,
                None => {
                    let v = narrow_one::<T>(value, T::DATA_TYPE, row, col)?;
                    cast = Some(v);
                    v
                }
            };
            buffer.data[(row, col)] = v;
            summary.pixels_written += 1;
        }
        summary.features_burned += 1;
    }

    debug!(
        burned = summary.features_burned,
        skipped = summary.features_skipped,
        pixels = summary.pixels_written,
        "Rasterized features"
    );
    Ok(summary)
}

/// Burnable polygons of a feature's geometry.
fn world_polygons(geometry: &Geometry<f64>, index: usize) -> Result<Vec<Polygon<f64>>> {
    match geometry {
        Geometry::Polygon(p) => Ok(vec![p.clone()]),
        Geometry::MultiPolygon(mp) => Ok(mp.0.clone()),
        Geometry::Rect(r) => Ok(vec![r.to_polygon()]),
        Geometry::Triangle(t) => Ok(vec![t.to_polygon()]),
        Geometry::Point(_) => Err(unsupported(index, "point")),
        Geometry::Line(_) => Err(unsupported(index, "line")),
        Geometry::LineString(_) => Err(unsupported(index, "linestring")),
        Geometry::MultiPoint(_) => Err(unsupported(index, "multipoint")),
        Geometry::MultiLineString(_) => Err(unsupported(index, "multilinestring")),
        Geometry::GeometryCollection(_) => Err(unsupported(index, "geometry collection")),
    }
}

/// Polygons of a feature as closed pixel-space rings, exterior first.
fn pixel_polygons(grid: &GeoGrid, geometry: &Geometry<f64>, index: usize) -> Result<Vec<Vec<Ring>>> {
    world_polygons(geometry, index)?
        .iter()
        .map(|p| {
            std::iter::once(p.exterior())
                .chain(p.interiors())
                .map(|ring| pixel_ring(grid, ring, index))
                .collect::<Result<Vec<_>>>()
        })
        .collect()
}

/// Union extent of the exterior rings of every feature, `None` when empty.
pub fn layer_bounds(features: &[Feature]) -> Result<Option<BoundingBox>> {
    let mut bounds: Option<BoundingBox> = None;
    for (index, feature) in features.iter().enumerate() {
        for polygon in world_polygons(&feature.geometry, index)? {
            let mut points = Vec::with_capacity(polygon.exterior().0.len());
            for c in &polygon.exterior().0 {
                if !c.x.is_finite() || !c.y.is_finite() {
                    return Err(non_finite(index, c.x, c.y));
                }
                points.push((c.x, c.y));
            }
            if let Some(b) = BoundingBox::from_points(points) {
                bounds = Some(match bounds {
                    Some(acc) => acc.union(&b),
                    None => b,
                });
            }
        }
    }
    Ok(bounds)
}

fn unsupported(index: usize, kind: &str) -> Error {
    Error::InvalidGeometry(format!("feature {index}: cannot rasterize a {kind}"))
}

fn non_finite(index: usize, x: f64, y: f64) -> Error {
    Error::InvalidGeometry(format!("feature {index}: non-finite coordinate ({x}, {y})"))
}

fn pixel_ring(grid: &GeoGrid, ring: &LineString<f64>, index: usize) -> Result<Ring> {
    let mut out = Vec::with_capacity(ring.0.len() + 1);
    for c in &ring.0 {
        if !c.x.is_finite() || !c.y.is_finite() {
            return Err(non_finite(index, c.x, c.y));
        }
        out.push(grid.to_pixel(c.x, c.y));
    }
    if let (Some(&first), Some(&last)) = (out.first(), out.last()) {
        if first != last {
            out.push(first);
        }
    }
    Ok(out)
}

/// Pixel window touched by the polygons' bounding box, clipped to the grid.
fn window_for(polygons: &[Vec<Ring>], grid: &GeoGrid) -> Option<Coverage> {
    let mut xs = (f64::INFINITY, f64::NEG_INFINITY);
    let mut ys = (f64::INFINITY, f64::NEG_INFINITY);
    for &(x, y) in polygons.iter().flatten().flatten() {
        xs = (xs.0.min(x), xs.1.max(x));
        ys = (ys.0.min(y), ys.1.max(y));
    }
    if xs.0 > xs.1 || ys.0 > ys.1 {
        return None;
    }
    let (w, h) = (grid.width() as f64, grid.height() as f64);
    let col0 = xs.0.floor().clamp(0.0, w) as usize;
    let col1 = xs.1.ceil().clamp(0.0, w) as usize;
    let row0 = ys.0.floor().clamp(0.0, h) as usize;
    let row1 = ys.1.ceil().clamp(0.0, h) as usize;
    if col0 >= col1 || row0 >= row1 {
        return None;
    }
    Some(Coverage::new(row0, row1, col0, col1))
}

/// Even-odd scanline through the pixel-center row of every row in the window.
fn scan_centers(rings: &[Ring], coverage: &mut Coverage) {
    let cols = coverage.cols();
    let mut crossings = Vec::new();
    for row in coverage.rows() {
        let y = row as f64 + 0.5;
        crossings.clear();
        for ring in rings {
            for edge in ring.windows(2) {
                let ((xi, yi), (xj, yj)) = (edge[0], edge[1]);
                if (yi > y) != (yj > y) {
                    crossings.push(xi + (y - yi) * (xj - xi) / (yj - yi));
                }
            }
        }
        crossings.sort_by(f64::total_cmp);

        for span in crossings.chunks_exact(2) {
            let first = (span[0] - 0.5).ceil().max(cols.start as f64);
            let end = (span[1] - 0.5).ceil().min(cols.end as f64);
            if first >= end {
                continue;
            }
            for col in first as usize..end as usize {
                coverage.mark(row, col);
            }
        }
    }
}

/// Mark every pixel whose open interior the segment `p`-`q` passes through.
fn mark_edge(p: (f64, f64), q: (f64, f64), coverage: &mut Coverage) {
    let rows = coverage.rows();
    let cols = coverage.cols();
    let (xmin, xmax) = (cols.start as f64, cols.end as f64);

    let row_first = p.1.min(q.1).floor().max(rows.start as f64);
    let row_last = p.1.max(q.1).floor().min(rows.end as f64 - 1.0);
    if row_first > row_last {
        return;
    }

    for row in row_first as usize..=row_last as usize {
        let top = row as f64;
        let Some((t0, t1)) = clip_segment(p, q, (xmin, xmax), (top, top + 1.0)) else {
            continue;
        };
        let xa = p.0 + t0 * (q.0 - p.0);
        let xb = p.0 + t1 * (q.0 - p.0);
        let col_first = xa.min(xb).floor().max(xmin);
        let col_last = xa.max(xb).floor().min(xmax - 1.0);
        if col_first > col_last {
            continue;
        }
        for col in col_first as usize..=col_last as usize {
            if crosses_interior(p, q, row, col) {
                coverage.mark(row, col);
            }
        }
    }
}

fn crosses_interior(p: (f64, f64), q: (f64, f64), row: usize, col: usize) -> bool {
    let (left, top) = (col as f64, row as f64);
    let Some((t0, t1)) = clip_segment(p, q, (left, left + 1.0), (top, top + 1.0)) else {
        return false;
    };
    if t1 - t0 <= 1e-12 {
        return false;
    }
    let t = 0.5 * (t0 + t1);
    let mx = p.0 + t * (q.0 - p.0);
    let my = p.1 + t * (q.1 - p.1);
    mx > left && mx < left + 1.0 && my > top && my < top + 1.0
}

/// Liang-Barsky clip of `p`-`q` against an axis-aligned box, as the
/// parameter interval `[t0, t1]` inside it.
fn clip_segment(
    p: (f64, f64),
    q: (f64, f64),
    (xmin, xmax): (f64, f64),
    (ymin, ymax): (f64, f64),
) -> Option<(f64, f64)> {
    let dx = q.0 - p.0;
    let dy = q.1 - p.1;
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    for (pk, qk) in [
        (-dx, p.0 - xmin),
        (dx, xmax - p.0),
        (-dy, p.1 - ymin),
        (dy, ymax - p.1),
    ] {
        if pk == 0.0 {
            if qk < 0.0 {
                return None;
            }
            continue;
        }
        let r = qk / pk;
        if pk < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    Some((t0, t1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::affine::Affine;
    use geo_types::{coord, point, polygon, Rect, Triangle};

    fn unit_grid() -> GeoGrid {
        GeoGrid::new(Affine::north_up(0.0, 10.0, 1.0, -1.0), 10, 10).unwrap()
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Feature {
        Feature::new(Rect::new(coord! { x: x0, y: y0 }, coord! { x: x1, y: y1 }))
    }

    fn burned(buf: &SampleBuffer<f64>) -> usize {
        buf.data.iter().filter(|&&v| v != 0.0).count()
    }

    #[test]
    fn test_aligned_rect_center_point() {
        let grid = unit_grid();
        let mut buf = SampleBuffer::filled(grid.shape(), 0.0, Some(0.0));
        let summary = rasterize(
            &grid,
            &mut buf,
            &[rect(2.0, 2.0, 5.0, 5.0)],
            &BurnValue::Constant(1.0),
            BurnRule::CenterPoint,
        )
        .unwrap();

        assert_eq!(summary.pixels_written, 9);
        assert_eq!(burned(&buf), 9);
        // World (2..5, 2..5) is rows 5..8, cols 2..5
        assert_eq!(buf.data[(5, 2)], 1.0);
        assert_eq!(buf.data[(7, 4)], 1.0);
        assert_eq!(buf.data[(4, 2)], 0.0);
        assert_eq!(buf.data[(5, 5)], 0.0);
    }

    #[test]
    fn test_aligned_rect_all_touched_matches_center() {
        let grid = unit_grid();
        let mut buf = SampleBuffer::filled(grid.shape(), 0.0, Some(0.0));
        rasterize(
            &grid,
            &mut buf,
            &[rect(2.0, 2.0, 5.0, 5.0)],
            &BurnValue::Constant(1.0),
            BurnRule::AllTouched,
        )
        .unwrap();
        // Edges on pixel boundaries do not cross any open interior
        assert_eq!(burned(&buf), 9);
    }

    #[test]
    fn test_all_touched_is_superset() {
        let grid = unit_grid();
        let tri = Feature::new(Triangle::new(
            coord! { x: 0.2, y: 0.2 },
            coord! { x: 3.7, y: 0.2 },
            coord! { x: 0.2, y: 3.7 },
        ));

        let mut center = SampleBuffer::filled(grid.shape(), 0.0, Some(0.0));
        rasterize(&grid, &mut center, &[tri.clone()], &BurnValue::Constant(1.0), BurnRule::CenterPoint)
            .unwrap();
        let mut touched = SampleBuffer::filled(grid.shape(), 0.0, Some(0.0));
        rasterize(&grid, &mut touched, &[tri], &BurnValue::Constant(1.0), BurnRule::AllTouched)
            .unwrap();

        assert_eq!(burned(&center), 6);
        assert!(burned(&touched) > burned(&center));
        for ((r, c), &v) in center.data.indexed_iter() {
            if v != 0.0 {
                assert_eq!(touched.data[(r, c)], 1.0, "pixel ({r}, {c})");
            }
        }
        // Hypotenuse crosses world cell (3..4, 0..1) without covering its center
        assert_eq!(center.data[(9, 3)], 0.0);
        assert_eq!(touched.data[(9, 3)], 1.0);
    }

    #[test]
    fn test_holes_are_respected() {
        let grid = unit_grid();
        let donut = polygon!(
            exterior: [
                (x: 0.0, y: 0.0),
                (x: 6.0, y: 0.0),
                (x: 6.0, y: 6.0),
                (x: 0.0, y: 6.0),
            ],
            interiors: [[
                (x: 2.0, y: 2.0),
                (x: 4.0, y: 2.0),
                (x: 4.0, y: 4.0),
                (x: 2.0, y: 4.0),
            ]],
        );
        let mut buf = SampleBuffer::filled(grid.shape(), 0.0, Some(0.0));
        rasterize(&grid, &mut buf, &[Feature::new(donut)], &BurnValue::Constant(5.0), BurnRule::CenterPoint)
            .unwrap();

        assert_eq!(burned(&buf), 32);
        // Hole cell world (2..3, 2..3): row 7, col 2
        assert_eq!(buf.data[(7, 2)], 0.0);
        assert_eq!(buf.data[(9, 0)], 5.0);
    }

    #[test]
    fn test_painters_order() {
        let grid = unit_grid();
        let features = [
            rect(0.0, 0.0, 3.0, 3.0).with_attribute("v", AttributeValue::Integer(1)),
            rect(2.0, 2.0, 5.0, 5.0).with_attribute("v", AttributeValue::Real(2.0)),
        ];
        let mut buf = SampleBuffer::filled(grid.shape(), 0.0, Some(0.0));
        let summary = rasterize(
            &grid,
            &mut buf,
            &features,
            &BurnValue::Attribute("v".into()),
            BurnRule::CenterPoint,
        )
        .unwrap();

        assert_eq!(summary.features_burned, 2);
        assert_eq!(summary.pixels_written, 18);
        assert_eq!(buf.data[(7, 2)], 2.0);
        assert_eq!(buf.data[(9, 0)], 1.0);
        assert_eq!(buf.data[(5, 4)], 2.0);
    }

    #[test]
    fn test_missing_attribute_is_skipped() {
        let grid = unit_grid();
        let features = [
            rect(0.0, 0.0, 2.0, 2.0).with_attribute("v", AttributeValue::Text("high".into())),
            rect(4.0, 4.0, 6.0, 6.0).with_attribute("v", AttributeValue::Integer(3)),
            rect(7.0, 7.0, 9.0, 9.0),
        ];
        let mut buf = SampleBuffer::filled(grid.shape(), 0.0, Some(0.0));
        let summary = rasterize(
            &grid,
            &mut buf,
            &features,
            &BurnValue::Attribute("v".into()),
            BurnRule::CenterPoint,
        )
        .unwrap();

        assert_eq!(summary.features_skipped, 2);
        assert_eq!(summary.features_burned, 1);
        assert_eq!(burned(&buf), 4);
    }

    #[test]
    fn test_partially_outside_is_clipped() {
        let grid = unit_grid();
        let mut buf = SampleBuffer::filled(grid.shape(), 0.0, Some(0.0));
        rasterize(&grid, &mut buf, &[rect(-5.0, -5.0, 2.0, 2.0)], &BurnValue::Constant(1.0), BurnRule::AllTouched)
            .unwrap();
        assert_eq!(burned(&buf), 4);

        let mut buf = SampleBuffer::filled(grid.shape(), 0.0, Some(0.0));
        let summary = rasterize(
            &grid,
            &mut buf,
            &[rect(20.0, 20.0, 30.0, 30.0)],
            &BurnValue::Constant(1.0),
            BurnRule::CenterPoint,
        )
        .unwrap();
        assert_eq!(summary.pixels_written, 0);
    }

    #[test]
    fn test_unsupported_geometry_names_feature() {
        let grid = unit_grid();
        let features = [rect(0.0, 0.0, 1.0, 1.0), Feature::new(point!(x: 1.0, y: 1.0))];
        let mut buf = SampleBuffer::filled(grid.shape(), 0.0, None);
        let err = rasterize(&grid, &mut buf, &features, &BurnValue::Constant(1.0), BurnRule::CenterPoint)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry(msg) if msg.contains("feature 1")));
    }

    #[test]
    fn test_non_finite_coordinate() {
        let grid = unit_grid();
        let bad = polygon![(x: 0.0, y: 0.0), (x: f64::NAN, y: 1.0), (x: 1.0, y: 1.0)];
        let mut buf = SampleBuffer::filled(grid.shape(), 0.0, None);
        let err = rasterize(&grid, &mut buf, &[Feature::new(bad)], &BurnValue::Constant(1.0), BurnRule::CenterPoint)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGeometry(msg) if msg.contains("feature 0")));
    }

    #[test]
    fn test_unrepresentable_burn_value() {
        let grid = unit_grid();
        let mut buf = SampleBuffer::<u8>::filled(grid.shape(), 0, Some(0));
        let err = rasterize(
            &grid,
            &mut buf,
            &[rect(2.0, 2.0, 5.0, 5.0)],
            &BurnValue::Constant(300.0),
            BurnRule::CenterPoint,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::ValueOutOfRange { row: 5, col: 2, .. }
        ));
        assert!(buf.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_layer_bounds() {
        let features = [rect(1.0, 2.0, 3.0, 4.0), rect(-1.0, 3.0, 2.0, 8.0)];
        let b = layer_bounds(&features).unwrap().unwrap();
        assert_eq!((b.xmin, b.ymin, b.xmax, b.ymax), (-1.0, 2.0, 3.0, 8.0));
        assert!(layer_bounds(&[]).unwrap().is_none());
        assert!(layer_bounds(&[Feature::new(point!(x: 0.0, y: 0.0))]).is_err());
    }

    #[test]
    fn test_shape_mismatch() {
        let grid = unit_grid();
        let mut buf = SampleBuffer::filled((3, 3), 0.0, None);
        assert!(matches!(
            rasterize(&grid, &mut buf, &[], &BurnValue::Constant(1.0), BurnRule::CenterPoint),
            Err(Error::InvalidParameter(_))
        ));
    }
}
