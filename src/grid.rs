//! Discrete pixel grid anchored in world space.

use crate::affine::Affine;
use crate::error::{Error, Result};
use crate::proj::CoordinateTransformer;

/// Axis-aligned world-space extent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BoundingBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Smallest box containing all points. `None` for an empty iterator.
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let mut mins = [f64::INFINITY, f64::INFINITY];
        let mut maxs = [f64::NEG_INFINITY, f64::NEG_INFINITY];
        let mut any = false;
        for (x, y) in points {
            mins[0] = mins[0].min(x);
            mins[1] = mins[1].min(y);
            maxs[0] = maxs[0].max(x);
            maxs[1] = maxs[1].max(y);
            any = true;
        }
        any.then(|| Self::new(mins[0], mins[1], maxs[0], maxs[1]))
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            xmin: self.xmin.min(other.xmin),
            ymin: self.ymin.min(other.ymin),
            xmax: self.xmax.max(other.xmax),
            ymax: self.ymax.max(other.ymax),
        }
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.xmax > self.xmin && self.ymax > self.ymin)
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }
}

/// Rectangular pixel window: (col_off, row_off, width, height).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Region {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl Region {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn as_tuple(&self) -> (usize, usize, usize, usize) {
        (self.col_off, self.row_off, self.width, self.height)
    }

    /// Whether the window fits in a `width` x `height` raster.
    pub fn fits(&self, width: usize, height: usize) -> bool {
        self.col_off + self.width <= width && self.row_off + self.height <= height
    }
}

/// Immutable affine pixel grid.
///
/// Pixel (col, row) covers `[col, col + 1) x [row, row + 1)` in pixel space;
/// its center sits at `(col + 0.5, row + 0.5)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoGrid {
    transform: Affine,
    inverse: Affine,
    width: usize,
    height: usize,
}

impl GeoGrid {
    pub fn new(transform: Affine, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidGeometry(format!(
                "Grid dimensions must be positive, got {width}x{height}"
            )));
        }
        if transform.a == 0.0 || transform.e == 0.0 {
            return Err(Error::InvalidGeometry(format!(
                "Pixel size must be non-zero, got ({}, {})",
                transform.a, transform.e
            )));
        }
        let coeffs = [
            transform.a,
            transform.b,
            transform.c,
            transform.d,
            transform.e,
            transform.f,
        ];
        if coeffs.iter().any(|v| !v.is_finite()) {
            return Err(Error::InvalidGeometry(
                "Affine coefficients must be finite".into(),
            ));
        }
        let inverse = transform.inverse()?;
        Ok(Self {
            transform,
            inverse,
            width,
            height,
        })
    }

    /// North-up grid covering `bbox` with the given positive resolution.
    ///
    /// `width = ceil((xmax - xmin) / res_x)`, `height = ceil((ymax - ymin) / res_y)`.
    pub fn from_bounds_resolution(bbox: &BoundingBox, res_x: f64, res_y: f64) -> Result<Self> {
        check_bounds(bbox)?;
        check_resolution(res_x, res_y)?;
        let width = (bbox.width() / res_x).ceil();
        let height = (bbox.height() / res_y).ceil();
        let transform = Affine::north_up(bbox.xmin, bbox.ymax, res_x, -res_y);
        Self::new(transform, pixel_count(width)?, pixel_count(height)?)
    }

    /// North-up grid covering `bbox` whose pixel edges fall on whole
    /// multiples of the resolution.
    pub fn from_bounds_aligned(bbox: &BoundingBox, res_x: f64, res_y: f64) -> Result<Self> {
        check_bounds(bbox)?;
        check_resolution(res_x, res_y)?;
        let (col0, col1) = ((bbox.xmin / res_x).floor(), (bbox.xmax / res_x).ceil());
        let (row0, row1) = ((bbox.ymin / res_y).floor(), (bbox.ymax / res_y).ceil());
        let transform = Affine::north_up(col0 * res_x, row1 * res_y, res_x, -res_y);
        Self::new(
            transform,
            pixel_count((col1 - col0).max(1.0))?,
            pixel_count((row1 - row0).max(1.0))?,
        )
    }

    /// North-up grid covering `bbox` exactly with `width` x `height` pixels.
    pub fn from_bounds_size(bbox: &BoundingBox, width: usize, height: usize) -> Result<Self> {
        check_bounds(bbox)?;
        if width == 0 || height == 0 {
            return Err(Error::InvalidGeometry(format!(
                "Grid dimensions must be positive, got {width}x{height}"
            )));
        }
        let res_x = bbox.width() / width as f64;
        let res_y = bbox.height() / height as f64;
        let transform = Affine::north_up(bbox.xmin, bbox.ymax, res_x, -res_y);
        Self::new(transform, width, height)
    }

    /// Resolution wins when both components are positive, otherwise the pixel
    /// count is used.
    pub fn from_bounds(
        bbox: &BoundingBox,
        resolution: Option<(f64, f64)>,
        size: Option<(usize, usize)>,
    ) -> Result<Self> {
        match (resolution, size) {
            (Some((rx, ry)), _) if rx > 0.0 && ry > 0.0 => {
                Self::from_bounds_resolution(bbox, rx, ry)
            }
            (_, Some((w, h))) => Self::from_bounds_size(bbox, w, h),
            _ => Err(Error::InvalidGeometry(
                "Either a positive resolution or a pixel count is required".into(),
            )),
        }
    }

    pub fn transform(&self) -> &Affine {
        &self.transform
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// (rows, cols), the ndarray shape of a buffer on this grid.
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn pixel_size(&self) -> (f64, f64) {
        (self.transform.a, self.transform.e)
    }

    pub fn to_world(&self, col: f64, row: f64) -> (f64, f64) {
        self.transform.forward(col, row)
    }

    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        self.inverse.forward(x, y)
    }

    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        self.to_world(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// World extent of the whole grid, including shear.
    pub fn bounds(&self) -> BoundingBox {
        let (w, h) = (self.width as f64, self.height as f64);
        let corners = [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)]
            .map(|(c, r)| self.to_world(c, r));
        BoundingBox::from_points(corners).unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }

    /// Extent of the grid once its edges, sampled at `pts_per_edge` pixel
    /// corners per side, are mapped through `transformer`. Corners that
    /// cannot be mapped are skipped; `None` when none can.
    pub fn projected_bounds(
        &self,
        transformer: &dyn CoordinateTransformer,
        pts_per_edge: usize,
    ) -> Option<BoundingBox> {
        let n = pts_per_edge.max(2);
        let (w, h) = (self.width as f64, self.height as f64);
        let mut edge = Vec::with_capacity(4 * n);
        for i in 0..n {
            let t = i as f64 / (n - 1) as f64;
            edge.push(self.to_world(t * w, 0.0));
            edge.push(self.to_world(t * w, h));
            edge.push(self.to_world(0.0, t * h));
            edge.push(self.to_world(w, t * h));
        }
        let mapped = transformer.transform_points(&edge);
        BoundingBox::from_points(
            mapped
                .into_iter()
                .flatten()
                .filter(|(x, y)| x.is_finite() && y.is_finite()),
        )
    }

    pub fn full_region(&self) -> Region {
        Region::new(0, 0, self.width, self.height)
    }

    /// Grid of a sub-window: origin shifted, pixel size unchanged.
    pub fn window(&self, region: &Region) -> Result<GeoGrid> {
        if region.is_empty() || !region.fits(self.width, self.height) {
            return Err(Error::InvalidGeometry(format!(
                "Window {:?} is outside a {}x{} grid",
                region.as_tuple(),
                self.width,
                self.height
            )));
        }
        let transform = self
            .transform
            .shifted(region.col_off as f64, region.row_off as f64);
        GeoGrid::new(transform, region.width, region.height)
    }

    /// Grid reduced by an integer decimation factor, same origin.
    pub fn decimate(&self, factor: u32) -> Result<GeoGrid> {
        if factor == 0 {
            return Err(Error::InvalidParameter("Decimation factor must be > 0".into()));
        }
        let f = factor as usize;
        let width = self.width.div_ceil(f);
        let height = self.height.div_ceil(f);
        GeoGrid::new(self.transform.scaled(factor as f64), width, height)
    }

    /// Same pixel size and shear, origin on a whole-pixel offset of `other`.
    pub fn same_alignment(&self, other: &GeoGrid) -> bool {
        const TOL: f64 = 1e-9;
        let (t, o) = (&self.transform, &other.transform);
        let close = |p: f64, q: f64| (p - q).abs() <= TOL * p.abs().max(q.abs()).max(1.0);
        if !(close(t.a, o.a) && close(t.b, o.b) && close(t.d, o.d) && close(t.e, o.e)) {
            return false;
        }
        let (col, row) = other.to_pixel(t.c, t.f);
        (col - col.round()).abs() < 1e-6 && (row - row.round()).abs() < 1e-6
    }
}

fn check_bounds(bbox: &BoundingBox) -> Result<()> {
    let finite = [bbox.xmin, bbox.ymin, bbox.xmax, bbox.ymax]
        .iter()
        .all(|v| v.is_finite());
    if !finite || bbox.is_degenerate() {
        return Err(Error::InvalidGeometry(format!(
            "Degenerate bounding box {bbox:?}"
        )));
    }
    Ok(())
}

fn check_resolution(res_x: f64, res_y: f64) -> Result<()> {
    if !(res_x > 0.0 && res_y > 0.0) || !res_x.is_finite() || !res_y.is_finite() {
        return Err(Error::InvalidGeometry(format!(
            "Resolution must be positive, got ({res_x}, {res_y})"
        )));
    }
    Ok(())
}

fn pixel_count(n: f64) -> Result<usize> {
    if !(n >= 1.0) || n > usize::MAX as f64 {
        return Err(Error::InvalidGeometry(format!("Grid dimension resolves to {n}")));
    }
    Ok(n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Unmappable;
    use crate::proj::Identity;
    use approx::assert_relative_eq;

    #[test]
    fn test_round_trip_law() {
        let grids = [
            GeoGrid::new(Affine::north_up(500000.0, 6600000.0, 10.0, -10.0), 64, 64).unwrap(),
            GeoGrid::new(Affine::new(0.001, 0.0002, 14.0, -0.0001, -0.001, 60.0), 9, 7).unwrap(),
            GeoGrid::new(Affine::north_up(-180.0, -90.0, 0.25, 0.25), 1440, 720).unwrap(),
        ];
        for grid in &grids {
            for &(c, r) in &[(0.0, 0.0), (3.5, 2.25), (8.0, 6.0), (0.125, 5.875)] {
                let (x, y) = grid.to_world(c, r);
                let (c2, r2) = grid.to_pixel(x, y);
                assert_relative_eq!(c2, c, epsilon = 1e-6);
                assert_relative_eq!(r2, r, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_from_bounds_resolution_rounds_up() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.5, 4.0);
        let grid = GeoGrid::from_bounds_resolution(&bbox, 1.0, 1.0).unwrap();
        assert_eq!((grid.width(), grid.height()), (11, 4));
        assert_eq!(grid.to_world(0.0, 0.0), (0.0, 4.0));
        assert_eq!(grid.pixel_size(), (1.0, -1.0));
    }

    #[test]
    fn test_from_bounds_aligned_snaps_outward() {
        let bbox = BoundingBox::new(0.3, -1.2, 10.5, 4.0);
        let grid = GeoGrid::from_bounds_aligned(&bbox, 2.0, 2.0).unwrap();
        assert_eq!(grid.to_world(0.0, 0.0), (0.0, 4.0));
        assert_eq!((grid.width(), grid.height()), (6, 3));
        let b = grid.bounds();
        assert!(b.xmin <= bbox.xmin && b.xmax >= bbox.xmax);
        assert!(b.ymin <= bbox.ymin && b.ymax >= bbox.ymax);

        assert!(GeoGrid::from_bounds_aligned(&bbox, 0.0, 1.0).is_err());
    }

    #[test]
    fn test_projected_bounds() {
        let grid = GeoGrid::new(Affine::north_up(10.0, 20.0, 1.0, -1.0), 4, 2).unwrap();
        assert_eq!(grid.projected_bounds(&Identity, 5), Some(grid.bounds()));

        struct Shift;
        impl CoordinateTransformer for Shift {
            fn transform(&self, x: f64, y: f64) -> std::result::Result<(f64, f64), Unmappable> {
                // Only the western half is mappable
                if x > 12.0 {
                    return Err(Unmappable {
                        x,
                        y,
                        reason: "east".into(),
                    });
                }
                Ok((x * 2.0, y + 100.0))
            }
        }
        let b = grid.projected_bounds(&Shift, 5).unwrap();
        assert_relative_eq!(b.xmin, 20.0);
        assert_relative_eq!(b.xmax, 24.0);
        assert_relative_eq!(b.ymin, 118.0);
        assert_relative_eq!(b.ymax, 120.0);
    }

    #[test]
    fn test_from_bounds_size_derives_resolution() {
        let bbox = BoundingBox::new(100.0, 0.0, 200.0, 50.0);
        let grid = GeoGrid::from_bounds_size(&bbox, 20, 10).unwrap();
        assert_eq!(grid.pixel_size(), (5.0, -5.0));
        assert_eq!(grid.bounds(), bbox);
    }

    #[test]
    fn test_resolution_overrides_size() {
        let bbox = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let grid = GeoGrid::from_bounds(&bbox, Some((10.0, 10.0)), Some((3, 3))).unwrap();
        assert_eq!(grid.shape(), (10, 10));

        let grid = GeoGrid::from_bounds(&bbox, Some((0.0, 0.0)), Some((3, 3))).unwrap();
        assert_eq!(grid.shape(), (3, 3));
    }

    #[test]
    fn test_degenerate_inputs() {
        let flat = BoundingBox::new(0.0, 5.0, 10.0, 5.0);
        assert!(matches!(
            GeoGrid::from_bounds_resolution(&flat, 1.0, 1.0),
            Err(Error::InvalidGeometry(_))
        ));
        let inverted = BoundingBox::new(10.0, 0.0, 0.0, 5.0);
        assert!(GeoGrid::from_bounds_size(&inverted, 4, 4).is_err());

        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        assert!(GeoGrid::from_bounds_size(&bbox, 0, 4).is_err());
        assert!(GeoGrid::new(Affine::north_up(0.0, 0.0, 0.0, -1.0), 4, 4).is_err());
        assert!(GeoGrid::new(Affine::north_up(0.0, 0.0, 1.0, -1.0), 4, 0).is_err());
    }

    #[test]
    fn test_window_and_decimate() {
        let grid = GeoGrid::new(Affine::north_up(0.0, 100.0, 1.0, -1.0), 1000, 999).unwrap();
        let win = grid.window(&Region::new(10, 20, 5, 5)).unwrap();
        assert_eq!(win.to_world(0.0, 0.0), (10.0, 80.0));
        assert!(grid.window(&Region::new(998, 0, 5, 5)).is_err());

        let ovr = grid.decimate(4).unwrap();
        assert_eq!(ovr.shape(), (250, 250));
        assert_eq!(ovr.pixel_size(), (4.0, -4.0));
        assert_eq!(ovr.to_world(0.0, 0.0), (0.0, 100.0));
    }

    #[test]
    fn test_same_alignment() {
        let grid = GeoGrid::new(Affine::north_up(0.0, 100.0, 1.0, -1.0), 100, 100).unwrap();
        let win = grid.window(&Region::new(3, 7, 10, 10)).unwrap();
        assert!(win.same_alignment(&grid));

        let half = GeoGrid::new(Affine::north_up(0.5, 100.0, 1.0, -1.0), 10, 10).unwrap();
        assert!(!half.same_alignment(&grid));
        assert!(!grid.decimate(2).unwrap().same_alignment(&grid));
    }
}
