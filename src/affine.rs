use crate::error::{Error, Result};

/// A 2D affine geotransform.
///
/// Maps pixel coordinates (col, row) to world coordinates (x, y):
///   x = a * col + b * row + c
///   y = d * col + e * row + f
///
/// `a` and `e` are the pixel sizes, `b` and `d` the shear terms and `(c, f)`
/// the world position of the top-left corner of pixel (0, 0).
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// North-up transform without shear.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self::new(pixel_width, 0.0, origin_x, 0.0, pixel_height, origin_y)
    }

    /// Create from a GDAL-style geotransform array [c, a, b, f, d, e].
    pub fn from_gdal(gt: &[f64; 6]) -> Self {
        Self {
            a: gt[1],
            b: gt[2],
            c: gt[0],
            d: gt[4],
            e: gt[5],
            f: gt[3],
        }
    }

    /// Convert to GDAL-style geotransform array [c, a, b, f, d, e].
    pub fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }

    /// Apply the forward transform: (col, row) -> (x, y).
    pub fn forward(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.a * col + self.b * row + self.c;
        let y = self.d * col + self.e * row + self.f;
        (x, y)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// Compute the inverse affine transform.
    pub fn inverse(&self) -> Result<Affine> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < f64::EPSILON * f64::EPSILON {
            return Err(Error::InvalidGeometry(
                "Singular affine transform (determinant is zero)".into(),
            ));
        }
        let inv_det = 1.0 / det;
        Ok(Affine {
            a: self.e * inv_det,
            b: -self.b * inv_det,
            c: (self.b * self.f - self.e * self.c) * inv_det,
            d: -self.d * inv_det,
            e: self.a * inv_det,
            f: (self.d * self.c - self.a * self.f) * inv_det,
        })
    }

    /// Same transform with the origin moved to pixel (col, row).
    pub fn shifted(&self, col: f64, row: f64) -> Affine {
        let (c, f) = self.forward(col, row);
        Affine { c, f, ..*self }
    }

    /// Same origin, every pixel `factor` times larger in both axes.
    pub fn scaled(&self, factor: f64) -> Affine {
        Affine {
            a: self.a * factor,
            b: self.b * factor,
            d: self.d * factor,
            e: self.e * factor,
            ..*self
        }
    }
}
