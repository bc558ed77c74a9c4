//! Coordinate transformation between reference systems.

pub mod crs;

pub use crs::{ProjResolver, ProjTransformer, ReferenceSystem, ReferenceSystemResolver};

use crate::error::Unmappable;

/// Maps world coordinates from one reference system into another.
///
/// Implementations are shared read-only by every warp worker.
pub trait CoordinateTransformer: Send + Sync {
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), Unmappable>;

    /// True when `transform` returns its input unchanged.
    fn is_identity(&self) -> bool {
        false
    }

    /// Transform many points, `None` for the ones that cannot be mapped.
    fn transform_points(&self, points: &[(f64, f64)]) -> Vec<Option<(f64, f64)>> {
        points
            .iter()
            .map(|&(x, y)| self.transform(x, y).ok())
            .collect()
    }
}

/// Passthrough used when source and destination share a reference system.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl CoordinateTransformer for Identity {
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), Unmappable> {
        Ok((x, y))
    }

    fn is_identity(&self) -> bool {
        true
    }
}

/// Transformer taking coordinates in `from` to coordinates in `to`.
pub fn transformer_between(
    from: &ReferenceSystem,
    to: &ReferenceSystem,
) -> Box<dyn CoordinateTransformer> {
    if from == to {
        Box::new(Identity)
    } else {
        Box::new(ProjTransformer::new(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_systems_select_identity() {
        let a = ProjResolver.resolve("EPSG:32633").unwrap();
        let b = ProjResolver.resolve("epsg:32633").unwrap();
        let t = transformer_between(&a, &b);
        assert!(t.is_identity());
        assert_eq!(t.transform(1.5, -2.5).unwrap(), (1.5, -2.5));
    }

    #[test]
    fn test_different_systems_use_proj() {
        let a = ProjResolver.resolve("EPSG:4326").unwrap();
        let b = ProjResolver.resolve("EPSG:3857").unwrap();
        let t = transformer_between(&a, &b);
        assert!(!t.is_identity());
        let (x, y) = t.transform(0.0, 0.0).unwrap();
        assert!(x.abs() < 1e-6 && y.abs() < 1e-6);
    }

    #[test]
    fn test_transform_points_marks_failures() {
        struct RightHalf;
        impl CoordinateTransformer for RightHalf {
            fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), Unmappable> {
                if x < 0.0 {
                    return Err(Unmappable {
                        x,
                        y,
                        reason: "left half".into(),
                    });
                }
                Ok((x, y))
            }
        }
        let out = RightHalf.transform_points(&[(1.0, 1.0), (-1.0, 1.0)]);
        assert_eq!(out, vec![Some((1.0, 1.0)), None]);
    }
}
