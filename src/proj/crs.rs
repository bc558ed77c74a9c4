use std::fmt;
use std::sync::Arc;

use proj4rs::Proj;

use crate::error::{ParseError, Unmappable};
use crate::proj::CoordinateTransformer;

/// A resolved coordinate reference system.
///
/// Two handles are equal when their canonical definitions are equal.
#[derive(Clone)]
pub struct ReferenceSystem {
    definition: String,
    proj: Arc<Proj>,
}

impl ReferenceSystem {
    /// Resolve an EPSG code ("EPSG:4326") or a PROJ string ("+proj=utm +zone=33 ...").
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let definition = canonicalize(input);
        if definition.is_empty() {
            return Err(ParseError {
                input: input.to_string(),
                reason: "empty definition".into(),
            });
        }
        let proj = Proj::from_user_string(&definition).map_err(|e| ParseError {
            input: input.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            definition,
            proj: Arc::new(proj),
        })
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// Geographic systems use degrees externally.
    pub fn is_geographic(&self) -> bool {
        self.proj.is_latlong()
    }
}

impl PartialEq for ReferenceSystem {
    fn eq(&self, other: &Self) -> bool {
        self.definition == other.definition
    }
}

impl Eq for ReferenceSystem {}

impl fmt::Debug for ReferenceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReferenceSystem")
            .field(&self.definition)
            .finish()
    }
}

impl fmt::Display for ReferenceSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.definition)
    }
}

fn canonicalize(input: &str) -> String {
    let trimmed = input.trim();
    if let Some((auth, code)) = trimmed.split_once(':') {
        if auth.eq_ignore_ascii_case("epsg") {
            return format!("EPSG:{}", code.trim());
        }
    }
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Turns user-supplied descriptors into reference systems.
pub trait ReferenceSystemResolver: Send + Sync {
    fn resolve(&self, user_string: &str) -> Result<ReferenceSystem, ParseError>;
}

/// Resolver backed by proj4rs and its bundled EPSG definitions.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProjResolver;

impl ReferenceSystemResolver for ProjResolver {
    fn resolve(&self, user_string: &str) -> Result<ReferenceSystem, ParseError> {
        ReferenceSystem::parse(user_string)
    }
}

/// Thin wrapper around proj4rs that handles radians/degrees conversion transparently.
///
/// proj4rs uses radians for geographic CRS, but affine transforms produce
/// degrees for EPSG:4326-like CRS. This wrapper auto-converts.
pub struct ProjTransformer {
    from: Arc<Proj>,
    to: Arc<Proj>,
    from_is_geo: bool,
    to_is_geo: bool,
}

impl ProjTransformer {
    pub fn new(from: &ReferenceSystem, to: &ReferenceSystem) -> Self {
        Self {
            from: Arc::clone(&from.proj),
            to: Arc::clone(&to.proj),
            from_is_geo: from.is_geographic(),
            to_is_geo: to.is_geographic(),
        }
    }
}

impl CoordinateTransformer for ProjTransformer {
    /// Input/output coordinates are in CRS native units (degrees for geographic,
    /// metres for projected). The radians conversion is handled internally.
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), Unmappable> {
        let unmappable = |reason: String| Unmappable { x, y, reason };
        if !x.is_finite() || !y.is_finite() {
            return Err(unmappable("non-finite input".into()));
        }

        let mut point = if self.from_is_geo {
            (x.to_radians(), y.to_radians())
        } else {
            (x, y)
        };

        proj4rs::transform::transform(&self.from, &self.to, &mut point)
            .map_err(|e| unmappable(e.to_string()))?;

        let out = if self.to_is_geo {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            point
        };
        if !out.0.is_finite() || !out.1.is_finite() {
            return Err(unmappable("non-finite result".into()));
        }
        Ok(out)
    }
}
