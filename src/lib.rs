//! Raster reprojection, overview pyramids, rasterization and polygonization
//! over pluggable raster, vector and metadata stores.

pub mod affine;
pub mod buffer;
pub mod chunk;
pub mod config;
pub mod error;
pub mod grid;
pub mod io;
pub mod overview;
pub mod polygonize;
pub mod proj;
pub mod rasterize;
pub mod resample;
pub mod tasks;
pub mod warp;

pub use affine::Affine;
pub use buffer::{DataType, Pixel, Sample, SampleBuffer, TypedBuffer};
pub use config::{OverviewOptions, RasterizeOptions, ThreadBudget, WarpOptions};
pub use error::{Error, IoError, ParseError, Result, Unmappable};
pub use grid::{BoundingBox, GeoGrid, Region};
pub use overview::{OverviewBuilder, OverviewPlacement, OverviewSink};
pub use polygonize::{polygonize, Connectivity, Polygonizer};
pub use proj::{CoordinateTransformer, ReferenceSystem, ReferenceSystemResolver};
pub use rasterize::{rasterize, BurnRule, BurnValue, RasterizeSummary};
pub use resample::ResampleKernel;
pub use warp::{warp_buffer, Context, WarpExecutor, WarpState, WarpSummary};
