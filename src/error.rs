use thiserror::Error;

use crate::buffer::DataType;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Unsupported resampling kernel: {0}")]
    UnsupportedKernel(String),

    #[error("Cannot read source '{id}': {source}")]
    SourceUnreadable {
        id: String,
        #[source]
        source: IoError,
    },

    #[error("Cannot write destination '{id}': {source}")]
    DestinationUnwritable {
        id: String,
        #[source]
        source: IoError,
    },

    #[error("Value {value} at pixel (row {row}, col {col}) is out of range for {dtype}")]
    ValueOutOfRange {
        value: f64,
        dtype: DataType,
        row: usize,
        col: usize,
    },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A reference-system string that could not be resolved.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Cannot parse reference system '{input}': {reason}")]
pub struct ParseError {
    pub input: String,
    pub reason: String,
}

/// A single point outside the valid domain of a coordinate transformation.
///
/// Never aborts an operation: the warp engine writes no-data for the pixel.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Point ({x}, {y}) cannot be transformed: {reason}")]
pub struct Unmappable {
    pub x: f64,
    pub y: f64,
    pub reason: String,
}

/// Failures reported by raster, vector and metadata collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IoError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("write permission denied: {0}")]
    PermissionDenied(String),

    #[error("region {region:?} is outside a {width}x{height} raster")]
    OutOfBounds {
        region: (usize, usize, usize, usize),
        width: usize,
        height: usize,
    },
}

impl Error {
    pub(crate) fn unreadable(id: &str, source: IoError) -> Self {
        Error::SourceUnreadable {
            id: id.to_string(),
            source,
        }
    }

    pub(crate) fn unwritable(id: &str, source: IoError) -> Self {
        Error::DestinationUnwritable {
            id: id.to_string(),
            source,
        }
    }
}
