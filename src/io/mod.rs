//! Collaborator interfaces for raster, vector and metadata storage.
//!
//! The engine never touches a file format directly; it reads and writes
//! through these traits. [`memory`] provides in-process implementations.

pub mod memory;

use std::collections::BTreeMap;

use geo_types::Geometry;
use ndarray::Array2;

use crate::buffer::{DataType, TypedBuffer};
use crate::error::IoError;
use crate::grid::{GeoGrid, Region};
use crate::proj::ReferenceSystem;

pub use memory::{
    MemoryMetadataStore, MemoryOverviewSink, MemoryRaster, MemoryRasterStore, MemoryVectorSink,
    MemoryVectorStore, StoredLevel,
};

pub type IoResult<T> = std::result::Result<T, IoError>;

/// An opened raster that can be read window by window.
///
/// Shared by every warp worker, so reads take `&self`.
pub trait RasterSource: Send + Sync {
    fn id(&self) -> &str;
    fn grid(&self) -> &GeoGrid;
    fn reference_system(&self) -> &ReferenceSystem;
    fn data_type(&self) -> DataType;
    fn nodata(&self) -> Option<f64>;

    /// Samples of `region`, widened to f64.
    fn read(&self, region: &Region) -> IoResult<Array2<f64>>;
}

/// An opened raster accepting window writes of one data type.
pub trait RasterSink: Send {
    fn id(&self) -> &str;
    fn grid(&self) -> &GeoGrid;
    fn data_type(&self) -> DataType;
    fn nodata(&self) -> Option<f64>;

    fn write(&mut self, region: &Region, data: &TypedBuffer) -> IoResult<()>;
}

/// Creation parameters passed through to a store.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct WriteOptions {
    pub nodata: Option<f64>,
    /// Store-specific key/value options, forwarded untouched.
    pub creation: BTreeMap<String, String>,
}

pub trait RasterStore: Send + Sync {
    fn open_readable(&self, id: &str) -> IoResult<Box<dyn RasterSource>>;

    fn open_writable(
        &self,
        id: &str,
        grid: &GeoGrid,
        rs: &ReferenceSystem,
        dtype: DataType,
        options: &WriteOptions,
    ) -> IoResult<Box<dyn RasterSink>>;
}

/// A feature attribute.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum AttributeValue {
    Integer(i64),
    Real(f64),
    Text(String),
}

impl AttributeValue {
    /// Numeric view, `None` for text.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Integer(v) => Some(*v as f64),
            AttributeValue::Real(v) => Some(*v),
            AttributeValue::Text(_) => None,
        }
    }
}

/// Geometry plus attribute table.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Feature {
    pub fn new(geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            geometry: geometry.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FieldKind {
    Integer,
    Real,
    Text,
}

/// Attribute layout of a vector layer being written.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LayerSchema {
    pub fields: Vec<(String, FieldKind)>,
}

impl LayerSchema {
    pub fn with_field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push((name.into(), kind));
        self
    }
}

pub trait VectorSink: Send {
    fn id(&self) -> &str;
    fn append(&mut self, feature: Feature) -> IoResult<()>;
}

pub trait VectorStore: Send + Sync {
    fn open_vector_readable(&self, id: &str) -> IoResult<Vec<Feature>>;

    fn open_vector_writable(&self, id: &str, schema: &LayerSchema)
        -> IoResult<Box<dyn VectorSink>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// Pixel value to colour.
pub type Palette = BTreeMap<u32, Rgba>;

/// Raster palette and category label storage.
pub trait MetadataStore: Send + Sync {
    fn get_palette(&self, id: &str) -> IoResult<Option<Palette>>;
    fn set_palette(&self, id: &str, palette: Palette) -> IoResult<()>;
    fn get_categories(&self, id: &str) -> IoResult<Option<Vec<String>>>;
    fn set_categories(&self, id: &str, categories: Vec<String>) -> IoResult<()>;
}
