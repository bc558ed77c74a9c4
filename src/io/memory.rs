//! In-process stores. Handy in tests and when the caller already holds the
//! pixels in memory.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ndarray::Array2;

use crate::buffer::{DataType, TypedBuffer};
use crate::error::{Error, IoError, Result};
use crate::grid::{GeoGrid, Region};
use crate::io::{
    Feature, FieldKind, IoResult, LayerSchema, MetadataStore, Palette, RasterSink, RasterSource,
    RasterStore, VectorSink, VectorStore, WriteOptions,
};
use crate::overview::{OverviewPlacement, OverviewSink};
use crate::proj::ReferenceSystem;

fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn out_of_bounds(region: &Region, grid: &GeoGrid) -> IoError {
    IoError::OutOfBounds {
        region: region.as_tuple(),
        width: grid.width(),
        height: grid.height(),
    }
}

/// A raster held entirely in memory.
#[derive(Clone, Debug)]
pub struct MemoryRaster {
    id: String,
    grid: GeoGrid,
    rs: ReferenceSystem,
    nodata: Option<f64>,
    data: TypedBuffer,
}

impl MemoryRaster {
    pub fn new(
        id: impl Into<String>,
        grid: GeoGrid,
        rs: ReferenceSystem,
        data: TypedBuffer,
        nodata: Option<f64>,
    ) -> Result<Self> {
        if data.shape() != grid.shape() {
            return Err(Error::InvalidParameter(format!(
                "Data of shape {:?} does not match a {}x{} grid",
                data.shape(),
                grid.width(),
                grid.height()
            )));
        }
        Ok(Self {
            id: id.into(),
            grid,
            rs,
            nodata,
            data,
        })
    }

    pub fn from_f64(
        id: impl Into<String>,
        grid: GeoGrid,
        rs: ReferenceSystem,
        data: Array2<f64>,
        nodata: Option<f64>,
    ) -> Result<Self> {
        Self::new(id, grid, rs, TypedBuffer::Float64(data), nodata)
    }

    pub fn data(&self) -> &TypedBuffer {
        &self.data
    }
}

impl RasterSource for MemoryRaster {
    fn id(&self) -> &str {
        &self.id
    }

    fn grid(&self) -> &GeoGrid {
        &self.grid
    }

    fn reference_system(&self) -> &ReferenceSystem {
        &self.rs
    }

    fn data_type(&self) -> DataType {
        self.data.data_type()
    }

    fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn read(&self, region: &Region) -> IoResult<Array2<f64>> {
        if region.is_empty() {
            return Err(out_of_bounds(region, &self.grid));
        }
        self.data
            .region(region)
            .map(|tile| tile.to_f64())
            .ok_or_else(|| out_of_bounds(region, &self.grid))
    }
}

type RasterMap = Arc<RwLock<HashMap<String, MemoryRaster>>>;

/// Raster store keyed by id. Clones share the same rasters.
#[derive(Clone, Debug, Default)]
pub struct MemoryRasterStore {
    rasters: RasterMap,
    read_only: Arc<RwLock<HashSet<String>>>,
}

impl MemoryRasterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, raster: MemoryRaster) {
        write_lock(&self.rasters).insert(raster.id.clone(), raster);
    }

    pub fn get(&self, id: &str) -> Option<MemoryRaster> {
        read_lock(&self.rasters).get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        read_lock(&self.rasters).contains_key(id)
    }

    /// Reject later `open_writable` calls for `id`.
    pub fn deny_writes(&self, id: impl Into<String>) {
        write_lock(&self.read_only).insert(id.into());
    }
}

impl RasterStore for MemoryRasterStore {
    fn open_readable(&self, id: &str) -> IoResult<Box<dyn RasterSource>> {
        self.get(id)
            .map(|r| Box::new(r) as Box<dyn RasterSource>)
            .ok_or_else(|| IoError::NotFound(id.to_string()))
    }

    fn open_writable(
        &self,
        id: &str,
        grid: &GeoGrid,
        rs: &ReferenceSystem,
        dtype: DataType,
        options: &WriteOptions,
    ) -> IoResult<Box<dyn RasterSink>> {
        if read_lock(&self.read_only).contains(id) {
            return Err(IoError::PermissionDenied(id.to_string()));
        }
        let fill = options
            .nodata
            .unwrap_or(if dtype.is_integer() { 0.0 } else { f64::NAN });
        let data = TypedBuffer::filled(dtype, grid.shape(), fill)
            .map_err(|e| IoError::UnsupportedFormat(e.to_string()))?;
        let raster = MemoryRaster {
            id: id.to_string(),
            grid: *grid,
            rs: rs.clone(),
            nodata: options.nodata,
            data,
        };
        self.insert(raster);
        Ok(Box::new(MemoryRasterSink {
            id: id.to_string(),
            grid: *grid,
            dtype,
            nodata: options.nodata,
            rasters: Arc::clone(&self.rasters),
        }))
    }
}

/// Write handle onto a raster of a [`MemoryRasterStore`].
pub struct MemoryRasterSink {
    id: String,
    grid: GeoGrid,
    dtype: DataType,
    nodata: Option<f64>,
    rasters: RasterMap,
}

impl RasterSink for MemoryRasterSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn grid(&self) -> &GeoGrid {
        &self.grid
    }

    fn data_type(&self) -> DataType {
        self.dtype
    }

    fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn write(&mut self, region: &Region, data: &TypedBuffer) -> IoResult<()> {
        if !region.fits(self.grid.width(), self.grid.height()) {
            return Err(out_of_bounds(region, &self.grid));
        }
        if data.data_type() != self.dtype {
            return Err(IoError::UnsupportedFormat(format!(
                "{} samples written to a {} raster",
                data.data_type(),
                self.dtype
            )));
        }
        let mut rasters = write_lock(&self.rasters);
        let raster = rasters
            .get_mut(&self.id)
            .ok_or_else(|| IoError::NotFound(self.id.clone()))?;
        raster
            .data
            .assign_region(region, data)
            .map_err(|_| out_of_bounds(region, &self.grid))
    }
}

#[derive(Clone, Debug, Default)]
struct Layer {
    schema: LayerSchema,
    features: Vec<Feature>,
}

type LayerMap = Arc<RwLock<HashMap<String, Layer>>>;

/// Vector layers keyed by id. Clones share the same layers.
#[derive(Clone, Debug, Default)]
pub struct MemoryVectorStore {
    layers: LayerMap,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: impl Into<String>, features: Vec<Feature>) {
        write_lock(&self.layers).insert(
            id.into(),
            Layer {
                schema: LayerSchema::default(),
                features,
            },
        );
    }

    pub fn features(&self, id: &str) -> Option<Vec<Feature>> {
        read_lock(&self.layers).get(id).map(|l| l.features.clone())
    }

    /// Schema the layer was opened for writing with. Inserted layers have an
    /// empty schema.
    pub fn schema(&self, id: &str) -> Option<LayerSchema> {
        read_lock(&self.layers).get(id).map(|l| l.schema.clone())
    }
}

impl VectorStore for MemoryVectorStore {
    fn open_vector_readable(&self, id: &str) -> IoResult<Vec<Feature>> {
        self.features(id)
            .ok_or_else(|| IoError::NotFound(id.to_string()))
    }

    fn open_vector_writable(
        &self,
        id: &str,
        schema: &LayerSchema,
    ) -> IoResult<Box<dyn VectorSink>> {
        write_lock(&self.layers).insert(
            id.to_string(),
            Layer {
                schema: schema.clone(),
                features: Vec::new(),
            },
        );
        Ok(Box::new(MemoryVectorSink {
            id: id.to_string(),
            layers: Arc::clone(&self.layers),
        }))
    }
}

/// Append handle onto a layer of a [`MemoryVectorStore`].
pub struct MemoryVectorSink {
    id: String,
    layers: LayerMap,
}

impl VectorSink for MemoryVectorSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn append(&mut self, feature: Feature) -> IoResult<()> {
        let mut layers = write_lock(&self.layers);
        let layer = layers
            .get_mut(&self.id)
            .ok_or_else(|| IoError::NotFound(self.id.clone()))?;
        for (name, value) in &feature.attributes {
            let kind = layer
                .schema
                .fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, kind)| *kind)
                .ok_or_else(|| {
                    IoError::UnsupportedFormat(format!("Field '{name}' is not in the schema"))
                })?;
            let matches = matches!(
                (kind, value),
                (FieldKind::Integer, crate::io::AttributeValue::Integer(_))
                    | (FieldKind::Real, crate::io::AttributeValue::Real(_))
                    | (FieldKind::Real, crate::io::AttributeValue::Integer(_))
                    | (FieldKind::Text, crate::io::AttributeValue::Text(_))
            );
            if !matches {
                return Err(IoError::UnsupportedFormat(format!(
                    "Field '{name}' expects {kind:?}, got {value:?}"
                )));
            }
        }
        layer.features.push(feature);
        Ok(())
    }
}

/// Palettes and category labels keyed by raster id.
#[derive(Clone, Debug, Default)]
pub struct MemoryMetadataStore {
    palettes: Arc<RwLock<HashMap<String, Palette>>>,
    categories: Arc<RwLock<HashMap<String, Vec<String>>>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn get_palette(&self, id: &str) -> IoResult<Option<Palette>> {
        Ok(read_lock(&self.palettes).get(id).cloned())
    }

    fn set_palette(&self, id: &str, palette: Palette) -> IoResult<()> {
        write_lock(&self.palettes).insert(id.to_string(), palette);
        Ok(())
    }

    fn get_categories(&self, id: &str) -> IoResult<Option<Vec<String>>> {
        Ok(read_lock(&self.categories).get(id).cloned())
    }

    fn set_categories(&self, id: &str, categories: Vec<String>) -> IoResult<()> {
        write_lock(&self.categories).insert(id.to_string(), categories);
        Ok(())
    }
}

/// One stored overview level.
#[derive(Clone, Debug)]
pub struct StoredLevel {
    pub factor: u32,
    pub grid: GeoGrid,
    pub data: TypedBuffer,
}

/// Collects overview levels in memory.
#[derive(Clone, Debug)]
pub struct MemoryOverviewSink {
    placement: OverviewPlacement,
    levels: Vec<StoredLevel>,
}

impl MemoryOverviewSink {
    pub fn new(placement: OverviewPlacement) -> Self {
        Self {
            placement,
            levels: Vec::new(),
        }
    }

    pub fn levels(&self) -> &[StoredLevel] {
        &self.levels
    }
}

impl Default for MemoryOverviewSink {
    fn default() -> Self {
        Self::new(OverviewPlacement::Internal)
    }
}

impl OverviewSink for MemoryOverviewSink {
    fn placement(&self) -> OverviewPlacement {
        self.placement
    }

    fn write_level(&mut self, factor: u32, grid: &GeoGrid, data: &TypedBuffer) -> IoResult<()> {
        if data.shape() != grid.shape() {
            return Err(IoError::OutOfBounds {
                region: (0, 0, data.shape().1, data.shape().0),
                width: grid.width(),
                height: grid.height(),
            });
        }
        self.levels.push(StoredLevel {
            factor,
            grid: *grid,
            data: data.clone(),
        });
        Ok(())
    }
}
