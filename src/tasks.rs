//! End-to-end operations over the store collaborators.

use ndarray::{ArrayView2, Zip};
use num_traits::NumCast;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::affine::Affine;
use crate::buffer::{DataType, Pixel, SampleBuffer, TypedBuffer};
use crate::config::{OverviewOptions, RasterizeOptions, WarpOptions, DEFAULT_EDGE_POINTS};
use crate::error::{Error, IoError, Result};
use crate::grid::{BoundingBox, GeoGrid};
use crate::io::{
    AttributeValue, Feature, MemoryRaster, MetadataStore, Palette, RasterStore, Rgba, VectorSink,
    VectorStore, WriteOptions,
};
use crate::overview::{OverviewBuilder, OverviewSink};
use crate::polygonize::{polygonize, Connectivity};
use crate::proj::{transformer_between, ReferenceSystem};
use crate::rasterize::{layer_bounds, rasterize, BurnValue};
use crate::resample::is_nodata_value;
use crate::warp::Context;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MosaicSummary {
    pub sources: usize,
    pub valid_pixels: usize,
}

/// Grid in `dst_rs` at `resolution` covering every source once reprojected.
///
/// Each source's edges are densified and mapped into `dst_rs`. The union of
/// the mapped extents is widened to whole multiples of the resolution.
pub fn suggested_grid(
    store: &dyn RasterStore,
    sources: &[&str],
    dst_rs: &ReferenceSystem,
    resolution: (f64, f64),
) -> Result<GeoGrid> {
    let mut extent: Option<BoundingBox> = None;
    for &id in sources {
        let source = store.open_readable(id).map_err(|e| Error::unreadable(id, e))?;
        let transformer = transformer_between(source.reference_system(), dst_rs);
        let bounds = source
            .grid()
            .projected_bounds(transformer.as_ref(), DEFAULT_EDGE_POINTS)
            .ok_or_else(|| {
                Error::InvalidGeometry(format!(
                    "Source '{id}' has no extent in {}",
                    dst_rs.definition()
                ))
            })?;
        extent = Some(extent.map_or(bounds, |e| e.union(&bounds)));
    }
    let extent = extent
        .ok_or_else(|| Error::InvalidParameter("A grid needs at least one source".into()))?;
    let grid = GeoGrid::from_bounds_aligned(&extent, resolution.0, resolution.1)?;
    debug!(
        sources = sources.len(),
        width = grid.width(),
        height = grid.height(),
        "Suggested destination grid"
    );
    Ok(grid)
}

/// Warp `sources` in order onto `grid` and write the result to `sink_id`.
///
/// Later sources overwrite earlier ones only where they yield a valid sample.
/// The output no-data value is the explicit override, else that of the first
/// source.
pub fn mosaic(
    store: &dyn RasterStore,
    sources: &[&str],
    dst_rs: &ReferenceSystem,
    grid: &GeoGrid,
    options: &WarpOptions,
    sink_id: &str,
    dtype: DataType,
) -> Result<MosaicSummary> {
    if sources.is_empty() {
        return Err(Error::InvalidParameter("Mosaic needs at least one source".into()));
    }

    let mut canvas: Option<SampleBuffer<f64>> = None;
    for &id in sources {
        let source = store.open_readable(id).map_err(|e| Error::unreadable(id, e))?;
        let ctx = Context::new(*source.grid(), source.reference_system(), *grid, dst_rs, options)?;
        let src_nodata = ctx.source_nodata(source.as_ref());
        let warped = ctx.warp_to_buffer(source.as_ref())?;

        let canvas = canvas.get_or_insert_with(|| SampleBuffer::for_grid(grid, src_nodata));
        Zip::from(&mut canvas.data)
            .and(&warped.data)
            .for_each(|dst, &v| {
                if !is_nodata_value(v, src_nodata) {
                    *dst = v;
                }
            });
        debug!(source = id, valid = warped.valid_count(), "Mosaicked source");
    }

    let Some(canvas) = canvas else {
        return Err(Error::InvalidParameter("Mosaic needs at least one source".into()));
    };
    let write_options = WriteOptions {
        nodata: canvas.nodata,
        ..WriteOptions::default()
    };
    write_raster(store, sink_id, grid, dst_rs, dtype, &canvas, &write_options)?;

    let summary = MosaicSummary {
        sources: sources.len(),
        valid_pixels: canvas.valid_count(),
    };
    info!(
        sink = sink_id,
        sources = summary.sources,
        valid_pixels = summary.valid_pixels,
        "mosaic completed"
    );
    Ok(summary)
}

/// Warp every source onto `grid`, one buffer per source in input order.
pub fn read_to_grid(
    store: &dyn RasterStore,
    sources: &[&str],
    grid: &GeoGrid,
    rs: &ReferenceSystem,
    options: &WarpOptions,
) -> Result<Vec<SampleBuffer<f64>>> {
    sources
        .iter()
        .map(|&id| {
            let source = store.open_readable(id).map_err(|e| Error::unreadable(id, e))?;
            Context::new(*source.grid(), source.reference_system(), *grid, rs, options)?
                .warp_to_buffer(source.as_ref())
        })
        .collect()
}

/// Rasterize a whole vector layer onto a grid fitted to its extent.
///
/// The buffer starts as `options.nodata`. An attribute burn falls back to
/// `options.fallback_value` when no feature has that attribute at all.
pub fn rasterize_layer(
    vectors: &dyn VectorStore,
    layer: &str,
    resolution: (f64, f64),
    rs: &ReferenceSystem,
    burn: &BurnValue,
    options: &RasterizeOptions,
) -> Result<MemoryRaster> {
    options.validate()?;
    let nodata = options.nodata;
    let features = vectors
        .open_vector_readable(layer)
        .map_err(|e| Error::unreadable(layer, e))?;
    let bounds = layer_bounds(&features)?.ok_or_else(|| {
        Error::InvalidGeometry(format!("Layer '{layer}' has no polygon features"))
    })?;
    let grid = GeoGrid::from_bounds_resolution(&bounds, resolution.0, resolution.1)?;

    let burn = match burn {
        BurnValue::Attribute(name) if !features.iter().any(|f| f.attribute(name).is_some()) => {
            warn!(
                layer,
                attribute = %name,
                value = options.fallback_value,
                "Attribute absent from layer, burning constant"
            );
            BurnValue::Constant(options.fallback_value)
        }
        other => other.clone(),
    };

    let mut buffer = SampleBuffer::nodata_filled(&grid, nodata);
    let summary = rasterize(&grid, &mut buffer, &features, &burn, options.rule)?;
    info!(
        layer,
        width = grid.width(),
        height = grid.height(),
        burned = summary.features_burned,
        "rasterized layer"
    );
    MemoryRaster::from_f64(layer, grid, rs.clone(), buffer.data, Some(nodata))
}

/// Append every region of `buffer` to `sink`, its value stored under `field`.
/// Returns the number of features written.
pub fn polygonize_to_layer<'a, T: Pixel>(
    grid: &'a GeoGrid,
    buffer: &'a SampleBuffer<T>,
    connectivity: Connectivity,
    mask: Option<ArrayView2<'a, u8>>,
    sink: &mut dyn VectorSink,
    field: &str,
) -> Result<usize> {
    let integer = T::DATA_TYPE.is_integer();
    let mut count = 0;
    for (polygon, value) in polygonize(grid, buffer, connectivity, mask)? {
        let v = <f64 as NumCast>::from(value).unwrap_or(f64::NAN);
        let attribute = if integer {
            AttributeValue::Integer(v as i64)
        } else {
            AttributeValue::Real(v)
        };
        let feature = Feature::new(polygon).with_attribute(field, attribute);
        sink.append(feature)
            .map_err(|e| Error::unwritable(sink.id(), e))?;
        count += 1;
    }
    debug!(sink = sink.id(), features = count, "Polygonized buffer");
    Ok(count)
}

/// Build the overview pyramid of raster `id` into `sink`.
pub fn build_overviews(
    store: &dyn RasterStore,
    id: &str,
    options: &OverviewOptions,
    sink: &mut dyn OverviewSink,
) -> Result<Vec<u32>> {
    let builder = OverviewBuilder::new(options.clone())?;
    let source = store.open_readable(id).map_err(|e| Error::unreadable(id, e))?;
    builder.build(source.as_ref(), sink)
}

/// Narrow `buffer` to `dtype` and write it as raster `id`.
pub fn write_raster(
    store: &dyn RasterStore,
    id: &str,
    grid: &GeoGrid,
    rs: &ReferenceSystem,
    dtype: DataType,
    buffer: &SampleBuffer<f64>,
    options: &WriteOptions,
) -> Result<()> {
    if buffer.shape() != grid.shape() {
        return Err(Error::InvalidParameter(format!(
            "Buffer shape {:?} does not match grid shape {:?}",
            buffer.shape(),
            grid.shape()
        )));
    }
    let typed = TypedBuffer::narrow(&buffer.view(), dtype, buffer.nodata, options.nodata, (0, 0))?;
    let mut sink = store
        .open_writable(id, grid, rs, dtype, options)
        .map_err(|e| Error::unwritable(id, e))?;
    sink.write(&grid.full_region(), &typed)
        .map_err(|e| Error::unwritable(id, e))?;
    debug!(id, %dtype, width = grid.width(), height = grid.height(), "Wrote raster");
    Ok(())
}

/// One resolved legend entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub value: u32,
    pub color: Rgba,
    pub label: Option<String>,
}

/// Replace the palette of raster `id` and, when given, label each entry.
///
/// Labels are stored as categories indexed by pixel value; existing labels
/// for other values are kept.
pub fn set_legend(
    meta: &dyn MetadataStore,
    id: &str,
    entries: &[(u32, Rgba)],
    labels: Option<&[String]>,
) -> Result<()> {
    if entries.is_empty() {
        return Err(Error::InvalidParameter("A legend needs at least one entry".into()));
    }
    if let Some(labels) = labels {
        if labels.len() != entries.len() {
            return Err(Error::InvalidParameter(format!(
                "Got {} labels for {} legend entries",
                labels.len(),
                entries.len()
            )));
        }
    }

    let palette: Palette = entries.iter().copied().collect();
    meta.set_palette(id, palette)
        .map_err(|e| Error::unwritable(id, e))?;

    if let Some(labels) = labels {
        let mut categories = meta
            .get_categories(id)
            .map_err(|e| Error::unreadable(id, e))?
            .unwrap_or_default();
        for ((value, _), label) in entries.iter().zip(labels) {
            let idx = *value as usize;
            if categories.len() <= idx {
                categories.resize(idx + 1, String::new());
            }
            categories[idx] = label.clone();
        }
        meta.set_categories(id, categories)
            .map_err(|e| Error::unwritable(id, e))?;
    }
    debug!(id, entries = entries.len(), labelled = labels.is_some(), "Set legend");
    Ok(())
}

/// Colours and labels of `indices` in raster `id`'s legend.
pub fn lookup_legend(meta: &dyn MetadataStore, id: &str, indices: &[u32]) -> Result<Vec<LegendEntry>> {
    let palette = meta
        .get_palette(id)
        .map_err(|e| Error::unreadable(id, e))?
        .ok_or_else(|| Error::unreadable(id, IoError::NotFound(format!("{id}: palette"))))?;
    let categories = meta
        .get_categories(id)
        .map_err(|e| Error::unreadable(id, e))?
        .unwrap_or_default();

    indices
        .iter()
        .map(|&value| {
            let color = palette.get(&value).copied().ok_or_else(|| {
                Error::unreadable(id, IoError::NotFound(format!("{id}: palette entry {value}")))
            })?;
            let label = categories
                .get(value as usize)
                .filter(|label| !label.is_empty())
                .cloned();
            Ok(LegendEntry { value, color, label })
        })
        .collect()
}

/// Summary of a stored raster.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RasterInfo {
    pub id: String,
    pub width: usize,
    pub height: usize,
    pub data_type: DataType,
    pub transform: Affine,
    pub reference_system: String,
    pub nodata: Option<f64>,
    pub has_palette: bool,
    pub has_categories: bool,
}

pub fn describe(store: &dyn RasterStore, meta: &dyn MetadataStore, id: &str) -> Result<RasterInfo> {
    let source = store.open_readable(id).map_err(|e| Error::unreadable(id, e))?;
    let grid = source.grid();
    let has_palette = meta
        .get_palette(id)
        .map_err(|e| Error::unreadable(id, e))?
        .is_some_and(|p| !p.is_empty());
    let has_categories = meta
        .get_categories(id)
        .map_err(|e| Error::unreadable(id, e))?
        .is_some_and(|c| !c.is_empty());

    Ok(RasterInfo {
        id: id.to_string(),
        width: grid.width(),
        height: grid.height(),
        data_type: source.data_type(),
        transform: *grid.transform(),
        reference_system: source.reference_system().definition().to_string(),
        nodata: source.nodata(),
        has_palette,
        has_categories,
    })
}
