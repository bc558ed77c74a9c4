//! Sample buffers and the typed write path.

use std::fmt;

use ndarray::{s, Array2, ArrayView2};
use num_traits::NumCast;

use crate::error::{Error, Result};
use crate::grid::{GeoGrid, Region};
use crate::resample::is_nodata_value;

/// Numeric pixel types the kernels and tracers operate on.
pub trait Sample: Copy + NumCast + PartialEq + Send + Sync + 'static {}

impl<T> Sample for T where T: Copy + NumCast + PartialEq + Send + Sync + 'static {}

/// Sample types that map onto a storage [`DataType`].
pub trait Pixel: Sample {
    const DATA_TYPE: DataType;
}

macro_rules! impl_pixel {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(impl Pixel for $t {
            const DATA_TYPE: DataType = DataType::$variant;
        })*
    };
}

impl_pixel!(
    u8 => UInt8,
    i8 => Int8,
    u16 => UInt16,
    i16 => Int16,
    u32 => UInt32,
    i32 => Int32,
    f32 => Float32,
    f64 => Float64,
);

/// Dense 2D block of samples plus an optional no-data sentinel.
///
/// For floating-point samples NaN always counts as no-data, whether or not a
/// sentinel is set.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleBuffer<T = f64> {
    pub data: Array2<T>,
    pub nodata: Option<T>,
}

impl<T: Sample> SampleBuffer<T> {
    pub fn new(data: Array2<T>, nodata: Option<T>) -> Self {
        Self { data, nodata }
    }

    /// Buffer of `shape` (rows, cols) with every sample set to `fill`.
    pub fn filled(shape: (usize, usize), fill: T, nodata: Option<T>) -> Self {
        Self::new(Array2::from_elem(shape, fill), nodata)
    }

    /// Buffer matching `grid`, pre-filled with the no-data sentinel.
    pub fn nodata_filled(grid: &GeoGrid, nodata: T) -> Self {
        Self::filled(grid.shape(), nodata, Some(nodata))
    }

    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn view(&self) -> ArrayView2<'_, T> {
        self.data.view()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        self.data.get((row, col)).copied()
    }

    /// True when the sample is the sentinel or NaN.
    pub fn is_nodata(&self, row: usize, col: usize) -> bool {
        match self.get(row, col) {
            Some(v) => is_nodata_value(v, self.nodata),
            None => true,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.data
            .iter()
            .filter(|&&v| !is_nodata_value(v, self.nodata))
            .count()
    }
}

impl SampleBuffer<f64> {
    /// Float buffer whose no-data fill is the sentinel, or NaN without one.
    pub fn for_grid(grid: &GeoGrid, nodata: Option<f64>) -> Self {
        Self::filled(grid.shape(), nodata.unwrap_or(f64::NAN), nodata)
    }
}

/// Storage types supported by the write path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DataType {
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    /// Parse a type name. Accepts the GDAL spellings (`Byte`, `UInt16`, ...).
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "byte" | "uint8" | "u8" => Some(Self::UInt8),
            "int8" | "i8" => Some(Self::Int8),
            "uint16" | "u16" => Some(Self::UInt16),
            "int16" | "i16" => Some(Self::Int16),
            "uint32" | "u32" => Some(Self::UInt32),
            "int32" | "i32" => Some(Self::Int32),
            "float32" | "f32" => Some(Self::Float32),
            "float64" | "f64" => Some(Self::Float64),
            _ => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        !matches!(self, Self::Float32 | Self::Float64)
    }

    /// Inclusive representable range.
    pub fn range(&self) -> (f64, f64) {
        match self {
            Self::UInt8 => (0.0, u8::MAX as f64),
            Self::Int8 => (i8::MIN as f64, i8::MAX as f64),
            Self::UInt16 => (0.0, u16::MAX as f64),
            Self::Int16 => (i16::MIN as f64, i16::MAX as f64),
            Self::UInt32 => (0.0, u32::MAX as f64),
            Self::Int32 => (i32::MIN as f64, i32::MAX as f64),
            Self::Float32 => (f32::MIN as f64, f32::MAX as f64),
            Self::Float64 => (f64::MIN, f64::MAX),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UInt8 => "UInt8",
            Self::Int8 => "Int8",
            Self::UInt16 => "UInt16",
            Self::Int16 => "Int16",
            Self::UInt32 => "UInt32",
            Self::Int32 => "Int32",
            Self::Float32 => "Float32",
            Self::Float64 => "Float64",
        };
        f.write_str(name)
    }
}

/// Samples narrowed to a concrete storage type.
#[derive(Clone, Debug, PartialEq)]
pub enum TypedBuffer {
    UInt8(Array2<u8>),
    Int8(Array2<i8>),
    UInt16(Array2<u16>),
    Int16(Array2<i16>),
    UInt32(Array2<u32>),
    Int32(Array2<i32>),
    Float32(Array2<f32>),
    Float64(Array2<f64>),
}

macro_rules! each_variant {
    ($value:expr, $arr:ident => $body:expr) => {
        match $value {
            TypedBuffer::UInt8($arr) => $body,
            TypedBuffer::Int8($arr) => $body,
            TypedBuffer::UInt16($arr) => $body,
            TypedBuffer::Int16($arr) => $body,
            TypedBuffer::UInt32($arr) => $body,
            TypedBuffer::Int32($arr) => $body,
            TypedBuffer::Float32($arr) => $body,
            TypedBuffer::Float64($arr) => $body,
        }
    };
}

/// Convert one f64 sample into `T`, reporting the pixel on failure.
pub(crate) fn narrow_one<T: NumCast>(value: f64, dtype: DataType, row: usize, col: usize) -> Result<T> {
    if dtype == DataType::Float32 && value.is_finite() && value.abs() > f32::MAX as f64 {
        return Err(Error::ValueOutOfRange {
            value,
            dtype,
            row,
            col,
        });
    }
    <T as NumCast>::from(value).ok_or(Error::ValueOutOfRange {
        value,
        dtype,
        row,
        col,
    })
}

fn narrow_array<T: NumCast + Copy>(
    data: &ArrayView2<'_, f64>,
    dtype: DataType,
    src_nodata: Option<f64>,
    fill: f64,
    origin: (usize, usize),
) -> Result<Array2<T>> {
    let (row_off, col_off) = origin;
    let mut cells = Vec::with_capacity(data.len());
    let mut fill_cast: Option<T> = None;
    for ((row, col), &v) in data.indexed_iter() {
        let (row, col) = (row + row_off, col + col_off);
        let cell = if is_nodata_value(v, src_nodata) {
            match fill_cast {
                Some(f) => f,
                None => {
                    let f = narrow_one::<T>(fill, dtype, row, col)?;
                    fill_cast = Some(f);
                    f
                }
            }
        } else {
            narrow_one::<T>(v, dtype, row, col)?
        };
        cells.push(cell);
    }
    Array2::from_shape_vec(data.dim(), cells)
        .map_err(|e| Error::InvalidParameter(format!("Buffer shape mismatch: {e}")))
}

impl TypedBuffer {
    /// Narrow f64 samples to `dtype`.
    ///
    /// Samples matching `src_nodata` (or NaN) become `dst_nodata`, or 0 / NaN
    /// when the destination has no sentinel. Any other sample outside the
    /// destination range fails with `ValueOutOfRange`; `origin` (row, col) is
    /// added to reported pixel positions.
    pub fn narrow(
        data: &ArrayView2<'_, f64>,
        dtype: DataType,
        src_nodata: Option<f64>,
        dst_nodata: Option<f64>,
        origin: (usize, usize),
    ) -> Result<TypedBuffer> {
        let fill = dst_nodata.unwrap_or(if dtype.is_integer() { 0.0 } else { f64::NAN });
        let out = match dtype {
            DataType::UInt8 => Self::UInt8(narrow_array(data, dtype, src_nodata, fill, origin)?),
            DataType::Int8 => Self::Int8(narrow_array(data, dtype, src_nodata, fill, origin)?),
            DataType::UInt16 => Self::UInt16(narrow_array(data, dtype, src_nodata, fill, origin)?),
            DataType::Int16 => Self::Int16(narrow_array(data, dtype, src_nodata, fill, origin)?),
            DataType::UInt32 => Self::UInt32(narrow_array(data, dtype, src_nodata, fill, origin)?),
            DataType::Int32 => Self::Int32(narrow_array(data, dtype, src_nodata, fill, origin)?),
            DataType::Float32 => {
                Self::Float32(narrow_array(data, dtype, src_nodata, fill, origin)?)
            }
            DataType::Float64 => {
                let mut out = data.to_owned();
                out.mapv_inplace(|v| if is_nodata_value(v, src_nodata) { fill } else { v });
                Self::Float64(out)
            }
        };
        Ok(out)
    }

    /// Buffer of `shape` with every sample set to `value` (narrowed).
    pub fn filled(dtype: DataType, shape: (usize, usize), value: f64) -> Result<TypedBuffer> {
        let one = Array2::from_elem((1, 1), value);
        let cell = Self::narrow(&one.view(), dtype, None, None, (0, 0))?;
        Ok(each_variant!(cell, arr => {
            let v = arr[(0, 0)];
            let filled = Array2::from_elem(shape, v);
            TypedBuffer::wrap(filled)
        }))
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Self::UInt8(_) => DataType::UInt8,
            Self::Int8(_) => DataType::Int8,
            Self::UInt16(_) => DataType::UInt16,
            Self::Int16(_) => DataType::Int16,
            Self::UInt32(_) => DataType::UInt32,
            Self::Int32(_) => DataType::Int32,
            Self::Float32(_) => DataType::Float32,
            Self::Float64(_) => DataType::Float64,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        each_variant!(self, arr => arr.dim())
    }

    /// Widen back to f64 (lossless for every supported type).
    pub fn to_f64(&self) -> Array2<f64> {
        each_variant!(self, arr => arr.mapv(|v| <f64 as NumCast>::from(v).unwrap_or(f64::NAN)))
    }

    /// Copy `tile` into `region` of this buffer. Types and shapes must agree.
    pub fn assign_region(&mut self, region: &Region, tile: &TypedBuffer) -> Result<()> {
        let (rows, cols) = self.shape();
        if !region.fits(cols, rows) || tile.shape() != (region.height, region.width) {
            return Err(Error::InvalidParameter(format!(
                "Tile of shape {:?} does not fit region {:?} of a {}x{} buffer",
                tile.shape(),
                region.as_tuple(),
                cols,
                rows
            )));
        }
        let window = s![
            region.row_off..region.row_off + region.height,
            region.col_off..region.col_off + region.width
        ];
        macro_rules! assign {
            ($target:expr, $tile:expr, $window:expr; $($variant:ident),*) => {
                match ($target, $tile) {
                    $((TypedBuffer::$variant(dst), TypedBuffer::$variant(src)) => {
                        dst.slice_mut($window).assign(src);
                        Ok(())
                    })*
                    (dst, src) => Err(Error::InvalidParameter(format!(
                        "Cannot write {} samples into a {} buffer",
                        src.data_type(),
                        dst.data_type()
                    ))),
                }
            };
        }
        assign!(self, tile, window; UInt8, Int8, UInt16, Int16, UInt32, Int32, Float32, Float64)
    }

    /// Copy of `region`.
    pub fn region(&self, region: &Region) -> Option<TypedBuffer> {
        let (rows, cols) = self.shape();
        if !region.fits(cols, rows) {
            return None;
        }
        let window = s![
            region.row_off..region.row_off + region.height,
            region.col_off..region.col_off + region.width
        ];
        Some(each_variant!(self, arr => TypedBuffer::wrap(arr.slice(window).to_owned())))
    }

    fn wrap<T: IntoTyped>(arr: Array2<T>) -> TypedBuffer {
        T::into_typed(arr)
    }
}

/// Maps a concrete array element type onto its `TypedBuffer` variant.
trait IntoTyped: Sized {
    fn into_typed(arr: Array2<Self>) -> TypedBuffer;
}

macro_rules! into_typed {
    ($($t:ty => $variant:ident),*) => {
        $(impl IntoTyped for $t {
            fn into_typed(arr: Array2<Self>) -> TypedBuffer {
                TypedBuffer::$variant(arr)
            }
        })*
    };
}

into_typed!(u8 => UInt8, i8 => Int8, u16 => UInt16, i16 => Int16,
    u32 => UInt32, i32 => Int32, f32 => Float32, f64 => Float64);

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_nan_is_nodata() {
        let buf = SampleBuffer::new(array![[1.0, f64::NAN], [-1.0, 4.0]], Some(-1.0));
        assert!(!buf.is_nodata(0, 0));
        assert!(buf.is_nodata(0, 1));
        assert!(buf.is_nodata(1, 0));
        assert!(buf.is_nodata(5, 5));
        assert_eq!(buf.valid_count(), 2);
    }

    #[test]
    fn test_narrow_byte_in_range() {
        let data = array![[0.0, 12.7], [255.0, f64::NAN]];
        let typed = TypedBuffer::narrow(&data.view(), DataType::UInt8, None, Some(0.0), (0, 0))
            .unwrap();
        assert_eq!(typed, TypedBuffer::UInt8(array![[0, 12], [255, 0]]));
    }

    #[test]
    fn test_narrow_out_of_range_reports_pixel() {
        let data = array![[1.0, 2.0], [3.0, 256.0]];
        let err = TypedBuffer::narrow(&data.view(), DataType::UInt8, None, None, (10, 20))
            .unwrap_err();
        match err {
            Error::ValueOutOfRange {
                value,
                dtype,
                row,
                col,
            } => {
                assert_eq!(value, 256.0);
                assert_eq!(dtype, DataType::UInt8);
                assert_eq!((row, col), (11, 21));
            }
            other => panic!("unexpected error {other:?}"),
        }

        let negative = array![[-1.0]];
        assert!(
            TypedBuffer::narrow(&negative.view(), DataType::UInt16, None, None, (0, 0)).is_err()
        );
        let fits = array![[-32768.0, 32767.0]];
        assert!(TypedBuffer::narrow(&fits.view(), DataType::Int16, None, None, (0, 0)).is_ok());
    }

    #[test]
    fn test_nodata_sentinel_must_fit() {
        let data = array![[f64::NAN]];
        let err = TypedBuffer::narrow(&data.view(), DataType::UInt8, None, Some(-9999.0), (0, 0));
        assert!(matches!(err, Err(Error::ValueOutOfRange { .. })));
    }

    #[test]
    fn test_float32_overflow() {
        let data = array![[1e300]];
        assert!(TypedBuffer::narrow(&data.view(), DataType::Float32, None, None, (0, 0)).is_err());
        let ok = array![[3.5, f64::NAN]];
        let typed =
            TypedBuffer::narrow(&ok.view(), DataType::Float32, None, None, (0, 0)).unwrap();
        let back = typed.to_f64();
        assert_eq!(back[(0, 0)], 3.5);
        assert!(back[(0, 1)].is_nan());
    }

    #[test]
    fn test_source_sentinel_is_rewritten() {
        let data = array![[-9999.0, 7.0]];
        let typed = TypedBuffer::narrow(
            &data.view(),
            DataType::Int32,
            Some(-9999.0),
            Some(-1.0),
            (0, 0),
        )
        .unwrap();
        assert_eq!(typed, TypedBuffer::Int32(array![[-1, 7]]));
    }

    #[test]
    fn test_assign_region() {
        let mut dst = TypedBuffer::filled(DataType::Int16, (4, 4), 0.0).unwrap();
        let tile = TypedBuffer::Int16(array![[1, 2], [3, 4]]);
        dst.assign_region(&Region::new(2, 1, 2, 2), &tile).unwrap();
        let back = dst.to_f64();
        assert_eq!(back[(1, 2)], 1.0);
        assert_eq!(back[(2, 3)], 4.0);
        assert_eq!(back[(0, 0)], 0.0);

        let wrong = TypedBuffer::UInt8(array![[1]]);
        assert!(dst.assign_region(&Region::new(0, 0, 1, 1), &wrong).is_err());
        assert!(dst.assign_region(&Region::new(3, 3, 2, 2), &tile).is_err());
    }

    #[test]
    fn test_data_type_names() {
        assert_eq!(DataType::from_name("Byte"), Some(DataType::UInt8));
        assert_eq!(DataType::from_name("float32"), Some(DataType::Float32));
        assert_eq!(DataType::from_name("CInt16"), None);
        assert_eq!(DataType::Int16.to_string(), "Int16");
    }
}
