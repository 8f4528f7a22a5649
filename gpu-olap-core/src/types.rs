//! Element types for fixed-width columns.

use std::fmt;

use num_traits::{NumCast, ToPrimitive};

/// Element type tag of a fixed-width column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    Float32,
    Float64,
}

impl DataType {
    /// Byte width of one element.
    pub fn byte_width(self) -> usize {
        match self {
            DataType::Int8 | DataType::UInt8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 | DataType::Float32 => 4,
            DataType::Int64 | DataType::Float64 => 8,
        }
    }

    pub fn is_integer(self) -> bool {
        !self.is_floating()
    }

    pub fn is_floating(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    /// Spelling of the type in generated device source.
    pub fn device_name(self) -> &'static str {
        match self {
            DataType::Int8 => "int8_t",
            DataType::Int16 => "int16_t",
            DataType::Int32 => "int32_t",
            DataType::Int64 => "int64_t",
            DataType::UInt8 => "uint8_t",
            DataType::Float32 => "float",
            DataType::Float64 => "double",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int8 => "INT8",
            DataType::Int16 => "INT16",
            DataType::Int32 => "INT32",
            DataType::Int64 => "INT64",
            DataType::UInt8 => "UINT8",
            DataType::Float32 => "FLOAT32",
            DataType::Float64 => "FLOAT64",
        };
        f.write_str(name)
    }
}

/// A single typed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    Float32(f32),
    Float64(f64),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Int8(_) => DataType::Int8,
            Scalar::Int16(_) => DataType::Int16,
            Scalar::Int32(_) => DataType::Int32,
            Scalar::Int64(_) => DataType::Int64,
            Scalar::UInt8(_) => DataType::UInt8,
            Scalar::Float32(_) => DataType::Float32,
            Scalar::Float64(_) => DataType::Float64,
        }
    }

    pub fn to_f64(&self) -> f64 {
        match *self {
            Scalar::Int8(v) => v as f64,
            Scalar::Int16(v) => v as f64,
            Scalar::Int32(v) => v as f64,
            Scalar::Int64(v) => v as f64,
            Scalar::UInt8(v) => v as f64,
            Scalar::Float32(v) => v as f64,
            Scalar::Float64(v) => v,
        }
    }

    /// Write the little-endian encoding into `out` (exactly `byte_width` bytes).
    pub fn write_le(&self, out: &mut [u8]) {
        match *self {
            Scalar::Int8(v) => v.write_le(out),
            Scalar::Int16(v) => v.write_le(out),
            Scalar::Int32(v) => v.write_le(out),
            Scalar::Int64(v) => v.write_le(out),
            Scalar::UInt8(v) => v.write_le(out),
            Scalar::Float32(v) => v.write_le(out),
            Scalar::Float64(v) => v.write_le(out),
        }
    }
}

/// Borrowed run of typed values, as handed to user-defined aggregators.
#[derive(Debug, Clone, Copy)]
pub enum ValuesRef<'a> {
    Int8(&'a [i8]),
    Int16(&'a [i16]),
    Int32(&'a [i32]),
    Int64(&'a [i64]),
    UInt8(&'a [u8]),
    Float32(&'a [f32]),
    Float64(&'a [f64]),
}

impl<'a> ValuesRef<'a> {
    pub fn data_type(&self) -> DataType {
        match self {
            ValuesRef::Int8(_) => DataType::Int8,
            ValuesRef::Int16(_) => DataType::Int16,
            ValuesRef::Int32(_) => DataType::Int32,
            ValuesRef::Int64(_) => DataType::Int64,
            ValuesRef::UInt8(_) => DataType::UInt8,
            ValuesRef::Float32(_) => DataType::Float32,
            ValuesRef::Float64(_) => DataType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ValuesRef::Int8(v) => v.len(),
            ValuesRef::Int16(v) => v.len(),
            ValuesRef::Int32(v) => v.len(),
            ValuesRef::Int64(v) => v.len(),
            ValuesRef::UInt8(v) => v.len(),
            ValuesRef::Float32(v) => v.len(),
            ValuesRef::Float64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Option<Scalar> {
        match self {
            ValuesRef::Int8(v) => v.get(i).map(|&x| Scalar::Int8(x)),
            ValuesRef::Int16(v) => v.get(i).map(|&x| Scalar::Int16(x)),
            ValuesRef::Int32(v) => v.get(i).map(|&x| Scalar::Int32(x)),
            ValuesRef::Int64(v) => v.get(i).map(|&x| Scalar::Int64(x)),
            ValuesRef::UInt8(v) => v.get(i).map(|&x| Scalar::UInt8(x)),
            ValuesRef::Float32(v) => v.get(i).map(|&x| Scalar::Float32(x)),
            ValuesRef::Float64(v) => v.get(i).map(|&x| Scalar::Float64(x)),
        }
    }

    /// All values widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        (0..self.len())
            .filter_map(|i| self.get(i))
            .map(|s| s.to_f64())
            .collect()
    }
}

/// Rust types that can back a fixed-width column.
pub trait NativeType:
    Copy + Default + PartialOrd + fmt::Debug + Send + Sync + NumCast + ToPrimitive + 'static
{
    const DATA_TYPE: DataType;

    fn read_le(bytes: &[u8]) -> Self;

    fn write_le(self, out: &mut [u8]);

    fn into_scalar(self) -> Scalar;

    fn from_scalar(scalar: Scalar) -> Option<Self>;

    fn values_ref(values: &[Self]) -> ValuesRef<'_>;
}

macro_rules! impl_native {
    ($t:ty, $variant:ident) => {
        impl NativeType for $t {
            const DATA_TYPE: DataType = DataType::$variant;

            #[inline]
            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(&bytes[..std::mem::size_of::<$t>()]);
                <$t>::from_le_bytes(raw)
            }

            #[inline]
            fn write_le(self, out: &mut [u8]) {
                out[..std::mem::size_of::<$t>()].copy_from_slice(&self.to_le_bytes());
            }

            fn into_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }

            fn from_scalar(scalar: Scalar) -> Option<Self> {
                match scalar {
                    Scalar::$variant(v) => Some(v),
                    _ => None,
                }
            }

            fn values_ref(values: &[Self]) -> ValuesRef<'_> {
                ValuesRef::$variant(values)
            }
        }
    };
}

impl_native!(i8, Int8);
impl_native!(i16, Int16);
impl_native!(i32, Int32);
impl_native!(i64, Int64);
impl_native!(u8, UInt8);
impl_native!(f32, Float32);
impl_native!(f64, Float64);

/// Run `$body` with `$t` bound to the Rust type behind a [`DataType`].
#[macro_export]
macro_rules! dispatch_native {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            $crate::DataType::Int8 => {
                type $t = i8;
                $body
            }
            $crate::DataType::Int16 => {
                type $t = i16;
                $body
            }
            $crate::DataType::Int32 => {
                type $t = i32;
                $body
            }
            $crate::DataType::Int64 => {
                type $t = i64;
                $body
            }
            $crate::DataType::UInt8 => {
                type $t = u8;
                $body
            }
            $crate::DataType::Float32 => {
                type $t = f32;
                $body
            }
            $crate::DataType::Float64 => {
                type $t = f64;
                $body
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_widths() {
        assert_eq!(DataType::Int8.byte_width(), 1);
        assert_eq!(DataType::Int16.byte_width(), 2);
        assert_eq!(DataType::Float32.byte_width(), 4);
        assert_eq!(DataType::Int64.byte_width(), 8);
    }

    #[test]
    fn little_endian_encoding() {
        let mut buf = [0u8; 4];
        (-2i32).write_le(&mut buf);
        assert_eq!(buf, [0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(i32::read_le(&buf), -2);

        let mut buf = [0u8; 8];
        Scalar::Float64(1.5).write_le(&mut buf);
        assert_eq!(f64::read_le(&buf), 1.5);
    }

    #[test]
    fn dispatch_picks_rust_type() {
        let width = dispatch_native!(DataType::Int16, T => std::mem::size_of::<T>());
        assert_eq!(width, 2);
        let tag = dispatch_native!(DataType::Float32, T => <T as NativeType>::DATA_TYPE);
        assert_eq!(tag, DataType::Float32);
    }

    #[test]
    fn values_ref_accessors() {
        let data = [3i64, 4, 5];
        let view = i64::values_ref(&data);
        assert_eq!(view.data_type(), DataType::Int64);
        assert_eq!(view.len(), 3);
        assert_eq!(view.get(1), Some(Scalar::Int64(4)));
        assert_eq!(view.get(3), None);
        assert_eq!(view.to_f64_vec(), vec![3.0, 4.0, 5.0]);
    }
}
