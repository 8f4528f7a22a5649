//! Nullable fixed-width column.

use std::fmt;
use std::sync::Arc;

use gpu_memory_manager::{allocate, DeviceBuffer, MemoryResource};
use num_traits::ToPrimitive;
use rayon::prelude::*;

use crate::bitmask::Bitmask;
use crate::error::{length_mismatch, KernelError, Result};
use crate::types::{DataType, NativeType, Scalar};

/// Immutable typed column with an optional validity bitmap.
///
/// A missing bitmap means every row is valid. `null_count` is computed once
/// at construction and always matches the bitmap.
#[derive(Clone)]
pub struct Column {
    dtype: DataType,
    len: usize,
    data: Arc<DeviceBuffer>,
    validity: Option<Bitmask>,
    null_count: usize,
}

impl Column {
    /// Assemble a column from an owned data buffer and optional bitmap.
    pub fn new(
        dtype: DataType,
        len: usize,
        data: DeviceBuffer,
        validity: Option<Bitmask>,
    ) -> Result<Self> {
        Self::from_shared(dtype, len, Arc::new(data), validity)
    }

    /// Like [`Column::new`] but over a buffer that may be shared with
    /// another column.
    pub fn from_shared(
        dtype: DataType,
        len: usize,
        data: Arc<DeviceBuffer>,
        validity: Option<Bitmask>,
    ) -> Result<Self> {
        let expected = len * dtype.byte_width();
        if data.len() < expected {
            return Err(KernelError::InvalidArgument(format!(
                "{} column of {} rows needs {} data bytes, buffer holds {}",
                dtype,
                len,
                expected,
                data.len()
            )));
        }
        if let Some(mask) = &validity {
            if mask.len() != len {
                return Err(KernelError::InvalidArgument(length_mismatch(
                    "Column::new validity",
                    len,
                    mask.len(),
                )));
            }
        }
        let null_count = validity.as_ref().map_or(0, Bitmask::null_count);
        Ok(Self {
            dtype,
            len,
            data,
            validity,
            null_count,
        })
    }

    /// Copy `values` into a freshly allocated column, with per-row validity
    /// when `valid` is given.
    pub fn build<T: NativeType>(
        values: &[T],
        valid: Option<&[bool]>,
        mr: &Arc<dyn MemoryResource>,
    ) -> Result<Self> {
        let width = T::DATA_TYPE.byte_width();
        let mut data = allocate(mr, values.len() * width).map_err(KernelError::allocation)?;
        data.as_mut_slice()
            .par_chunks_mut(width)
            .zip(values.par_iter())
            .for_each(|(slot, v)| v.write_le(slot));

        let validity = match valid {
            Some(valid) if valid.len() != values.len() => {
                return Err(KernelError::InvalidArgument(length_mismatch(
                    "Column::build",
                    values.len(),
                    valid.len(),
                )))
            }
            Some(valid) => Some(Bitmask::from_bools(valid, mr)?),
            None => None,
        };
        Self::new(T::DATA_TYPE, values.len(), data, validity)
    }

    /// All-valid column with no bitmap.
    pub fn from_slice<T: NativeType>(values: &[T], mr: &Arc<dyn MemoryResource>) -> Result<Self> {
        Self::build(values, None, mr)
    }

    /// Column from optional values. A bitmap is attached only if some row is null.
    pub fn from_options<T: NativeType>(
        values: &[Option<T>],
        mr: &Arc<dyn MemoryResource>,
    ) -> Result<Self> {
        let data: Vec<T> = values.iter().map(|v| v.unwrap_or_default()).collect();
        if values.iter().all(Option::is_some) {
            return Self::build(&data, None, mr);
        }
        let valid: Vec<bool> = values.iter().map(Option::is_some).collect();
        Self::build(&data, Some(valid.as_slice()), mr)
    }

    pub fn data_type(&self) -> DataType {
        self.dtype
    }

    /// Number of rows.
    pub fn size(&self) -> usize {
        self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn null_mask(&self) -> Option<&Bitmask> {
        self.validity.as_ref()
    }

    pub fn null_count(&self) -> usize {
        self.null_count
    }

    pub fn has_nulls(&self) -> bool {
        self.null_count > 0
    }

    #[inline]
    pub fn is_valid(&self, i: usize) -> bool {
        self.validity.as_ref().map_or(true, |mask| mask.get(i))
    }

    /// Raw little-endian element bytes, `len * byte_width` long.
    pub fn data_bytes(&self) -> &[u8] {
        &self.data.as_slice()[..self.len * self.dtype.byte_width()]
    }

    fn check_type<T: NativeType>(&self) -> Result<()> {
        if T::DATA_TYPE != self.dtype {
            return Err(KernelError::TypeMismatch(format!(
                "column holds {}, requested {}",
                self.dtype,
                T::DATA_TYPE
            )));
        }
        Ok(())
    }

    /// Decode every data slot, null rows included.
    pub fn values<T: NativeType>(&self) -> Result<Vec<T>> {
        self.check_type::<T>()?;
        let width = self.dtype.byte_width();
        Ok(self
            .data_bytes()
            .par_chunks(width)
            .map(T::read_le)
            .collect())
    }

    /// Row `i`, or `None` when the row is null.
    pub fn value<T: NativeType>(&self, i: usize) -> Result<Option<T>> {
        self.check_type::<T>()?;
        if i >= self.len {
            return Err(KernelError::OutOfBounds(format!(
                "row {} of a {}-row column",
                i, self.len
            )));
        }
        if !self.is_valid(i) {
            return Ok(None);
        }
        let width = self.dtype.byte_width();
        Ok(Some(T::read_le(&self.data_bytes()[i * width..])))
    }

    pub fn to_options<T: NativeType>(&self) -> Result<Vec<Option<T>>> {
        let values = self.values::<T>()?;
        Ok(values
            .into_iter()
            .enumerate()
            .map(|(i, v)| self.is_valid(i).then_some(v))
            .collect())
    }

    /// Row `i` as a [`Scalar`], or `None` when out of range or null.
    pub fn get(&self, i: usize) -> Option<Scalar> {
        if i >= self.len || !self.is_valid(i) {
            return None;
        }
        let width = self.dtype.byte_width();
        let bytes = &self.data_bytes()[i * width..];
        let scalar = crate::dispatch_native!(self.dtype, T => T::read_le(bytes).into_scalar());
        Some(scalar)
    }

    /// Interpret an integer column as row indices.
    ///
    /// Null entries are rejected. Range checks are left to the caller.
    pub fn index_values(&self, fname: &str) -> Result<Vec<i64>> {
        if !self.dtype.is_integer() {
            return Err(KernelError::TypeMismatch(format!(
                "{}: index column must be an integer type, got {}",
                fname, self.dtype
            )));
        }
        if self.has_nulls() {
            return Err(KernelError::InvalidArgument(format!(
                "{}: index column contains {} nulls",
                fname, self.null_count
            )));
        }
        let width = self.dtype.byte_width();
        let bytes = self.data_bytes();
        Ok(crate::dispatch_native!(self.dtype, T => bytes
            .par_chunks(width)
            .map(|chunk| T::read_le(chunk).to_i64().unwrap_or(i64::MIN))
            .collect()))
    }
}

impl PartialEq for Column {
    /// Logical equality: same type, same length, same rows (data of null
    /// rows is ignored).
    fn eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.len == other.len
            && (0..self.len).all(|i| self.get(i) == other.get(i))
    }
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows: Vec<Option<Scalar>> = (0..self.len).map(|i| self.get(i)).collect();
        f.debug_struct("Column")
            .field("dtype", &self.dtype)
            .field("null_count", &self.null_count)
            .field("rows", &rows)
            .finish()
    }
}
