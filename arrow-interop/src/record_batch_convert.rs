//! Conversion between device columns and Arrow arrays.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow_array::builder::{PrimitiveBuilder, StringBuilder};
use arrow_array::types::{
    ArrowPrimitiveType, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type,
    UInt8Type,
};
use arrow_array::{Array, ArrayRef, PrimitiveArray, RecordBatch, StringArray};
use arrow_schema::{DataType as ArrowType, Field, Schema};
use gpu_memory_manager::MemoryResource;
use gpu_olap_core::{Column, DataType, NativeType, StringColumn};
use tracing::debug;

use crate::schema_utils::{from_arrow_type, to_arrow_type, SchemaExt};

/// A device column of either layout.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceArray {
    Fixed(Column),
    Strings(StringColumn),
}

impl DeviceArray {
    pub fn size(&self) -> usize {
        match self {
            DeviceArray::Fixed(c) => c.size(),
            DeviceArray::Strings(s) => s.size(),
        }
    }

    pub fn null_count(&self) -> usize {
        match self {
            DeviceArray::Fixed(c) => c.null_count(),
            DeviceArray::Strings(s) => s.null_count(),
        }
    }

    fn arrow_type(&self) -> ArrowType {
        match self {
            DeviceArray::Fixed(c) => to_arrow_type(c.data_type()),
            DeviceArray::Strings(_) => ArrowType::Utf8,
        }
    }
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

/// Host copy of the Arrow string layout: `(chars, offsets)`.
///
/// `offsets` has `size() + 1` entries starting at 0; null rows are empty.
pub fn create_offsets(strings: &StringColumn) -> (Vec<u8>, Vec<i32>) {
    let offsets = (0..=strings.size()).map(|i| strings.offset(i) as i32).collect();
    (strings.chars_bytes().to_vec(), offsets)
}

pub fn strings_to_arrow(strings: &StringColumn) -> StringArray {
    let mut b = StringBuilder::with_capacity(strings.size(), strings.chars_size());
    for row in strings.iter() {
        b.append_option(row);
    }
    b.finish()
}

/// Strings column from an Arrow array. Sliced arrays are rebased to offset 0.
pub fn strings_from_arrow(
    array: &StringArray,
    mr: &Arc<dyn MemoryResource>,
) -> Result<StringColumn> {
    let offsets = array.value_offsets();
    let base = offsets.first().copied().unwrap_or(0);
    let end = offsets.last().copied().unwrap_or(0);
    let rebased: Vec<i32> = offsets.iter().map(|o| o - base).collect();
    let chars = array
        .value_data()
        .get(base as usize..end as usize)
        .context("Arrow string offsets past value buffer")?;
    let valid = (array.null_count() > 0)
        .then(|| (0..array.len()).map(|i| array.is_valid(i)).collect::<Vec<_>>());
    debug!(
        "ArrowInterop: importing {} strings, {} chars",
        array.len(),
        chars.len()
    );
    StringColumn::from_parts(&rebased, chars, valid.as_deref(), mr)
        .context("Importing Arrow strings")
}

// ---------------------------------------------------------------------------
// Fixed width
// ---------------------------------------------------------------------------

pub fn column_to_arrow(column: &Column) -> Result<ArrayRef> {
    match column.data_type() {
        DataType::Int8 => primitive_to_arrow::<Int8Type>(column),
        DataType::Int16 => primitive_to_arrow::<Int16Type>(column),
        DataType::Int32 => primitive_to_arrow::<Int32Type>(column),
        DataType::Int64 => primitive_to_arrow::<Int64Type>(column),
        DataType::UInt8 => primitive_to_arrow::<UInt8Type>(column),
        DataType::Float32 => primitive_to_arrow::<Float32Type>(column),
        DataType::Float64 => primitive_to_arrow::<Float64Type>(column),
    }
}

fn primitive_to_arrow<A>(column: &Column) -> Result<ArrayRef>
where
    A: ArrowPrimitiveType,
    A::Native: NativeType,
{
    let values = column.to_options::<A::Native>()?;
    let mut b = PrimitiveBuilder::<A>::with_capacity(values.len());
    for v in values {
        b.append_option(v);
    }
    Ok(Arc::new(b.finish()))
}

pub fn column_from_arrow(array: &dyn Array, mr: &Arc<dyn MemoryResource>) -> Result<Column> {
    match from_arrow_type(array.data_type())? {
        DataType::Int8 => primitive_from_arrow::<Int8Type>(array, mr),
        DataType::Int16 => primitive_from_arrow::<Int16Type>(array, mr),
        DataType::Int32 => primitive_from_arrow::<Int32Type>(array, mr),
        DataType::Int64 => primitive_from_arrow::<Int64Type>(array, mr),
        DataType::UInt8 => primitive_from_arrow::<UInt8Type>(array, mr),
        DataType::Float32 => primitive_from_arrow::<Float32Type>(array, mr),
        DataType::Float64 => primitive_from_arrow::<Float64Type>(array, mr),
    }
}

fn primitive_from_arrow<A>(array: &dyn Array, mr: &Arc<dyn MemoryResource>) -> Result<Column>
where
    A: ArrowPrimitiveType,
    A::Native: NativeType,
{
    let a = array
        .as_any()
        .downcast_ref::<PrimitiveArray<A>>()
        .with_context(|| format!("Expected {:?} array", A::DATA_TYPE))?;
    let valid = (a.null_count() > 0)
        .then(|| (0..a.len()).map(|i| a.is_valid(i)).collect::<Vec<_>>());
    Ok(Column::build::<A::Native>(a.values(), valid.as_deref(), mr)?)
}

// ---------------------------------------------------------------------------
// RecordBatch
// ---------------------------------------------------------------------------

pub fn record_batch_to_columns(
    batch: &RecordBatch,
    mr: &Arc<dyn MemoryResource>,
) -> Result<Vec<DeviceArray>> {
    let schema = batch.schema();
    if !schema.is_device_compatible() {
        bail!(
            "RecordBatch has columns with no device layout: {:?}",
            schema.incompatible_fields()
        );
    }
    debug!(
        "ArrowInterop: importing batch rows={} cols={} row_width={}B",
        batch.num_rows(),
        batch.num_columns(),
        schema.row_byte_width()
    );

    schema
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(field, array)| {
            let converted = match array.data_type() {
                ArrowType::Utf8 => {
                    let strings = array
                        .as_any()
                        .downcast_ref::<StringArray>()
                        .context("Expected Utf8 array")?;
                    strings_from_arrow(strings, mr).map(DeviceArray::Strings)
                }
                _ => column_from_arrow(array.as_ref(), mr).map(DeviceArray::Fixed),
            };
            converted.with_context(|| format!("Converting column '{}'", field.name()))
        })
        .collect()
}

/// Assemble named device columns into a `RecordBatch`.
pub fn columns_to_record_batch(columns: &[(&str, DeviceArray)]) -> Result<RecordBatch> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, col)| Field::new(*name, col.arrow_type(), col.null_count() > 0))
        .collect();
    let arrays = columns
        .iter()
        .map(|(name, col)| match col {
            DeviceArray::Fixed(c) => {
                column_to_arrow(c).with_context(|| format!("Exporting column '{}'", name))
            }
            DeviceArray::Strings(s) => Ok(Arc::new(strings_to_arrow(s)) as ArrayRef),
        })
        .collect::<Result<Vec<_>>>()?;

    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .context("Building RecordBatch from device columns")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
