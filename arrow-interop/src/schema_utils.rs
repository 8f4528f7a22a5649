use anyhow::{bail, Result};
use arrow_schema::{DataType as ArrowType, Schema};
use gpu_olap_core::DataType;

/// Arrow type holding a column of `dtype`.
pub fn to_arrow_type(dtype: DataType) -> ArrowType {
    match dtype {
        DataType::Int8 => ArrowType::Int8,
        DataType::Int16 => ArrowType::Int16,
        DataType::Int32 => ArrowType::Int32,
        DataType::Int64 => ArrowType::Int64,
        DataType::UInt8 => ArrowType::UInt8,
        DataType::Float32 => ArrowType::Float32,
        DataType::Float64 => ArrowType::Float64,
    }
}

/// Fixed-width device type for an Arrow type. Strings are handled separately.
pub fn from_arrow_type(dt: &ArrowType) -> Result<DataType> {
    Ok(match dt {
        ArrowType::Int8 => DataType::Int8,
        ArrowType::Int16 => DataType::Int16,
        ArrowType::Int32 => DataType::Int32,
        ArrowType::Int64 => DataType::Int64,
        ArrowType::UInt8 => DataType::UInt8,
        ArrowType::Float32 => DataType::Float32,
        ArrowType::Float64 => DataType::Float64,
        other => bail!("Unsupported Arrow DataType for device columns: {:?}", other),
    })
}

pub trait SchemaExt {
    fn is_device_compatible(&self) -> bool;
    /// Bytes per row on the device; strings count their offset only.
    fn row_byte_width(&self) -> usize;
    fn incompatible_fields(&self) -> Vec<String>;
}

impl SchemaExt for Schema {
    fn is_device_compatible(&self) -> bool {
        self.incompatible_fields().is_empty()
    }

    fn row_byte_width(&self) -> usize {
        self.fields()
            .iter()
            .map(|f| match f.data_type() {
                ArrowType::Utf8 => 4,
                dt => from_arrow_type(dt).map_or(0, DataType::byte_width),
            })
            .sum()
    }

    fn incompatible_fields(&self) -> Vec<String> {
        self.fields()
            .iter()
            .filter(|f| *f.data_type() != ArrowType::Utf8 && from_arrow_type(f.data_type()).is_err())
            .map(|f| f.name().clone())
            .collect()
    }
}
