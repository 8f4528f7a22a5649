//! Arrow ↔ device column conversion.
//!
//! Fixed-width columns map one-to-one onto Arrow primitive arrays. Strings
//! columns share Arrow's `Utf8` layout: an `i32` offsets buffer of
//! `rows + 1` entries starting at 0 plus a contiguous chars buffer, with
//! null rows occupying zero bytes.
//!
//! ```text
//! offsets: [ 0 | 2 | 2 | 5 ]      chars: [ a b c d e ]
//!            "ab"  null  "cde"
//! ```

pub mod record_batch_convert;
pub mod schema_utils;

pub use record_batch_convert::{
    column_from_arrow, column_to_arrow, columns_to_record_batch, create_offsets,
    record_batch_to_columns, strings_from_arrow, strings_to_arrow, DeviceArray,
};
pub use schema_utils::{from_arrow_type, to_arrow_type, SchemaExt};
