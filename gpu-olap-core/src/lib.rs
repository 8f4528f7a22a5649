//! Column data model shared by the rolling window and strings kernels.

pub mod bitmask;
pub mod column;
pub mod config;
pub mod context;
pub mod error;
pub mod strings;
pub mod types;

pub use bitmask::{bitmask_bytes, count_set_bits, get_bit, set_bit, Bitmask};
pub use column::Column;
pub use config::{ExecConfig, PoolConfig};
pub use context::{Deferred, ExecContext};
pub use error::{KernelError, Result};
pub use strings::StringColumn;
pub use types::{DataType, NativeType, Scalar, ValuesRef};
