pub mod codegen;
pub mod jit;
pub mod rolling;
pub mod strings;

pub use codegen::{GeneratedKernel, KernelCodegen};
pub use jit::{HostLinker, JitCompiler, KernelCache, WindowFunction};
pub use rolling::{rolling_window, rolling_window_udf, RollingOp, UdfAggregator, WindowBounds};
