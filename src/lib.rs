//! Columnar primitives on an accelerator-style execution model.
//!
//! * [`rolling`]: sliding-window aggregation over fixed-width columns, with
//!   builtin reducers and user-supplied window functions.
//! * [`strings`]: offsets/chars strings columns with sublist, gather,
//!   scatter, sort and concatenation.
//! * [`interop`]: conversion to and from Apache Arrow.
//!
//! Every kernel takes an [`ExecContext`] and returns a [`Deferred`] result
//! that completes in submission order on the context's queue.

pub use gpu_memory_manager::{
    default_resource, DeviceBuffer, ExecutionQueue, HostMemoryResource, MemoryResource,
    MemoryStats, SlabAllocator,
};
pub use gpu_olap_core::{
    Bitmask, Column, DataType, Deferred, ExecConfig, ExecContext, KernelError, NativeType,
    PoolConfig, Result, Scalar, StringColumn, ValuesRef,
};

pub mod rolling {
    pub use gpu_kernel_compiler::rolling::*;
    pub use gpu_kernel_compiler::{HostLinker, JitCompiler, KernelCache, WindowFunction};
}

pub mod strings {
    pub use gpu_kernel_compiler::strings::*;
}

pub mod interop {
    pub use arrow_interop::*;
}

/// Context configured from `GPU_OLAP_*` environment variables.
pub fn context_from_env() -> anyhow::Result<ExecContext> {
    let ctx = ExecContext::from_env()?;
    tracing::info!(
        "Engine: context ready (sync_launches={})",
        ctx.sync_launches()
    );
    Ok(ctx)
}
