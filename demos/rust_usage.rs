use std::sync::Arc;

use anyhow::{anyhow, Result};
use gpu_olap_engine::rolling::{
    rolling_window, rolling_window_udf, HostLinker, KernelCache, RollingOp, UdfAggregator,
    WindowBounds,
};
use gpu_olap_engine::strings::{
    concatenate, join_strings, print, scatter_scalar, sort, NullOrder, Order, SortKey,
};
use gpu_olap_engine::{
    context_from_env, Column, ExecContext, MemoryResource, Scalar, StringColumn, ValuesRef,
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("GPU OLAP Engine - Rust Examples");

    // GPU_OLAP_* variables pick the queue depth and allocator
    let ctx = context_from_env()?;

    rolling_example(&ctx).await?;
    udf_example(&ctx)?;
    strings_example(&ctx)?;

    ctx.synchronize()?;
    info!(
        "Memory resource {}: {:?}",
        ctx.memory_resource().name(),
        ctx.memory_resource().stats()
    );
    Ok(())
}

async fn rolling_example(ctx: &ExecContext) -> Result<()> {
    info!("=== Example 1: Rolling Windows ===");

    let prices = Column::from_options(
        &[Some(10.0f64), Some(11.5), None, Some(12.0), Some(9.5), Some(10.5)],
        ctx.memory_resource(),
    )?;
    let bounds = WindowBounds::fixed(3, 0);

    // Both launches are queued before either is awaited
    let mean = rolling_window(&prices, &bounds, 2, RollingOp::Mean, ctx)?;
    let count = rolling_window(&prices, &bounds, 0, RollingOp::Count, ctx)?;

    let mean = mean.wait_async().await?;
    let count = count.wait_async().await?;
    info!("3-row mean:  {:?}", mean.to_options::<f64>()?);
    info!("3-row count: {:?}", count.values::<i32>()?);
    Ok(())
}

fn udf_example(ctx: &ExecContext) -> Result<()> {
    info!("=== Example 2: UDF Reducer ===");

    let linker = Arc::new(HostLinker::new());
    linker.register("range_of", |values: ValuesRef<'_>| match values {
        ValuesRef::Int64(v) => {
            let hi = v.iter().max().copied().unwrap_or_default();
            let lo = v.iter().min().copied().unwrap_or_default();
            Ok(Scalar::Int64(hi - lo))
        }
        other => Err(anyhow!("range_of: unsupported {}", other.data_type())),
    });
    let kernels = KernelCache::new(linker);
    let udf = UdfAggregator::Cuda {
        source: "__device__ int64_t range_of(const int64_t* v, int n) { return 0; }".into(),
    };

    let input = Column::from_slice(&[4i64, 8, 1, 9, 3], ctx.memory_resource())?;
    let out = rolling_window_udf(&input, &WindowBounds::fixed(2, 1), 3, &udf, &kernels, ctx)?
        .wait()?;
    info!("centered range: {:?}", out.to_options::<i64>()?);
    Ok(())
}

fn strings_example(ctx: &ExecContext) -> Result<()> {
    info!("=== Example 3: Strings ===");

    let mr = ctx.memory_resource();
    let first = StringColumn::from_options(&[Some("ada"), Some("grace"), None, Some("linus")], mr)?;
    let last = StringColumn::from_options(&[Some("lovelace"), Some("hopper"), Some("x"), None], mr)?;

    let full = concatenate(&[&first, &last], " ", Some("?"), ctx)?.wait()?;
    let sorted = sort(&full, SortKey::Length, Order::Descending, NullOrder::After, ctx)?.wait()?;
    print(&sorted, 0, None, Some(12), "\n")?;

    let redacted = scatter_scalar(&sorted, "***", &Column::from_slice(&[0i32], mr)?, ctx)?.wait()?;
    let joined = join_strings(&redacted, ", ", Some("-"), ctx)?.wait()?;
    info!("joined: {:?}", joined.get_str(0));
    Ok(())
}
