//! End-to-end tests for the engine facade.
//!
//! Columns are built on the host, pushed through the rolling and strings
//! kernels on an execution queue, and converted back out through Arrow.

use std::sync::Arc;

use anyhow::anyhow;
use arrow_array::{Array, Float64Array, Int32Array, RecordBatch, StringArray};
use gpu_olap_engine::interop::{self, DeviceArray};
use gpu_olap_engine::rolling::{
    rolling_window, rolling_window_udf, HostLinker, KernelCache, RollingOp, UdfAggregator,
    WindowBounds,
};
use gpu_olap_engine::strings::{
    concatenate, gather, join_strings, scatter, sort, sorted_order, sublist, NullOrder, Order,
    SortKey,
};
use gpu_olap_engine::{
    default_resource, Column, DataType, ExecConfig, ExecContext, HostMemoryResource, KernelError,
    MemoryResource, PoolConfig, Scalar, StringColumn, ValuesRef,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn private_context() -> ExecContext {
    ExecContext::from_config(&ExecConfig::default()).unwrap()
}

fn strings(values: &[Option<&str>]) -> StringColumn {
    StringColumn::from_options(values, &default_resource()).unwrap()
}

fn owned(values: &[Option<&str>]) -> Vec<Option<String>> {
    values.iter().map(|v| v.map(str::to_owned)).collect()
}

// ---------------------------------------------------------------------------
// Rolling windows
// ---------------------------------------------------------------------------

#[test]
fn test_rolling_sum_trailing_window() {
    let ctx = private_context();
    let input = Column::from_slice(&[1i32, 2, 3, 4, 5], ctx.memory_resource()).unwrap();
    let out = rolling_window(&input, &WindowBounds::fixed(2, 0), 2, RollingOp::Sum, &ctx)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(
        out.to_options::<i32>().unwrap(),
        vec![None, Some(3), Some(5), Some(7), Some(9)]
    );
    assert_eq!(out.null_count(), 1);
}

#[test]
fn test_rolling_count_variable_window() {
    let ctx = private_context();
    let mr = ctx.memory_resource();
    let input = Column::from_options(&[Some(1.5f64), None, Some(2.5), Some(4.0)], mr).unwrap();
    let window = Column::from_slice(&[1i32, 2, 4, 2], mr).unwrap();
    let forward = Column::from_slice(&[1i32, 0, 0, 0], mr).unwrap();
    let out = rolling_window(
        &input,
        &WindowBounds::variable(window, forward),
        0,
        RollingOp::Count,
        &ctx,
    )
    .unwrap()
    .wait()
    .unwrap();
    assert_eq!(out.data_type(), DataType::Int32);
    assert_eq!(out.values::<i32>().unwrap(), vec![1, 1, 2, 2]);
}

#[test]
fn test_rolling_rejects_non_integer_window_column() {
    let ctx = private_context();
    let mr = ctx.memory_resource();
    let input = Column::from_slice(&[1i64, 2, 3], mr).unwrap();
    let window = Column::from_slice(&[1.0f64, 1.0, 1.0], mr).unwrap();
    let forward = Column::from_slice(&[0i32, 0, 0], mr).unwrap();
    let err = rolling_window(
        &input,
        &WindowBounds::variable(window, forward),
        1,
        RollingOp::Max,
        &ctx,
    )
    .unwrap_err();
    assert!(err.is_invalid_argument(), "{}", err);
}

#[test]
fn test_rolling_udf_through_kernel_cache() {
    let ctx = private_context();
    let linker = Arc::new(HostLinker::new());
    linker.register("span", |values: ValuesRef<'_>| match values {
        ValuesRef::Float64(v) => {
            let hi = v.iter().cloned().fold(f64::MIN, f64::max);
            let lo = v.iter().cloned().fold(f64::MAX, f64::min);
            Ok(Scalar::Float64(hi - lo))
        }
        other => Err(anyhow!("span: unsupported {}", other.data_type())),
    });
    let cache = KernelCache::new(linker);
    let udf = UdfAggregator::Cuda {
        source: "__device__ double span(const double* v, int n) { return 0; }".to_string(),
    };

    let input = Column::from_slice(&[3.0f64, 1.0, 4.0, 1.0, 5.0], ctx.memory_resource()).unwrap();
    let bounds = WindowBounds::fixed(3, 0);
    for _ in 0..2 {
        let out = rolling_window_udf(&input, &bounds, 3, &udf, &cache, &ctx)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(
            out.to_options::<f64>().unwrap(),
            vec![None, None, Some(3.0), Some(3.0), Some(4.0)]
        );
    }
    assert_eq!(cache.misses(), 1);
    assert_eq!(cache.hits(), 1);
}

#[test]
fn test_rolling_udf_unknown_symbol_fails_at_call_site() {
    let ctx = private_context();
    let cache = KernelCache::new(Arc::new(HostLinker::new()));
    let udf = UdfAggregator::Numba {
        ptx: ".visible .func missing(.param .b64 p)\n{\n ret;\n}".to_string(),
        output_type: DataType::Int64,
    };
    let input = Column::from_slice(&[1i64], ctx.memory_resource()).unwrap();
    let err = rolling_window_udf(&input, &WindowBounds::fixed(1, 0), 1, &udf, &cache, &ctx)
        .unwrap_err();
    assert!(matches!(err, KernelError::Execution(_)), "{:?}", err);
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

#[test]
fn test_concatenate_and_join() {
    let ctx = private_context();
    let a = strings(&[Some("a"), Some("b")]);
    let c = strings(&[Some("c"), None]);

    let out = concatenate(&[&a, &c], ":", None, &ctx).unwrap().wait().unwrap();
    assert_eq!(out.to_vec(), owned(&[Some("a:c"), None]));

    let out = concatenate(&[&a, &c], ":", Some("X"), &ctx).unwrap().wait().unwrap();
    assert_eq!(out.to_vec(), owned(&[Some("a:c"), Some("b:X")]));

    let input = strings(&[Some("aa"), None, Some(""), Some("zz")]);
    let joined = join_strings(&input, ":", Some("_"), &ctx).unwrap().wait().unwrap();
    assert_eq!(joined.to_vec(), owned(&[Some("aa:_::zz")]));
}

#[test]
fn test_gather_scatter_round_trip() {
    let ctx = private_context();
    let mr = ctx.memory_resource();
    let base = strings(&[Some("zero"), None, Some("two"), Some("three"), Some("")]);
    let idx = Column::from_slice(&[4i32, 0, 2], mr).unwrap();

    let picked = gather(&base, &idx, &ctx).unwrap().wait().unwrap();
    assert_eq!(picked.to_vec(), owned(&[Some(""), Some("zero"), Some("two")]));

    let restored = scatter(&base, &picked, &idx, &ctx).unwrap().wait().unwrap();
    assert_eq!(restored, base);
}

#[test]
fn test_sublist_then_sort() {
    let ctx = private_context();
    let base = strings(&[
        Some("pear"),
        Some("fig"),
        None,
        Some("kiwi"),
        Some("apple"),
        Some("date"),
    ]);
    let every_other = sublist(&base, 0, -1, 2, &ctx).unwrap().wait().unwrap();
    assert_eq!(every_other.to_vec(), owned(&[Some("pear"), None, Some("apple")]));

    let by_length = sort(&base, SortKey::Length, Order::Ascending, NullOrder::After, &ctx)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(
        by_length.to_vec(),
        owned(&[Some("fig"), Some("pear"), Some("kiwi"), Some("date"), Some("apple"), None])
    );

    let perm = sorted_order(&base, SortKey::Lexicographic, Order::Descending, NullOrder::Before, &ctx)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(perm.values::<i32>().unwrap(), vec![2, 0, 3, 1, 5, 4]);
}

#[test]
fn test_out_of_bounds_gather_is_reported_before_launch() {
    let ctx = private_context();
    let base = strings(&[Some("x")]);
    let idx = Column::from_slice(&[0i64, 7], ctx.memory_resource()).unwrap();
    let err = gather(&base, &idx, &ctx).unwrap_err();
    assert!(err.is_out_of_bounds());
}

// ---------------------------------------------------------------------------
// Execution model
// ---------------------------------------------------------------------------

#[test]
fn test_results_come_from_context_resource() {
    let mr: Arc<dyn MemoryResource> = Arc::new(HostMemoryResource::new());
    let ctx = private_context().with_memory_resource(Arc::clone(&mr));
    let input = Column::from_slice(&[1i64, 2, 3, 4], &default_resource()).unwrap();

    let out = rolling_window(&input, &WindowBounds::fixed(4, 0), 1, RollingOp::Sum, &ctx)
        .unwrap()
        .wait()
        .unwrap();
    assert!(mr.stats().bytes_in_use >= 4 * 8);
    drop(out);
    assert_eq!(mr.stats().bytes_in_use, 0);
}

#[test]
fn test_allocation_failure_surfaces_on_wait() {
    let mr: Arc<dyn MemoryResource> = Arc::new(HostMemoryResource::with_limit(8));
    let ctx = private_context().with_memory_resource(mr);
    let big = strings(&[Some("0123456789"), Some("abcdefghij")]);
    let err = join_strings(&big, "", None, &ctx).unwrap().wait().unwrap_err();
    assert!(matches!(err, KernelError::Allocation(_)), "{:?}", err);
}

#[test]
fn test_slab_pool_context() {
    let config = ExecConfig {
        pool: Some(PoolConfig {
            slab_sizes: vec![64, 4096],
            max_slabs_per_class: 4,
        }),
        ..ExecConfig::default()
    };
    let ctx = ExecContext::from_config(&config).unwrap();
    assert_eq!(ctx.memory_resource().name(), "slab");
    let input = strings(&[Some("b"), Some("a")]);
    let out = sort(&input, SortKey::Lexicographic, Order::Ascending, NullOrder::Before, &ctx)
        .unwrap()
        .wait()
        .unwrap();
    assert_eq!(out.to_vec(), owned(&[Some("a"), Some("b")]));
}

#[test]
fn test_sync_launches_complete_before_return() {
    let ctx = private_context().with_sync_launches(true);
    let input = strings(&[Some("x"), Some("y")]);
    let deferred = sublist(&input, 1, -1, 1, &ctx).unwrap();
    assert_eq!(ctx.queue().outstanding(), 0);
    assert_eq!(deferred.wait().unwrap().to_vec(), owned(&[Some("y")]));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wait_async_in_submission_order() {
    let ctx = private_context();
    let input = Column::from_slice(&[5i32, 6, 7], ctx.memory_resource()).unwrap();
    let first = rolling_window(&input, &WindowBounds::fixed(1, 0), 1, RollingOp::Max, &ctx).unwrap();
    let second = rolling_window(&input, &WindowBounds::fixed(3, 0), 1, RollingOp::Min, &ctx).unwrap();

    let second = second.wait_async().await.unwrap();
    let first = first.wait_async().await.unwrap();
    assert_eq!(first.values::<i32>().unwrap(), vec![5, 6, 7]);
    assert_eq!(second.values::<i32>().unwrap(), vec![5, 5, 5]);
    ctx.synchronize().unwrap();
}

// ---------------------------------------------------------------------------
// Arrow interop
// ---------------------------------------------------------------------------

#[test]
fn test_arrow_batch_through_kernels() {
    let ctx = private_context();
    let mr = ctx.memory_resource();
    let schema = Arc::new(arrow_schema_for_test());
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Float64Array::from(vec![1.0, 2.0, 3.0])),
            Arc::new(StringArray::from(vec![Some("c"), None, Some("a")])),
        ],
    )
    .unwrap();

    let cols = interop::record_batch_to_columns(&batch, mr).unwrap();
    let (DeviceArray::Fixed(price), DeviceArray::Strings(name)) = (&cols[0], &cols[1]) else {
        panic!("unexpected layouts {:?}", cols);
    };

    let running = rolling_window(price, &WindowBounds::fixed(3, 0), 1, RollingOp::Sum, &ctx)
        .unwrap()
        .wait()
        .unwrap();
    let labelled = concatenate(&[name], "", Some("?"), &ctx).unwrap().wait().unwrap();
    let count = rolling_window(price, &WindowBounds::fixed(2, 0), 0, RollingOp::Count, &ctx)
        .unwrap()
        .wait()
        .unwrap();

    let out = interop::columns_to_record_batch(&[
        ("running", DeviceArray::Fixed(running)),
        ("label", DeviceArray::Strings(labelled)),
        ("count", DeviceArray::Fixed(count)),
    ])
    .unwrap();

    let running = out.column(0).as_any().downcast_ref::<Float64Array>().unwrap();
    assert_eq!(running.values().to_vec(), vec![1.0, 3.0, 6.0]);
    let label = out.column(1).as_any().downcast_ref::<StringArray>().unwrap();
    assert_eq!(label.null_count(), 0);
    assert_eq!(label.value(1), "?");
    let count = out.column(2).as_any().downcast_ref::<Int32Array>().unwrap();
    assert_eq!(count.values().to_vec(), vec![1, 2, 2]);
}

fn arrow_schema_for_test() -> arrow_schema::Schema {
    use arrow_schema::{DataType as ArrowType, Field, Schema};
    Schema::new(vec![
        Field::new("price", ArrowType::Float64, false),
        Field::new("name", ArrowType::Utf8, true),
    ])
}
