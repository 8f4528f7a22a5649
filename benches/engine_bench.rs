//! Benchmarks for the rolling and strings kernels.
//!
//! Run with:  `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gpu_olap_engine::rolling::{rolling_window, RollingOp, WindowBounds};
use gpu_olap_engine::strings::{concatenate, sort, NullOrder, Order, SortKey};
use gpu_olap_engine::{default_resource, Column, ExecContext, StringColumn};

const N_ROWS: usize = 100_000;

fn make_strings(n: usize, salt: usize) -> StringColumn {
    let values: Vec<Option<String>> = (0..n)
        .map(|i| {
            let k = i.wrapping_mul(2_654_435_761).wrapping_add(salt) % 9973;
            (k % 17 != 0).then(|| format!("row{:x}", k))
        })
        .collect();
    StringColumn::from_options(&values, &default_resource()).unwrap()
}

fn bench_rolling_sum(c: &mut Criterion) {
    let ctx = ExecContext::try_default().unwrap();
    let values: Vec<Option<i64>> = (0..N_ROWS as i64)
        .map(|i| (i % 11 != 0).then_some(i))
        .collect();
    let input = Column::from_options(&values, ctx.memory_resource()).unwrap();
    let bounds = WindowBounds::fixed(64, 8);

    c.bench_function("rolling_sum_100k_w64", |b| {
        b.iter(|| {
            let out = rolling_window(black_box(&input), &bounds, 1, RollingOp::Sum, &ctx)
                .unwrap()
                .wait()
                .unwrap();
            black_box(out);
        })
    });
}

fn bench_string_sort(c: &mut Criterion) {
    let ctx = ExecContext::try_default().unwrap();
    let input = make_strings(N_ROWS, 0);

    c.bench_function("strings_sort_lexicographic_100k", |b| {
        b.iter(|| {
            let out = sort(
                black_box(&input),
                SortKey::Lexicographic,
                Order::Ascending,
                NullOrder::After,
                &ctx,
            )
            .unwrap()
            .wait()
            .unwrap();
            black_box(out);
        })
    });
}

fn bench_concatenate(c: &mut Criterion) {
    let ctx = ExecContext::try_default().unwrap();
    let lhs = make_strings(N_ROWS, 1);
    let rhs = make_strings(N_ROWS, 2);

    c.bench_function("strings_concatenate_100k", |b| {
        b.iter(|| {
            let out = concatenate(black_box(&[&lhs, &rhs]), "|", Some("-"), &ctx)
                .unwrap()
                .wait()
                .unwrap();
            black_box(out);
        })
    });
}

criterion_group!(benches, bench_rolling_sum, bench_string_sort, bench_concatenate);
criterion_main!(benches);
