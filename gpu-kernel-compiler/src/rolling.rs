//! Rolling window aggregation kernels.
//!
//! Row `i` reduces the valid values in `[i - window + 1, i + forward_window]`,
//! clipped to the column. A row with fewer than `min_periods` observations is
//! null. Rows are evaluated independently in parallel; each one reads the
//! input and writes only its own output slot.

use std::sync::Arc;

use gpu_memory_manager::{allocate, MemoryResource};
use gpu_olap_core::{
    dispatch_native, Bitmask, Column, DataType, Deferred, ExecContext, KernelError, NativeType,
    Result, Scalar,
};
use num_traits::NumCast;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::codegen::KernelCodegen;
use crate::jit::{KernelCache, WindowFunction};

/// Rows handled per parallel work item.
pub const ROWS_PER_BLOCK: usize = 256;

/// Reduction applied to each neighborhood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollingOp {
    Sum,
    Min,
    Max,
    Mean,
    /// Number of valid observations, always `Int32`.
    Count,
    /// Precompiled PTX with a declared output type.
    NumbaUdf,
    /// CUDA source compiled at call time; output type is the input type.
    CudaUdf,
}

impl RollingOp {
    pub fn is_udf(self) -> bool {
        matches!(self, RollingOp::NumbaUdf | RollingOp::CudaUdf)
    }

    /// Element type produced for an input of type `input`.
    pub fn output_type(self, input: DataType) -> DataType {
        match self {
            RollingOp::Count => DataType::Int32,
            _ => input,
        }
    }

    /// Observations needed before a row can be valid.
    fn effective_min_periods(self, min_periods: usize) -> usize {
        match self {
            RollingOp::Min | RollingOp::Max | RollingOp::Mean => min_periods.max(1),
            _ => min_periods,
        }
    }
}

/// User-defined aggregator payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdfAggregator {
    /// PTX emitted ahead of time. It carries no type metadata, so the output
    /// type is declared by the caller.
    Numba { ptx: String, output_type: DataType },
    /// CUDA `__device__` function source.
    Cuda { source: String },
}

impl UdfAggregator {
    pub fn kind(&self) -> RollingOp {
        match self {
            UdfAggregator::Numba { .. } => RollingOp::NumbaUdf,
            UdfAggregator::Cuda { .. } => RollingOp::CudaUdf,
        }
    }

    pub fn output_type(&self, input: DataType) -> DataType {
        match self {
            UdfAggregator::Numba { output_type, .. } => *output_type,
            UdfAggregator::Cuda { .. } => input,
        }
    }
}

/// Window extents, uniform or per row.
#[derive(Debug, Clone)]
pub enum WindowBounds {
    Fixed { window: usize, forward_window: usize },
    /// Non-nullable, non-negative `Int32` columns as long as the input.
    Variable { window: Column, forward_window: Column },
}

impl WindowBounds {
    pub fn fixed(window: usize, forward_window: usize) -> Self {
        WindowBounds::Fixed {
            window,
            forward_window,
        }
    }

    pub fn variable(window: Column, forward_window: Column) -> Self {
        WindowBounds::Variable {
            window,
            forward_window,
        }
    }

    /// Check the bounds against an input of `n_rows` rows and decode them.
    fn resolve(&self, n_rows: usize) -> Result<Extents> {
        match self {
            WindowBounds::Fixed {
                window,
                forward_window,
            } => Ok(Extents::Fixed {
                window: *window,
                forward_window: *forward_window,
            }),
            WindowBounds::Variable {
                window,
                forward_window,
            } => Ok(Extents::Variable {
                window: decode_extent("window", window, n_rows)?,
                forward_window: decode_extent("forward_window", forward_window, n_rows)?,
            }),
        }
    }
}

fn decode_extent(name: &str, col: &Column, n_rows: usize) -> Result<Vec<usize>> {
    if col.data_type() != DataType::Int32 {
        return Err(KernelError::InvalidArgument(format!(
            "{} column must be INT32, got {}",
            name,
            col.data_type()
        )));
    }
    if col.size() != n_rows {
        return Err(KernelError::InvalidArgument(format!(
            "{} column has {} rows, input has {}",
            name,
            col.size(),
            n_rows
        )));
    }
    if col.has_nulls() {
        return Err(KernelError::InvalidArgument(format!(
            "{} column contains {} nulls",
            name,
            col.null_count()
        )));
    }
    col.values::<i32>()?
        .into_iter()
        .enumerate()
        .map(|(row, v)| {
            usize::try_from(v).map_err(|_| {
                KernelError::InvalidArgument(format!("{} is negative ({}) at row {}", name, v, row))
            })
        })
        .collect()
}

/// Decoded window extents.
#[derive(Debug, Clone)]
enum Extents {
    Fixed {
        window: usize,
        forward_window: usize,
    },
    Variable {
        window: Vec<usize>,
        forward_window: Vec<usize>,
    },
}

impl Extents {
    /// Clipped half-open neighborhood `[start, end)` of row `i`.
    #[inline]
    fn neighborhood(&self, i: usize, n_rows: usize) -> (usize, usize) {
        let (window, forward) = match self {
            Extents::Fixed {
                window,
                forward_window,
            } => (*window, *forward_window),
            Extents::Variable {
                window,
                forward_window,
            } => (window[i], forward_window[i]),
        };
        let start = (i + 1).saturating_sub(window);
        let end = i.saturating_add(forward).saturating_add(1).min(n_rows);
        (start.min(end), end)
    }
}

/// Arithmetic needed by the builtin reducers.
pub trait RollingValue: NativeType {
    /// Addition that wraps for integers.
    fn accumulate(self, rhs: Self) -> Self;
}

macro_rules! impl_rolling_int {
    ($($t:ty),*) => {$(
        impl RollingValue for $t {
            #[inline]
            fn accumulate(self, rhs: Self) -> Self {
                self.wrapping_add(rhs)
            }
        }
    )*};
}

macro_rules! impl_rolling_float {
    ($($t:ty),*) => {$(
        impl RollingValue for $t {
            #[inline]
            fn accumulate(self, rhs: Self) -> Self {
                self + rhs
            }
        }
    )*};
}

impl_rolling_int!(i8, i16, i32, i64, u8);
impl_rolling_float!(f32, f64);

/// Launch a builtin rolling aggregation.
///
/// Argument checks happen before anything is queued. The returned handle
/// resolves once the kernel has run on `ctx`'s queue.
pub fn rolling_window(
    input: &Column,
    bounds: &WindowBounds,
    min_periods: usize,
    op: RollingOp,
    ctx: &ExecContext,
) -> Result<Deferred<Column>> {
    if op.is_udf() {
        return Err(KernelError::InvalidArgument(format!(
            "{:?} needs a UDF payload, use rolling_window_udf",
            op
        )));
    }
    let extents = bounds.resolve(input.size())?;
    let input = input.clone();
    let (grid, block) = compute_launch_params(input.size());

    info!(
        "RollingKernel: rows={} op={:?} min_periods={} grid={} block={}",
        input.size(),
        op,
        min_periods,
        grid,
        block
    );

    ctx.launch("rolling_window", move |mr| {
        dispatch_native!(input.data_type(), T => {
            rolling_builtin::<T>(&input, &extents, min_periods, op, mr)
        })
    })
}

fn rolling_builtin<T: RollingValue>(
    input: &Column,
    extents: &Extents,
    min_periods: usize,
    op: RollingOp,
    mr: &Arc<dyn MemoryResource>,
) -> Result<Column> {
    let n_rows = input.size();
    let values = input.values::<T>()?;
    let valid: Vec<bool> = (0..n_rows).map(|i| input.is_valid(i)).collect();
    let threshold = op.effective_min_periods(min_periods);

    if op == RollingOp::Count {
        let (counts, out_valid): (Vec<i32>, Vec<bool>) = (0..n_rows)
            .into_par_iter()
            .with_min_len(ROWS_PER_BLOCK)
            .map(|i| {
                let (start, end) = extents.neighborhood(i, n_rows);
                let n = valid[start..end].iter().filter(|v| **v).count();
                (n as i32, n >= threshold)
            })
            .unzip();
        return finish(&counts, out_valid, mr);
    }

    let (out, out_valid): (Vec<T>, Vec<bool>) = (0..n_rows)
        .into_par_iter()
        .with_min_len(ROWS_PER_BLOCK)
        .map(|i| {
            let (start, end) = extents.neighborhood(i, n_rows);
            let observed = (start..end).filter(|&j| valid[j]).map(|j| values[j]);
            match reduce(op, observed) {
                Some((value, n)) if n >= threshold => (value, true),
                _ => (T::default(), false),
            }
        })
        .unzip();
    finish(&out, out_valid, mr)
}

/// Fold `observed` with `op`. Returns the result and the number of
/// observations, or `None` when the result is not representable.
fn reduce<T: RollingValue>(op: RollingOp, observed: impl Iterator<Item = T>) -> Option<(T, usize)> {
    let mut n = 0usize;
    let mut acc: Option<T> = None;
    let mut total = 0f64;

    for v in observed {
        n += 1;
        acc = Some(match (op, acc) {
            (_, None) => v,
            (RollingOp::Sum, Some(a)) => a.accumulate(v),
            (RollingOp::Min, Some(a)) => {
                if v < a {
                    v
                } else {
                    a
                }
            }
            (RollingOp::Max, Some(a)) => {
                if v > a {
                    v
                } else {
                    a
                }
            }
            (_, Some(a)) => a,
        });
        if op == RollingOp::Mean {
            total += v.to_f64().unwrap_or(f64::NAN);
        }
    }

    match op {
        RollingOp::Mean if n == 0 => None,
        RollingOp::Mean => <T as NumCast>::from(total / n as f64).map(|mean| (mean, n)),
        _ => Some((acc.unwrap_or_default(), n)),
    }
}

fn finish<T: NativeType>(
    values: &[T],
    valid: Vec<bool>,
    mr: &Arc<dyn MemoryResource>,
) -> Result<Column> {
    let column = if valid.iter().all(|v| *v) {
        Column::from_slice(values, mr)?
    } else {
        Column::build(values, Some(valid.as_slice()), mr)?
    };
    debug!(
        "RollingKernel: produced {} rows ({} null)",
        column.size(),
        column.null_count()
    );
    Ok(column)
}

/// Launch a rolling aggregation backed by a user-defined function.
///
/// The UDF is code-generated and compiled (or fetched from `kernels`) at
/// call time, then invoked once per row with the raw neighborhood values.
/// Element validity is ignored: `min_periods` is compared against the
/// clipped neighborhood width.
pub fn rolling_window_udf(
    input: &Column,
    bounds: &WindowBounds,
    min_periods: usize,
    udf: &UdfAggregator,
    kernels: &KernelCache,
    ctx: &ExecContext,
) -> Result<Deferred<Column>> {
    let extents = bounds.resolve(input.size())?;
    let input_type = input.data_type();
    let output_type = udf.output_type(input_type);

    let generated = KernelCodegen::new()
        .emit_rolling_udf(udf, input_type)
        .map_err(|e| KernelError::InvalidArgument(format!("{:#}", e)))?;
    let function = kernels
        .get_or_compile(&generated)
        .map_err(|e| KernelError::Execution(format!("{:#}", e)))?;

    info!(
        "RollingKernel: rows={} udf={} kind={:?} {} -> {}",
        input.size(),
        generated.udf_symbol,
        udf.kind(),
        input_type,
        output_type
    );

    let input = input.clone();
    ctx.launch("rolling_window_udf", move |mr| {
        dispatch_native!(input_type, T => {
            rolling_udf::<T>(&input, &extents, min_periods, function.as_ref(), output_type, mr)
        })
    })
}

fn rolling_udf<T: NativeType>(
    input: &Column,
    extents: &Extents,
    min_periods: usize,
    function: &dyn WindowFunction,
    output_type: DataType,
    mr: &Arc<dyn MemoryResource>,
) -> Result<Column> {
    let n_rows = input.size();
    let values = input.values::<T>()?;

    let rows: Vec<Option<Scalar>> = (0..n_rows)
        .into_par_iter()
        .with_min_len(ROWS_PER_BLOCK)
        .map(|i| {
            let (start, end) = extents.neighborhood(i, n_rows);
            if end - start < min_periods {
                return Ok(None);
            }
            let result = function
                .call(T::values_ref(&values[start..end]))
                .map_err(|e| KernelError::Execution(format!("UDF failed at row {}: {:#}", i, e)))?;
            if result.data_type() != output_type {
                return Err(KernelError::Execution(format!(
                    "UDF returned {} at row {}, expected {}",
                    result.data_type(),
                    i,
                    output_type
                )));
            }
            Ok(Some(result))
        })
        .collect::<Result<_>>()?;

    let width = output_type.byte_width();
    let mut data = allocate(mr, n_rows * width)
        .map_err(|e| KernelError::Allocation(format!("{:#}", e)))?;
    data.as_mut_slice()
        .par_chunks_mut(width)
        .zip(rows.par_iter())
        .for_each(|(slot, row)| {
            if let Some(scalar) = row {
                scalar.write_le(slot);
            }
        });

    let validity = if rows.iter().all(Option::is_some) {
        None
    } else {
        Some(Bitmask::from_fn(n_rows, mr, |i| rows[i].is_some())?)
    };
    Column::new(output_type, n_rows, data, validity)
}

/// Grid and block sizes for `n_rows` rows.
pub fn compute_launch_params(n_rows: usize) -> (usize, usize) {
    let grid = (n_rows + ROWS_PER_BLOCK - 1) / ROWS_PER_BLOCK;
    (grid.max(1), ROWS_PER_BLOCK)
}
