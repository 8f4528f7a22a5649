//! Row selection and placement for strings columns.

use std::sync::Arc;

use gpu_memory_manager::MemoryResource;
use gpu_olap_core::{
    error::length_mismatch, Column, Deferred, ExecContext, KernelError, Result, StringColumn,
};
use tracing::debug;

/// Rows `start, start + step, ...` below `end`.
///
/// `end == -1` selects through the last row; an `end` past the last row is
/// clamped. `step` must be non-zero. A negative step or `end <= start`
/// yields an empty column.
pub fn sublist(
    strings: &StringColumn,
    start: i64,
    end: i64,
    step: i64,
    ctx: &ExecContext,
) -> Result<Deferred<StringColumn>> {
    let len = strings.size() as i64;
    if step == 0 {
        return Err(KernelError::InvalidArgument("sublist: step must not be 0".into()));
    }
    if start < 0 || start > len {
        return Err(KernelError::InvalidArgument(format!(
            "sublist: start {} outside [0, {}]",
            start, len
        )));
    }
    let end = match end {
        -1 => len,
        e if e < -1 => {
            return Err(KernelError::InvalidArgument(format!(
                "sublist: end {} is negative",
                e
            )))
        }
        e => e.min(len),
    };
    // A negative step selects nothing.
    let end = if step < 0 { start } else { end.max(start) };
    let (start, end, step) = (start as usize, end as usize, step.unsigned_abs() as usize);
    let rows = if end > start { (end - start - 1) / step + 1 } else { 0 };
    debug!("StringsKernel: sublist start={} step={} rows={}", start, step, rows);

    let strings = strings.clone();
    ctx.launch("strings::sublist", move |mr| {
        let map: Vec<usize> = (start..end).step_by(step).collect();
        gather_rows(&strings, &map, mr)
    })
}

/// Row `i` of the result is `strings[indices[i]]`, validity included.
///
/// Indices must be non-null integers in `[0, strings.size())`.
pub fn gather(
    strings: &StringColumn,
    indices: &Column,
    ctx: &ExecContext,
) -> Result<Deferred<StringColumn>> {
    let map = checked_indices("gather", indices, strings.size())?;
    debug!("StringsKernel: gather {} of {} rows", map.len(), strings.size());
    let strings = strings.clone();
    ctx.launch("strings::gather", move |mr| gather_rows(&strings, &map, mr))
}

/// Copy of `strings` with row `scatter_map[j]` replaced by `values[j]`.
///
/// When `scatter_map` names the same row more than once the highest `j`
/// wins.
pub fn scatter(
    strings: &StringColumn,
    values: &StringColumn,
    scatter_map: &Column,
    ctx: &ExecContext,
) -> Result<Deferred<StringColumn>> {
    if scatter_map.size() != values.size() {
        return Err(KernelError::InvalidArgument(length_mismatch(
            "scatter",
            scatter_map.size(),
            values.size(),
        )));
    }
    let map = checked_indices("scatter", scatter_map, strings.size())?;
    let source = last_writer(&map, strings.size());
    debug!("StringsKernel: scatter {} rows into {}", map.len(), strings.size());

    let target = strings.clone();
    let values = values.clone();
    ctx.launch("strings::scatter", move |mr| {
        let row = |i: usize| match source[i] {
            Some(j) => values.get(j),
            None => target.get(i),
        };
        let sizes: Vec<usize> = (0..target.size()).map(|i| row(i).map_or(0, <[u8]>::len)).collect();
        let valid: Vec<bool> = (0..target.size()).map(|i| row(i).is_some()).collect();
        StringColumn::build(&sizes, Some(valid.as_slice()), mr, |i, dst| {
            if let Some(bytes) = row(i) {
                dst.copy_from_slice(bytes);
            }
        })
    })
}

/// Copy of `strings` with every row named in `scatter_map` set to `value`.
pub fn scatter_scalar(
    strings: &StringColumn,
    value: &str,
    scatter_map: &Column,
    ctx: &ExecContext,
) -> Result<Deferred<StringColumn>> {
    let map = checked_indices("scatter", scatter_map, strings.size())?;
    let mut hit = vec![false; strings.size()];
    for &i in &map {
        hit[i] = true;
    }
    debug!("StringsKernel: scatter scalar into {} rows", map.len());

    let target = strings.clone();
    let value = value.to_string();
    ctx.launch("strings::scatter_scalar", move |mr| {
        let row = |i: usize| {
            if hit[i] {
                Some(value.as_bytes())
            } else {
                target.get(i)
            }
        };
        let sizes: Vec<usize> = (0..target.size()).map(|i| row(i).map_or(0, <[u8]>::len)).collect();
        let valid: Vec<bool> = (0..target.size()).map(|i| row(i).is_some()).collect();
        StringColumn::build(&sizes, Some(valid.as_slice()), mr, |i, dst| {
            if let Some(bytes) = row(i) {
                dst.copy_from_slice(bytes);
            }
        })
    })
}

/// Gather without bounds checks; `map` is already validated.
pub(crate) fn gather_rows(
    strings: &StringColumn,
    map: &[usize],
    mr: &Arc<dyn MemoryResource>,
) -> Result<StringColumn> {
    let sizes: Vec<usize> = map.iter().map(|&r| strings.row_bytes(r).len()).collect();
    let valid: Vec<bool> = map.iter().map(|&r| strings.is_valid(r)).collect();
    StringColumn::build(&sizes, Some(valid.as_slice()), mr, |i, dst| {
        dst.copy_from_slice(strings.row_bytes(map[i]))
    })
}

/// Decode an index column and check every entry against `bound`.
pub(crate) fn checked_indices(fname: &str, indices: &Column, bound: usize) -> Result<Vec<usize>> {
    indices
        .index_values(fname)?
        .into_iter()
        .enumerate()
        .map(|(pos, idx)| {
            usize::try_from(idx)
                .ok()
                .filter(|&i| i < bound)
                .ok_or_else(|| {
                    KernelError::OutOfBounds(format!(
                        "{}: index {} at position {} outside [0, {})",
                        fname, idx, pos, bound
                    ))
                })
        })
        .collect()
}

/// For each target row, the last map position that writes it.
fn last_writer(map: &[usize], n_rows: usize) -> Vec<Option<usize>> {
    let mut source = vec![None; n_rows];
    for (j, &target) in map.iter().enumerate() {
        source[target] = Some(j);
    }
    source
}
