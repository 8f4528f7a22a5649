//! Row-wise and column-wise concatenation.

use gpu_olap_core::{
    error::length_mismatch, Deferred, ExecContext, KernelError, Result, StringColumn,
};
use tracing::debug;

/// Row-wise concatenation of `columns`, `separator` between each pair.
///
/// Without `narep` a row is null when any input row is null. With `narep`
/// null inputs are replaced by it and every output row is valid.
pub fn concatenate(
    columns: &[&StringColumn],
    separator: &str,
    narep: Option<&str>,
    ctx: &ExecContext,
) -> Result<Deferred<StringColumn>> {
    let Some(first) = columns.first() else {
        return Err(KernelError::InvalidArgument(
            "concatenate: at least one column is required".into(),
        ));
    };
    let n_rows = first.size();
    if let Some(bad) = columns.iter().find(|c| c.size() != n_rows) {
        return Err(KernelError::InvalidArgument(length_mismatch(
            "concatenate",
            n_rows,
            bad.size(),
        )));
    }
    debug!(
        "StringsKernel: concatenate {} columns x {} rows (narep={})",
        columns.len(),
        n_rows,
        narep.is_some()
    );

    let columns: Vec<StringColumn> = columns.iter().map(|c| (*c).clone()).collect();
    let separator = separator.as_bytes().to_vec();
    let narep = narep.map(|s| s.as_bytes().to_vec());

    ctx.launch("strings::concatenate", move |mr| {
        let narep = narep.as_deref();
        let part = |c: &StringColumn, row: usize| contribution(c, row, narep).map(<[u8]>::len);
        let valid: Vec<bool> = (0..n_rows)
            .map(|row| columns.iter().all(|c| part(c, row).is_some()))
            .collect();
        let sizes: Vec<usize> = (0..n_rows)
            .map(|row| {
                let body: usize = columns.iter().map(|c| part(c, row).unwrap_or(0)).sum();
                body + separator.len() * (columns.len() - 1)
            })
            .collect();
        StringColumn::build(&sizes, Some(valid.as_slice()), mr, |row, dst| {
            let mut pos = 0;
            for (k, c) in columns.iter().enumerate() {
                if k > 0 {
                    dst[pos..pos + separator.len()].copy_from_slice(&separator);
                    pos += separator.len();
                }
                let bytes = contribution(c, row, narep).unwrap_or_default();
                dst[pos..pos + bytes.len()].copy_from_slice(bytes);
                pos += bytes.len();
            }
        })
    })
}

/// Bytes row `row` of `c` contributes, or `None` when it nulls the output.
fn contribution<'a>(c: &'a StringColumn, row: usize, narep: Option<&'a [u8]>) -> Option<&'a [u8]> {
    c.get(row).or(narep)
}

/// Join every row of `strings` into a single-row column.
///
/// Null rows are skipped unless `narep` is given, in which case it takes
/// their place. The result is always one valid row; an input with no
/// contributing rows produces the empty string.
pub fn join_strings(
    strings: &StringColumn,
    separator: &str,
    narep: Option<&str>,
    ctx: &ExecContext,
) -> Result<Deferred<StringColumn>> {
    debug!(
        "StringsKernel: join_strings rows={} nulls={} narep={}",
        strings.size(),
        strings.null_count(),
        narep.is_some()
    );
    let strings = strings.clone();
    let separator = separator.to_string();
    let narep = narep.map(str::to_string);

    ctx.launch("strings::join_strings", move |mr| {
        let parts: Vec<&[u8]> = (0..strings.size())
            .filter_map(|row| strings.get(row).or(narep.as_deref().map(str::as_bytes)))
            .collect();
        let joined = parts.join(separator.as_bytes());
        StringColumn::build(&[joined.len()], None, mr, |_, dst| dst.copy_from_slice(&joined))
    })
}
