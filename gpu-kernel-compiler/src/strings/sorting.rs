//! Stable ordering of strings columns.
//!
//! Keys are byte length or raw bytes compared as unsigned values (no locale).
//! Nulls form one block placed before or after every non-null row whatever
//! the sort direction. Ties, and nulls among themselves, keep input order.

use std::cmp::Ordering;

use gpu_olap_core::{Column, Deferred, ExecContext, Result, StringColumn};
use rayon::prelude::*;
use tracing::debug;

use super::copying::gather_rows;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// Keep input order.
    None,
    Length,
    Lexicographic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NullOrder {
    #[default]
    Before,
    After,
}

/// Permutation that sorts `strings`, as an `Int32` column.
pub fn sorted_order(
    strings: &StringColumn,
    key: SortKey,
    order: Order,
    null_order: NullOrder,
    ctx: &ExecContext,
) -> Result<Deferred<Column>> {
    debug!(
        "SortKernel: rows={} key={:?} order={:?} nulls={:?}",
        strings.size(),
        key,
        order,
        null_order
    );
    let strings = strings.clone();
    ctx.launch("strings::sorted_order", move |mr| {
        let permutation: Vec<i32> = permutation(&strings, key, order, null_order)
            .into_iter()
            .map(|i| i as i32)
            .collect();
        Column::from_slice(&permutation, mr)
    })
}

/// Stable sort of `strings`.
pub fn sort(
    strings: &StringColumn,
    key: SortKey,
    order: Order,
    null_order: NullOrder,
    ctx: &ExecContext,
) -> Result<Deferred<StringColumn>> {
    debug!(
        "SortKernel: sort rows={} key={:?} order={:?} nulls={:?}",
        strings.size(),
        key,
        order,
        null_order
    );
    let strings = strings.clone();
    ctx.launch("strings::sort", move |mr| {
        let map = permutation(&strings, key, order, null_order);
        gather_rows(&strings, &map, mr)
    })
}

fn permutation(
    strings: &StringColumn,
    key: SortKey,
    order: Order,
    null_order: NullOrder,
) -> Vec<usize> {
    let mut map: Vec<usize> = (0..strings.size()).collect();
    if key == SortKey::None {
        return map;
    }
    // par_sort_by is stable
    map.par_sort_by(|&a, &b| compare_rows(strings, a, b, key, order, null_order));
    map
}

fn compare_rows(
    strings: &StringColumn,
    a: usize,
    b: usize,
    key: SortKey,
    order: Order,
    null_order: NullOrder,
) -> Ordering {
    let (lhs, rhs) = match (strings.get(a), strings.get(b)) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => {
            return match null_order {
                NullOrder::Before => Ordering::Less,
                NullOrder::After => Ordering::Greater,
            }
        }
        (Some(_), None) => {
            return match null_order {
                NullOrder::Before => Ordering::Greater,
                NullOrder::After => Ordering::Less,
            }
        }
        (Some(lhs), Some(rhs)) => (lhs, rhs),
    };
    let ord = match key {
        SortKey::None => Ordering::Equal,
        SortKey::Length => lhs.len().cmp(&rhs.len()),
        SortKey::Lexicographic => lhs.cmp(rhs),
    };
    match order {
        Order::Ascending => ord,
        Order::Descending => ord.reverse(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_memory_manager::default_resource;

    fn ctx() -> ExecContext {
        ExecContext::try_default().unwrap()
    }

    fn col(values: &[Option<&str>]) -> StringColumn {
        StringColumn::from_options(values, &default_resource()).unwrap()
    }

    fn strs(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_owned)).collect()
    }

    #[test]
    fn length_sort_is_stable() {
        let input = col(&[Some("ccc"), Some("a"), Some("bb"), Some("b"), Some("aa")]);
        let out = sort(&input, SortKey::Length, Order::Ascending, NullOrder::Before, &ctx())
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(
            out.to_vec(),
            strs(&[Some("a"), Some("b"), Some("bb"), Some("aa"), Some("ccc")])
        );

        let out = sort(&input, SortKey::Length, Order::Descending, NullOrder::Before, &ctx())
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(
            out.to_vec(),
            strs(&[Some("ccc"), Some("bb"), Some("aa"), Some("a"), Some("b")])
        );
    }

    #[test]
    fn lexicographic_uses_unsigned_bytes() {
        let input = col(&[Some("é"), Some("b"), Some("B"), Some(""), Some("ab")]);
        let out = sort(&input, SortKey::Lexicographic, Order::Ascending, NullOrder::After, &ctx())
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(
            out.to_vec(),
            strs(&[Some(""), Some("B"), Some("ab"), Some("b"), Some("é")])
        );
    }

    #[test]
    fn nulls_ignore_direction() {
        let input = col(&[None, Some("b"), None, Some("a")]);
        for order in [Order::Ascending, Order::Descending] {
            let order_col = sorted_order(&input, SortKey::Lexicographic, order, NullOrder::After, &ctx())
                .unwrap()
                .wait()
                .unwrap();
            let perm = order_col.values::<i32>().unwrap();
            assert_eq!(&perm[2..], &[0, 2]);
        }
        let before = sorted_order(&input, SortKey::Length, Order::Descending, NullOrder::Before, &ctx())
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(before.values::<i32>().unwrap(), vec![0, 2, 1, 3]);
    }

    #[test]
    fn none_key_is_identity() {
        let input = col(&[Some("z"), None, Some("a")]);
        let out = sort(&input, SortKey::None, Order::Descending, NullOrder::After, &ctx())
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(out, input);
    }
}
