//! Strings column kernels.
//!
//! Every kernel checks its arguments on the calling thread, then queues the
//! work on the context's execution queue. Output rows are sized in a first
//! pass and written in parallel in a second.

pub mod combine;
pub mod copying;
pub mod print;
pub mod sorting;

pub use combine::{concatenate, join_strings};
pub use copying::{gather, scatter, scatter_scalar, sublist};
pub use print::{format_rows, print};
pub use sorting::{sort, sorted_order, NullOrder, Order, SortKey};
