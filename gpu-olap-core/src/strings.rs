//! Strings column: parent validity plus offsets and chars children.
//!
//! Row `i` occupies `chars[offsets[i]..offsets[i + 1]]`. Offsets are 32-bit,
//! start at zero and never decrease. Null rows are written zero-width; an
//! empty valid string is also zero-width but has its validity bit set.

use std::fmt;
use std::sync::Arc;

use gpu_memory_manager::{allocate, DeviceBuffer, MemoryResource};
use rayon::prelude::*;
use tracing::debug;

use crate::bitmask::Bitmask;
use crate::column::Column;
use crate::error::{length_mismatch, KernelError, Result};
use crate::types::{DataType, NativeType};

const OFFSET_WIDTH: usize = std::mem::size_of::<i32>();

/// Immutable column of UTF-8 strings.
#[derive(Clone)]
pub struct StringColumn {
    len: usize,
    offsets: Arc<DeviceBuffer>,
    chars: Arc<DeviceBuffer>,
    validity: Option<Bitmask>,
    null_count: usize,
}

impl StringColumn {
    /// Two-pass construction used by every string kernel.
    ///
    /// `sizes[i]` is the byte length of row `i` (forced to zero for null
    /// rows). Offsets come from an exclusive scan of the sizes, then
    /// `fill(i, dst)` writes row `i` into its own disjoint `dst` slice. Rows
    /// are filled in parallel.
    pub fn build<F>(
        sizes: &[usize],
        valid: Option<&[bool]>,
        mr: &Arc<dyn MemoryResource>,
        fill: F,
    ) -> Result<Self>
    where
        F: Fn(usize, &mut [u8]) + Sync,
    {
        let len = sizes.len();
        if let Some(valid) = valid {
            if valid.len() != len {
                return Err(KernelError::InvalidArgument(length_mismatch(
                    "StringColumn::build",
                    len,
                    valid.len(),
                )));
            }
        }
        let is_valid = |i: usize| valid.map_or(true, |v| v[i]);

        let mut offsets = Vec::with_capacity(len + 1);
        let mut total = 0usize;
        offsets.push(0i32);
        for (i, &size) in sizes.iter().enumerate() {
            if is_valid(i) {
                total += size;
            }
            let offset = i32::try_from(total).map_err(|_| {
                KernelError::InvalidArgument(format!(
                    "strings column of {} bytes exceeds 32-bit offsets",
                    total
                ))
            })?;
            offsets.push(offset);
        }

        let mut offsets_buf =
            allocate(mr, (len + 1) * OFFSET_WIDTH).map_err(KernelError::allocation)?;
        offsets_buf
            .as_mut_slice()
            .par_chunks_mut(OFFSET_WIDTH)
            .zip(offsets.par_iter())
            .for_each(|(slot, off)| off.write_le(slot));

        let mut chars_buf = allocate(mr, total).map_err(KernelError::allocation)?;
        let mut rows: Vec<&mut [u8]> = Vec::with_capacity(len);
        let mut rest = chars_buf.as_mut_slice();
        for i in 0..len {
            let width = (offsets[i + 1] - offsets[i]) as usize;
            let (row, tail) = std::mem::take(&mut rest).split_at_mut(width);
            rows.push(row);
            rest = tail;
        }
        rows.into_par_iter().enumerate().for_each(|(i, dst)| {
            if is_valid(i) {
                fill(i, dst);
            }
        });

        let validity = match valid {
            Some(valid) if valid.iter().any(|v| !v) => Some(Bitmask::from_bools(valid, mr)?),
            _ => None,
        };
        let null_count = validity.as_ref().map_or(0, Bitmask::null_count);
        debug!("StringColumn: built {} rows, {} chars, {} nulls", len, total, null_count);

        Ok(Self {
            len,
            offsets: Arc::new(offsets_buf),
            chars: Arc::new(chars_buf),
            validity,
            null_count,
        })
    }

    /// Column from optional strings.
    pub fn from_options<S: AsRef<str> + Sync>(
        values: &[Option<S>],
        mr: &Arc<dyn MemoryResource>,
    ) -> Result<Self> {
        let sizes: Vec<usize> = values
            .iter()
            .map(|v| v.as_ref().map_or(0, |s| s.as_ref().len()))
            .collect();
        let valid: Vec<bool> = values.iter().map(Option::is_some).collect();
        Self::build(&sizes, Some(valid.as_slice()), mr, |i, dst| {
            if let Some(s) = &values[i] {
                dst.copy_from_slice(s.as_ref().as_bytes());
            }
        })
    }

    /// All-valid column.
    pub fn from_strs<S: AsRef<str> + Sync>(
        values: &[S],
        mr: &Arc<dyn MemoryResource>,
    ) -> Result<Self> {
        let sizes: Vec<usize> = values.iter().map(|s| s.as_ref().len()).collect();
        Self::build(&sizes, None, mr, |i, dst| {
            dst.copy_from_slice(values[i].as_ref().as_bytes())
        })
    }

    /// Adopt an existing offsets/chars pair after checking its invariants.
    pub fn from_parts(
        offsets: &[i32],
        chars: &[u8],
        valid: Option<&[bool]>,
        mr: &Arc<dyn MemoryResource>,
    ) -> Result<Self> {
        let Some((&first, _)) = offsets.split_first() else {
            return Err(KernelError::InvalidArgument(
                "offsets must hold at least one entry".to_string(),
            ));
        };
        let len = offsets.len() - 1;
        if first != 0 {
            return Err(KernelError::InvalidArgument(format!(
                "offsets must start at 0, found {}",
                first
            )));
        }
        if let Some(pos) = offsets.windows(2).position(|w| w[1] < w[0]) {
            return Err(KernelError::InvalidArgument(format!(
                "offsets decrease at row {}",
                pos
            )));
        }
        let last = offsets[len] as usize;
        if last != chars.len() {
            return Err(KernelError::InvalidArgument(length_mismatch(
                "StringColumn::from_parts chars",
                last,
                chars.len(),
            )));
        }
        let is_valid = |i: usize| valid.map_or(true, |v| v.get(i).copied().unwrap_or(false));
        let bad_row = (0..len).into_par_iter().find_first(|&i| {
            is_valid(i)
                && std::str::from_utf8(&chars[offsets[i] as usize..offsets[i + 1] as usize])
                    .is_err()
        });
        if let Some(row) = bad_row {
            return Err(KernelError::InvalidArgument(format!(
                "row {} is not valid UTF-8",
                row
            )));
        }

        let sizes: Vec<usize> = offsets.windows(2).map(|w| (w[1] - w[0]) as usize).collect();
        Self::build(&sizes, valid, mr, |i, dst| {
            let start = offsets[i] as usize;
            dst.copy_from_slice(&chars[start..start + dst.len()]);
        })
    }

    /// Number of rows.
    pub fn size(&self) -> usize {
        self.len
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn null_mask(&self) -> Option<&Bitmask> {
        self.validity.as_ref()
    }

    pub fn null_count(&self) -> usize {
        self.null_count
    }

    pub fn has_nulls(&self) -> bool {
        self.null_count > 0
    }

    #[inline]
    pub fn is_valid(&self, i: usize) -> bool {
        self.validity.as_ref().map_or(true, |mask| mask.get(i))
    }

    /// Byte offset where row `i` starts; `offset(len)` is the chars size.
    #[inline]
    pub fn offset(&self, i: usize) -> usize {
        i32::read_le(&self.offsets.as_slice()[i * OFFSET_WIDTH..]) as usize
    }

    pub fn chars_size(&self) -> usize {
        self.offset(self.len)
    }

    /// Offsets child as an `Int32` column of `len + 1` rows.
    pub fn offsets(&self) -> Result<Column> {
        Column::from_shared(DataType::Int32, self.len + 1, Arc::clone(&self.offsets), None)
    }

    /// Chars child as a `UInt8` column.
    pub fn chars(&self) -> Result<Column> {
        Column::from_shared(DataType::UInt8, self.chars_size(), Arc::clone(&self.chars), None)
    }

    pub fn chars_bytes(&self) -> &[u8] {
        self.chars.as_slice()
    }

    /// Raw byte range of row `i`, ignoring validity.
    #[inline]
    pub fn row_bytes(&self, i: usize) -> &[u8] {
        &self.chars.as_slice()[self.offset(i)..self.offset(i + 1)]
    }

    /// Bytes of row `i`, or `None` when it is null or out of range.
    pub fn get(&self, i: usize) -> Option<&[u8]> {
        if i >= self.len || !self.is_valid(i) {
            return None;
        }
        Some(self.row_bytes(i))
    }

    pub fn get_str(&self, i: usize) -> Option<&str> {
        self.get(i).and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&str>> + '_ {
        (0..self.len).map(move |i| self.get_str(i))
    }

    pub fn to_vec(&self) -> Vec<Option<String>> {
        self.iter().map(|s| s.map(str::to_owned)).collect()
    }
}

impl PartialEq for StringColumn {
    /// Same rows with the same validity; buffer identity is irrelevant.
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && (0..self.len).all(|i| self.get(i) == other.get(i))
    }
}

impl fmt::Debug for StringColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StringColumn")
            .field("null_count", &self.null_count)
            .field("rows", &self.to_vec())
            .finish()
    }
}
