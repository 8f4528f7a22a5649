//! Packed validity bitmaps.
//!
//! Bit `i` lives in byte `i / 8` at position `i % 8` (least significant bit
//! first). A set bit marks a valid row, a cleared bit a null row.

use std::fmt;
use std::sync::Arc;

use gpu_memory_manager::{allocate, DeviceBuffer, MemoryResource};
use rayon::prelude::*;

use crate::error::{KernelError, Result};

/// Bytes needed to hold `len` bits.
pub fn bitmask_bytes(len: usize) -> usize {
    (len + 7) / 8
}

#[inline]
pub fn get_bit(bits: &[u8], i: usize) -> bool {
    bits[i / 8] & (1 << (i % 8)) != 0
}

#[inline]
pub fn set_bit(bits: &mut [u8], i: usize, valid: bool) {
    if valid {
        bits[i / 8] |= 1 << (i % 8);
    } else {
        bits[i / 8] &= !(1 << (i % 8));
    }
}

/// Population count over the bit range `[start, end)`.
pub fn count_set_bits(bits: &[u8], start: usize, end: usize) -> usize {
    if start >= end {
        return 0;
    }
    let first_full = (start + 7) / 8;
    let last_full = end / 8;

    if first_full >= last_full {
        return (start..end).filter(|&i| get_bit(bits, i)).count();
    }

    let head = (start..first_full * 8).filter(|&i| get_bit(bits, i)).count();
    let body: usize = bits[first_full..last_full]
        .iter()
        .map(|b| b.count_ones() as usize)
        .sum();
    let tail = (last_full * 8..end).filter(|&i| get_bit(bits, i)).count();
    head + body + tail
}

/// Immutable validity bitmap of `len` bits held in device memory.
#[derive(Clone)]
pub struct Bitmask {
    buffer: Arc<DeviceBuffer>,
    len: usize,
}

impl Bitmask {
    /// Build a bitmap whose bit `i` is `valid(i)`.
    pub fn from_fn<F>(len: usize, mr: &Arc<dyn MemoryResource>, valid: F) -> Result<Self>
    where
        F: Fn(usize) -> bool + Sync,
    {
        let mut buffer = allocate(mr, bitmask_bytes(len)).map_err(KernelError::allocation)?;
        buffer
            .as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(byte_idx, byte)| {
                let base = byte_idx * 8;
                let mut packed = 0u8;
                for bit in 0..8 {
                    let row = base + bit;
                    if row < len && valid(row) {
                        packed |= 1 << bit;
                    }
                }
                *byte = packed;
            });
        Ok(Self {
            buffer: Arc::new(buffer),
            len,
        })
    }

    pub fn from_bools(valid: &[bool], mr: &Arc<dyn MemoryResource>) -> Result<Self> {
        Self::from_fn(valid.len(), mr, |i| valid[i])
    }

    /// Copy an already packed bitmap. `bits` must hold at least `len` bits.
    pub fn from_bytes(bits: &[u8], len: usize, mr: &Arc<dyn MemoryResource>) -> Result<Self> {
        if bits.len() < bitmask_bytes(len) {
            return Err(KernelError::InvalidArgument(format!(
                "bitmap of {} bytes cannot hold {} rows",
                bits.len(),
                len
            )));
        }
        Self::from_fn(len, mr, |i| get_bit(bits, i))
    }

    pub fn all_valid(len: usize, mr: &Arc<dyn MemoryResource>) -> Result<Self> {
        Self::from_fn(len, mr, |_| true)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, i: usize) -> bool {
        get_bit(self.buffer.as_slice(), i)
    }

    pub fn count_valid(&self) -> usize {
        count_set_bits(self.buffer.as_slice(), 0, self.len)
    }

    pub fn null_count(&self) -> usize {
        self.len - self.count_valid()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn to_bools(&self) -> Vec<bool> {
        (0..self.len).map(|i| self.get(i)).collect()
    }
}

impl fmt::Debug for Bitmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits: String = (0..self.len)
            .map(|i| if self.get(i) { '1' } else { '0' })
            .collect();
        f.debug_struct("Bitmask").field("bits", &bits).finish()
    }
}
