//! Device memory resources.
//!
//! Every kernel allocates its result buffers through a caller-supplied
//! [`MemoryResource`]. A resource hands out zero-filled blocks and takes
//! them back when the owning [`DeviceBuffer`] is dropped.

use anyhow::{bail, Result};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::device_buffer::DeviceBuffer;

/// Allocation counters reported by a resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes currently handed out and not yet returned.
    pub bytes_in_use: usize,
    /// High-water mark of `bytes_in_use`.
    pub peak_bytes: usize,
    /// Total number of successful allocations.
    pub allocations: usize,
}

/// Allocate/free capability consumed by every producing operation.
pub trait MemoryResource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Hand out a zero-filled block holding at least `bytes` bytes.
    fn allocate_block(&self, bytes: usize) -> Result<Vec<u8>>;

    /// Take back a block previously returned by `allocate_block`.
    fn deallocate_block(&self, block: Vec<u8>);

    fn stats(&self) -> MemoryStats;
}

impl fmt::Debug for dyn MemoryResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryResource")
            .field("name", &self.name())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Allocate a [`DeviceBuffer`] of exactly `bytes` bytes from `mr`.
///
/// The block goes back to `mr` when the buffer is dropped.
pub fn allocate(mr: &Arc<dyn MemoryResource>, bytes: usize) -> Result<DeviceBuffer> {
    let block = mr.allocate_block(bytes)?;
    debug_assert!(block.len() >= bytes);
    Ok(DeviceBuffer::new(block, bytes, Arc::clone(mr)))
}

/// Shared bookkeeping for resources that track bytes in use.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    in_use: AtomicUsize,
    peak: AtomicUsize,
    allocations: AtomicUsize,
}

impl Counters {
    pub(crate) fn record_alloc(&self, bytes: usize) {
        let now = self.in_use.fetch_add(bytes, Ordering::AcqRel) + bytes;
        self.note_alloc(now);
    }

    /// Record `bytes` only if the total stays within `limit`. On refusal
    /// returns the bytes in use at the time of the check.
    pub(crate) fn try_reserve(&self, bytes: usize, limit: usize) -> Result<(), usize> {
        let prev = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |in_use| {
                in_use.checked_add(bytes).filter(|&now| now <= limit)
            })?;
        self.note_alloc(prev + bytes);
        Ok(())
    }

    fn note_alloc(&self, now: usize) {
        self.peak.fetch_max(now, Ordering::AcqRel);
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_free(&self, bytes: usize) {
        self.in_use.fetch_sub(bytes, Ordering::AcqRel);
    }

    pub(crate) fn snapshot(&self) -> MemoryStats {
        MemoryStats {
            bytes_in_use: self.in_use.load(Ordering::Acquire),
            peak_bytes: self.peak.load(Ordering::Acquire),
            allocations: self.allocations.load(Ordering::Relaxed),
        }
    }
}

/// Plain resource backed by the host heap, optionally capped at a byte budget.
#[derive(Debug, Default)]
pub struct HostMemoryResource {
    limit: Option<usize>,
    counters: Counters,
}

impl HostMemoryResource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse any allocation that would push `bytes_in_use` past `limit`.
    pub fn with_limit(limit: usize) -> Self {
        info!("HostMemoryResource: limit {} bytes", limit);
        Self {
            limit: Some(limit),
            counters: Counters::default(),
        }
    }
}

impl MemoryResource for HostMemoryResource {
    fn name(&self) -> &str {
        "host"
    }

    fn allocate_block(&self, bytes: usize) -> Result<Vec<u8>> {
        match self.limit {
            Some(limit) => {
                if let Err(in_use) = self.counters.try_reserve(bytes, limit) {
                    bail!(
                        "Allocation of {} bytes exceeds limit ({} of {} bytes in use)",
                        bytes,
                        in_use,
                        limit
                    );
                }
            }
            None => self.counters.record_alloc(bytes),
        }
        Ok(vec![0u8; bytes])
    }

    fn deallocate_block(&self, block: Vec<u8>) {
        self.counters.record_free(block.len());
    }

    fn stats(&self) -> MemoryStats {
        self.counters.snapshot()
    }
}

static DEFAULT_RESOURCE: OnceLock<Arc<dyn MemoryResource>> = OnceLock::new();

/// Process-wide resource used when the caller does not supply one.
pub fn default_resource() -> Arc<dyn MemoryResource> {
    let mr = DEFAULT_RESOURCE.get_or_init(|| {
        debug!("Initializing default host memory resource");
        Arc::new(HostMemoryResource::new())
    });
    Arc::clone(mr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_return_memory_on_drop() {
        let host = Arc::new(HostMemoryResource::new());
        let mr: Arc<dyn MemoryResource> = host.clone();

        let buf = allocate(&mr, 128).unwrap();
        assert_eq!(buf.len(), 128);
        assert!(buf.as_slice().iter().all(|&b| b == 0));
        assert_eq!(host.stats().bytes_in_use, 128);

        drop(buf);
        let stats = host.stats();
        assert_eq!(stats.bytes_in_use, 0);
        assert_eq!(stats.peak_bytes, 128);
        assert_eq!(stats.allocations, 1);
    }

    #[test]
    fn limit_is_enforced() {
        let mr: Arc<dyn MemoryResource> = Arc::new(HostMemoryResource::with_limit(100));
        let first = allocate(&mr, 60).unwrap();
        assert!(allocate(&mr, 60).is_err());
        drop(first);
        assert!(allocate(&mr, 60).is_ok());
    }

    #[test]
    fn limit_holds_under_concurrent_allocation() {
        const LIMIT: usize = 1000;
        let host = Arc::new(HostMemoryResource::with_limit(LIMIT));
        let mr: Arc<dyn MemoryResource> = host.clone();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mr = Arc::clone(&mr);
                std::thread::spawn(move || {
                    (0..200)
                        .filter_map(|_| allocate(&mr, 70).ok())
                        .take(20)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let held: Vec<DeviceBuffer> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        let stats = host.stats();
        assert!(held.iter().map(DeviceBuffer::len).sum::<usize>() <= LIMIT);
        assert_eq!(stats.bytes_in_use, held.len() * 70);
        assert!(stats.peak_bytes <= LIMIT);
        assert_eq!(stats.allocations, held.len());
        drop(held);
        assert_eq!(host.stats().bytes_in_use, 0);
    }

    #[test]
    fn default_resource_is_shared() {
        let a = default_resource();
        let b = default_resource();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "host");
    }
}
