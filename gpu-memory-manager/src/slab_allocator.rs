use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::resource::{Counters, MemoryResource, MemoryStats};

/// Slab allocator for device memory
///
/// Serves requests from fixed-size slab classes to reduce fragmentation
/// and make repeated allocation of similar-sized result buffers cheap.
/// Returned slabs are kept on a per-class free list for reuse.
pub struct SlabAllocator {
    slab_classes: Vec<SlabClass>,
    counters: Counters,
}

struct SlabClass {
    size: usize,
    free_slabs: Mutex<VecDeque<Vec<u8>>>,
    max_slabs: usize,
    allocated_count: Mutex<usize>,
}

impl SlabAllocator {
    pub fn new(slab_sizes: &[usize], max_slabs_per_class: usize) -> Result<Self> {
        if slab_sizes.is_empty() {
            bail!("Slab allocator needs at least one slab size");
        }
        if max_slabs_per_class == 0 {
            bail!("Slab allocator needs at least one slab per class");
        }

        let mut sizes = slab_sizes.to_vec();
        sizes.sort_unstable();
        sizes.dedup();

        info!("Initializing Slab Allocator");
        info!("  Slab sizes: {:?}", sizes);
        info!("  Max slabs per class: {}", max_slabs_per_class);

        let slab_classes = sizes
            .into_iter()
            .map(|size| SlabClass {
                size,
                free_slabs: Mutex::new(VecDeque::new()),
                max_slabs: max_slabs_per_class,
                allocated_count: Mutex::new(0),
            })
            .collect();

        Ok(Self {
            slab_classes,
            counters: Counters::default(),
        })
    }

    /// Size of the largest slab class.
    pub fn max_slab_size(&self) -> usize {
        self.slab_classes.last().map_or(0, |class| class.size)
    }

    /// Number of slabs currently parked on the free list of each class.
    pub fn free_slab_counts(&self) -> Vec<usize> {
        self.slab_classes
            .iter()
            .map(|class| class.free_slabs.lock().len())
            .collect()
    }

    fn find_slab_class(&self, size: usize) -> Result<usize> {
        match self.slab_classes.iter().position(|class| class.size >= size) {
            Some(idx) => Ok(idx),
            None => bail!(
                "Requested size {} exceeds largest slab size {}",
                size,
                self.max_slab_size()
            ),
        }
    }

    fn allocate_new_slab(&self, slab_class: &SlabClass, class_idx: usize) -> Result<Vec<u8>> {
        let mut count = slab_class.allocated_count.lock();

        if *count >= slab_class.max_slabs {
            bail!(
                "Maximum number of slabs ({}) reached for class {}",
                slab_class.max_slabs,
                class_idx
            );
        }

        debug!("Allocating new slab for class {} (size {})", class_idx, slab_class.size);
        *count += 1;
        Ok(vec![0u8; slab_class.size])
    }
}

impl MemoryResource for SlabAllocator {
    fn name(&self) -> &str {
        "slab"
    }

    /// Allocate memory from the smallest slab class that fits
    fn allocate_block(&self, bytes: usize) -> Result<Vec<u8>> {
        if bytes == 0 {
            return Ok(Vec::new());
        }

        let slab_class_idx = self.find_slab_class(bytes)?;
        let slab_class = &self.slab_classes[slab_class_idx];

        let reused = slab_class.free_slabs.lock().pop_front();
        let block = match reused {
            Some(mut block) => {
                debug!("Reusing slab from class {} (size {})", slab_class_idx, slab_class.size);
                block[..bytes].fill(0);
                block
            }
            None => self.allocate_new_slab(slab_class, slab_class_idx)?,
        };

        self.counters.record_alloc(slab_class.size);
        Ok(block)
    }

    /// Return a slab to its class free list
    fn deallocate_block(&self, block: Vec<u8>) {
        if block.is_empty() {
            return;
        }
        match self.slab_classes.iter().position(|class| class.size == block.len()) {
            Some(idx) => {
                debug!("Returning slab to pool (class {})", idx);
                self.counters.record_free(block.len());
                self.slab_classes[idx].free_slabs.lock().push_back(block);
            }
            None => debug!("Dropping foreign block of {} bytes", block.len()),
        }
    }

    fn stats(&self) -> MemoryStats {
        self.counters.snapshot()
    }
}

impl Drop for SlabAllocator {
    fn drop(&mut self) {
        info!("Shutting down Slab Allocator");

        for (idx, slab_class) in self.slab_classes.iter().enumerate() {
            let free_slabs = slab_class.free_slabs.lock();
            info!(
                "  Class {}: {} free of {} slabs",
                idx,
                free_slabs.len(),
                *slab_class.allocated_count.lock()
            );
        }
    }
}
