use std::fmt;
use std::sync::Arc;

use crate::resource::MemoryResource;

/// An owned block of device memory.
///
/// The block is handed back to the resource that produced it on drop, so a
/// buffer never outlives its allocator.
pub struct DeviceBuffer {
    block: Vec<u8>,
    size: usize,
    resource: Arc<dyn MemoryResource>,
}

impl DeviceBuffer {
    pub(crate) fn new(block: Vec<u8>, size: usize, resource: Arc<dyn MemoryResource>) -> Self {
        Self {
            block,
            size,
            resource,
        }
    }

    /// Requested size in bytes (the backing block may be larger).
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.block[..self.size]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.block[..self.size]
    }

    /// Name of the resource that owns this allocation.
    pub fn resource_name(&self) -> &str {
        self.resource.name()
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        let block = std::mem::take(&mut self.block);
        self.resource.deallocate_block(block);
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("len", &self.size)
            .field("resource", &self.resource.name())
            .finish()
    }
}
