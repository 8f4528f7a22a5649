pub mod device_buffer;
pub mod execution_queue;
pub mod resource;
pub mod slab_allocator;

pub use device_buffer::DeviceBuffer;
pub use execution_queue::{default_queue, ExecutionQueue, Pending};
pub use resource::{allocate, default_resource, HostMemoryResource, MemoryResource, MemoryStats};
pub use slab_allocator::SlabAllocator;
