//! Queue and allocator pair threaded through every kernel.

use std::fmt;
use std::sync::Arc;

use anyhow::Context as _;
use gpu_memory_manager::{
    default_queue, default_resource, ExecutionQueue, HostMemoryResource, MemoryResource, Pending,
    SlabAllocator,
};
use tracing::{debug, info};

use crate::config::ExecConfig;
use crate::error::{KernelError, Result};

/// Where a kernel runs and where its results are allocated.
#[derive(Clone)]
pub struct ExecContext {
    queue: Arc<ExecutionQueue>,
    mr: Arc<dyn MemoryResource>,
    sync_launches: bool,
}

impl ExecContext {
    pub fn new(queue: Arc<ExecutionQueue>, mr: Arc<dyn MemoryResource>) -> Self {
        Self {
            queue,
            mr,
            sync_launches: false,
        }
    }

    /// Process default queue and default memory resource.
    pub fn try_default() -> Result<Self> {
        let queue = default_queue().map_err(KernelError::from_queue)?;
        Ok(Self::new(queue, default_resource()))
    }

    /// Fresh queue and resource built from `config`.
    pub fn from_config(config: &ExecConfig) -> anyhow::Result<Self> {
        let queue = Arc::new(ExecutionQueue::new(config.queue_depth)?);
        let mr: Arc<dyn MemoryResource> = match &config.pool {
            Some(pool) => Arc::new(
                SlabAllocator::new(&pool.slab_sizes, pool.max_slabs_per_class)
                    .context("Failed to build slab pool from config")?,
            ),
            None => Arc::new(HostMemoryResource::new()),
        };
        info!(
            "ExecContext: queue {} (depth {}), memory resource {}, sync_launches={}",
            queue.id(),
            config.queue_depth,
            mr.name(),
            config.sync_launches
        );
        Ok(Self {
            queue,
            mr,
            sync_launches: config.sync_launches,
        })
    }

    /// Config read from the environment, see [`ExecConfig::from_env`].
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_config(&ExecConfig::from_env()?)
    }

    pub fn with_memory_resource(mut self, mr: Arc<dyn MemoryResource>) -> Self {
        self.mr = mr;
        self
    }

    pub fn with_queue(mut self, queue: Arc<ExecutionQueue>) -> Self {
        self.queue = queue;
        self
    }

    /// Wait for every launch before returning from the call site.
    pub fn with_sync_launches(mut self, sync: bool) -> Self {
        self.sync_launches = sync;
        self
    }

    pub fn queue(&self) -> &Arc<ExecutionQueue> {
        &self.queue
    }

    pub fn memory_resource(&self) -> &Arc<dyn MemoryResource> {
        &self.mr
    }

    pub fn sync_launches(&self) -> bool {
        self.sync_launches
    }

    /// Queue `work` behind earlier launches. The closure receives the
    /// resource its output must be allocated from.
    pub fn launch<T, F>(&self, label: &'static str, work: F) -> Result<Deferred<T>>
    where
        T: Send + 'static,
        F: FnOnce(&Arc<dyn MemoryResource>) -> Result<T> + Send + 'static,
    {
        let mr = Arc::clone(&self.mr);
        let pending = self
            .queue
            .submit(label, move || work(&mr).map_err(anyhow::Error::from));

        if !self.sync_launches {
            return Ok(Deferred { pending });
        }

        debug!("ExecContext: synchronizing after {}", label);
        let outcome = pending.wait().map_err(KernelError::from_queue);
        let synced = self.synchronize();
        let value = outcome?;
        synced?;
        Ok(Deferred::ready(label, value))
    }

    /// Wait for all launches on this context's queue.
    pub fn synchronize(&self) -> Result<()> {
        self.queue.synchronize().map_err(KernelError::from_queue)
    }
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("queue", &self.queue.id())
            .field("memory_resource", &self.mr.name())
            .field("sync_launches", &self.sync_launches)
            .finish()
    }
}

/// Result of a queued kernel.
pub struct Deferred<T> {
    pending: Pending<T>,
}

impl<T> Deferred<T> {
    /// Already computed result.
    pub fn ready(label: &'static str, value: T) -> Self {
        Self {
            pending: Pending::ready(label, Ok(value)),
        }
    }

    pub fn label(&self) -> &'static str {
        self.pending.label()
    }

    /// Block until the kernel finishes. Not for use inside an async runtime.
    pub fn wait(self) -> Result<T> {
        self.pending.wait().map_err(KernelError::from_queue)
    }

    pub async fn wait_async(self) -> Result<T> {
        self.pending.wait_async().await.map_err(KernelError::from_queue)
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("label", &self.label()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn private_context() -> ExecContext {
        ExecContext::from_config(&ExecConfig::default()).unwrap()
    }

    #[test]
    fn launch_returns_kernel_errors_intact() {
        let ctx = private_context();
        let deferred = ctx
            .launch::<(), _>("fails", |_| Err(KernelError::OutOfBounds("row 12".into())))
            .unwrap();
        assert_eq!(
            deferred.wait().unwrap_err(),
            KernelError::OutOfBounds("row 12".into())
        );
        assert!(matches!(ctx.synchronize(), Err(KernelError::Execution(_))));
        ctx.synchronize().unwrap();
    }

    #[test]
    fn deferred_debug_names_the_kernel() {
        let deferred = Deferred::ready("strings::gather", vec![1u8]);
        assert_eq!(format!("{:?}", deferred), "Deferred { label: \"strings::gather\" }");
        let err = private_context()
            .with_sync_launches(true)
            .launch::<(), _>("fails", |_| Err(KernelError::InvalidArgument("bad".into())))
            .unwrap_err();
        assert_eq!(err, KernelError::InvalidArgument("bad".into()));
    }

    #[test]
    fn sync_launches_report_at_call_site() {
        let ctx = private_context().with_sync_launches(true);
        let err = ctx
            .launch::<(), _>("fails", |_| Err(KernelError::Allocation("full".into())))
            .err()
            .unwrap();
        assert_eq!(err, KernelError::Allocation("full".into()));
        // the queue error was consumed by the call-site synchronize
        ctx.synchronize().unwrap();

        let ok = ctx.launch("ok", |_| Ok(5)).unwrap();
        assert_eq!(ok.wait().unwrap(), 5);
    }

    #[test]
    fn pool_config_selects_slab_resource() {
        let config = ExecConfig {
            pool: Some(PoolConfig {
                slab_sizes: vec![1024],
                max_slabs_per_class: 2,
            }),
            ..ExecConfig::default()
        };
        let ctx = ExecContext::from_config(&config).unwrap();
        assert_eq!(ctx.memory_resource().name(), "slab");
        let name = ctx
            .launch("name", |mr| Ok(mr.name().to_string()))
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(name, "slab");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deferred_can_be_awaited() {
        let ctx = ExecContext::try_default().unwrap();
        let value = ctx.launch("async", |_| Ok(41 + 1)).unwrap().wait_async().await.unwrap();
        assert_eq!(value, 42);
    }
}
