//! Ordered execution queue for asynchronous kernel launches.
//!
//! A queue owns one worker thread. Work submitted to the same queue runs in
//! submission order; work on different queues is unordered unless the caller
//! synchronizes. Submission returns immediately with a [`Pending`] handle.
//! Nothing is cancelled once queued: dropping a queue drains it first.

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Outstanding-task bound for the process default queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

type Task = Box<dyn FnOnce() + Send + 'static>;

static NEXT_QUEUE_ID: AtomicUsize = AtomicUsize::new(0);

struct QueueState {
    inner: Mutex<QueueInner>,
    work_ready: Condvar,
    space: Condvar,
    drained: Condvar,
    depth: usize,
}

struct QueueInner {
    tasks: VecDeque<Task>,
    /// Queued plus running.
    outstanding: usize,
    /// First failure since the last synchronize.
    error: Option<String>,
    shutdown: bool,
}

/// Ordered stream of asynchronous work.
pub struct ExecutionQueue {
    id: usize,
    state: Arc<QueueState>,
    worker: Option<JoinHandle<()>>,
}

/// Completion handle for one submitted task.
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
    label: &'static str,
}

impl ExecutionQueue {
    /// Create a queue that accepts at most `depth` outstanding tasks before
    /// `submit` blocks.
    pub fn new(depth: usize) -> Result<Self> {
        let depth = depth.max(1);
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(QueueState {
            inner: Mutex::new(QueueInner {
                tasks: VecDeque::new(),
                outstanding: 0,
                error: None,
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            space: Condvar::new(),
            drained: Condvar::new(),
            depth,
        });

        let worker_state = Arc::clone(&state);
        let worker = std::thread::Builder::new()
            .name(format!("exec-queue-{}", id))
            .spawn(move || run_worker(id, worker_state))
            .context("Failed to spawn execution queue worker")?;

        debug!("ExecutionQueue {}: created (depth {})", id, depth);
        Ok(Self {
            id,
            state,
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Tasks queued or running right now.
    pub fn outstanding(&self) -> usize {
        self.state.inner.lock().outstanding
    }

    /// Enqueue `work` behind everything already submitted.
    ///
    /// Blocks while the queue is at depth. Must not be called from inside a
    /// task running on the same queue.
    pub fn submit<T, F>(&self, label: &'static str, work: F) -> Pending<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let state = Arc::clone(&self.state);
        let queue_id = self.id;

        let task: Task = Box::new(move || {
            let outcome = match catch_unwind(AssertUnwindSafe(work)) {
                Ok(result) => result,
                Err(panic) => Err(anyhow!("{} panicked: {}", label, panic_message(&*panic))),
            };
            if let Err(err) = &outcome {
                warn!("ExecutionQueue {}: {} failed: {:#}", queue_id, label, err);
                let mut inner = state.inner.lock();
                if inner.error.is_none() {
                    inner.error = Some(format!("{}: {:#}", label, err));
                }
            }
            // The caller may have dropped its handle; the result is then discarded.
            let _ = tx.send(outcome);
        });

        let mut inner = self.state.inner.lock();
        while inner.outstanding >= self.state.depth {
            self.state.space.wait(&mut inner);
        }
        inner.outstanding += 1;
        inner.tasks.push_back(task);
        let outstanding = inner.outstanding;
        drop(inner);
        self.state.work_ready.notify_one();

        debug!("ExecutionQueue {}: queued {} ({} outstanding)", self.id, label, outstanding);
        Pending { rx, label }
    }

    /// Wait until every submitted task has finished.
    ///
    /// Reports, then clears, the first failure recorded since the previous
    /// synchronization.
    pub fn synchronize(&self) -> Result<()> {
        let mut inner = self.state.inner.lock();
        while inner.outstanding > 0 {
            self.state.drained.wait(&mut inner);
        }
        match inner.error.take() {
            Some(msg) => bail!("execution queue {} reported a failure: {}", self.id, msg),
            None => Ok(()),
        }
    }
}

impl Drop for ExecutionQueue {
    fn drop(&mut self) {
        self.state.inner.lock().shutdown = true;
        self.state.work_ready.notify_all();

        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
        debug!("ExecutionQueue {}: shut down", self.id);
    }
}

fn run_worker(id: usize, state: Arc<QueueState>) {
    loop {
        let task = {
            let mut inner = state.inner.lock();
            loop {
                if let Some(task) = inner.tasks.pop_front() {
                    break Some(task);
                }
                if inner.shutdown {
                    break None;
                }
                state.work_ready.wait(&mut inner);
            }
        };
        let Some(task) = task else { break };

        task();

        let mut inner = state.inner.lock();
        inner.outstanding -= 1;
        state.space.notify_one();
        if inner.outstanding == 0 {
            state.drained.notify_all();
        }
    }
    debug!("ExecutionQueue {}: worker exiting", id);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl<T> Pending<T> {
    /// A handle that is already resolved.
    pub fn ready(label: &'static str, result: Result<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx, label }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Block the calling thread until the task finishes.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`Pending::wait_async`] there.
    pub fn wait(self) -> Result<T> {
        let label = self.label;
        self.rx
            .blocking_recv()
            .map_err(|_| anyhow!("{} was dropped before completing", label))?
    }

    pub async fn wait_async(self) -> Result<T> {
        let label = self.label;
        self.rx
            .await
            .map_err(|_| anyhow!("{} was dropped before completing", label))?
    }
}

static DEFAULT_QUEUE: OnceLock<Arc<ExecutionQueue>> = OnceLock::new();

/// Process-wide queue used when the caller does not supply one.
pub fn default_queue() -> Result<Arc<ExecutionQueue>> {
    if let Some(queue) = DEFAULT_QUEUE.get() {
        return Ok(Arc::clone(queue));
    }
    let queue = Arc::new(ExecutionQueue::new(DEFAULT_QUEUE_DEPTH)?);
    Ok(Arc::clone(DEFAULT_QUEUE.get_or_init(|| queue)))
}
