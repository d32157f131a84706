//! Executors that run transmission tasks.
//!
//! The dispatcher owns no threads or pool. Every transmission is handed to an
//! [`Executor`] supplied by the caller, which decides when and how many run
//! at once:
//!
//! | Executor | Concurrency | Order |
//! |----------|-------------|-------|
//! | [`tokio::runtime::Handle`] | unbounded | none |
//! | [`BoundedExecutor`] | at most `n` in flight | none |
//! | [`SerialExecutor`] | one at a time | submission order |
//!
//! Any `Fn(Task) + Send + Sync` closure is an executor too, which is handy
//! for instrumenting tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, Semaphore};

/// A unit of work submitted by the dispatcher.
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Accepts tasks for asynchronous execution.
///
/// `execute` must not block the caller. Dropping a task without polling it
/// to completion resolves the corresponding dispatch as abandoned.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

impl Executor for Handle {
    fn execute(&self, task: Task) {
        self.spawn(task);
    }
}

impl<F> Executor for F
where
    F: Fn(Task) + Send + Sync,
{
    fn execute(&self, task: Task) {
        (self)(task)
    }
}

/// Runs tasks one after another, in the order they were submitted.
///
/// Backed by a single worker task on the given runtime. The worker exits once
/// every clone of the executor has been dropped and the queue is drained.
#[derive(Clone)]
pub struct SerialExecutor {
    queue: mpsc::UnboundedSender<Task>,
}

impl SerialExecutor {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime, like `tokio::spawn`.
    pub fn new() -> Self {
        Self::on(&Handle::current())
    }

    /// Spawn the worker on `handle`.
    pub fn on(handle: &Handle) -> Self {
        let (queue, mut rx) = mpsc::unbounded_channel::<Task>();
        handle.spawn(async move {
            while let Some(task) = rx.recv().await {
                task.await;
            }
            tracing::trace!("Serial executor drained");
        });
        Self { queue }
    }
}

impl Executor for SerialExecutor {
    fn execute(&self, task: Task) {
        if self.queue.send(task).is_err() {
            // Worker is gone (runtime shut down); the dropped task resolves
            // its dispatch as abandoned.
            tracing::warn!("Serial executor worker stopped, dropping task");
        }
    }
}

/// Spawns every task but lets at most `n` run at the same time.
#[derive(Clone)]
pub struct BoundedExecutor {
    handle: Handle,
    permits: Arc<Semaphore>,
}

impl BoundedExecutor {
    /// At most `max_in_flight` tasks on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new(max_in_flight: usize) -> Self {
        Self::on(&Handle::current(), max_in_flight)
    }

    /// At most `max_in_flight` tasks on `handle`. Zero is treated as one.
    pub fn on(handle: &Handle, max_in_flight: usize) -> Self {
        Self {
            handle: handle.clone(),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Number of tasks that could start right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Executor for BoundedExecutor {
    fn execute(&self, task: Task) {
        let permits = Arc::clone(&self.permits);
        self.handle.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            task.await;
        });
    }
}
