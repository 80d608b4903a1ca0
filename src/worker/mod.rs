//! Worker lifecycle: the dequeue loop, handler dispatch, liveness
//! heartbeat, and signal-driven shutdown.

mod runner;

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::handler::{FromPayload, FromPayloadVariadic, HandlerFn, HandlerRegistry};
use crate::queue::Queue;

/// Lifecycle state of a worker or sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunStatus {
    /// Not running; `run()` may be called.
    Stopped = 0,
    /// The run loop is active.
    Running = 1,
    /// Shutdown was requested; the loop exits at its next check.
    Stopping = 2,
}

impl RunStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// Shared atomic holding a [`RunStatus`].
#[derive(Debug, Clone)]
pub(crate) struct StatusCell(Arc<AtomicU8>);

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(RunStatus::Stopped as u8)))
    }

    pub(crate) fn load(&self) -> RunStatus {
        RunStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, status: RunStatus) {
        self.0.store(status as u8, Ordering::Release);
    }

    pub(crate) fn transition(&self, from: RunStatus, to: RunStatus) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Errors raised by the worker lifecycle.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// `run()` was called while the worker was not stopped.
    #[error("worker is already running")]
    AlreadyRunning,
}

/// Tunables for the worker run loop.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Interval between liveness refreshes. Must be well under the queue's
    /// keep-alive timeout so one missed tick does not expire the key.
    pub keep_alive_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(15),
        }
    }
}

/// A single-queue task worker.
///
/// The worker dequeues one task at a time, dispatches it to the registered
/// handler, and releases it, including when the handler failed, so a bad
/// task is not re-run forever. A heartbeat task refreshes the liveness key
/// for as long as the worker may still hold a task in flight.
pub struct Worker {
    pub(crate) queue: Queue,
    pub(crate) handlers: HandlerRegistry,
    pub(crate) status: StatusCell,
    pub(crate) config: WorkerConfig,
}

impl Worker {
    /// Creates a worker bound to a queue with default configuration.
    ///
    /// The worker takes over the queue binding under a fresh random
    /// identity, so clones of the same queue can back other workers.
    #[must_use]
    pub fn new(queue: Queue) -> Self {
        Self::with_config(queue, WorkerConfig::default())
    }

    /// Creates a worker with explicit configuration.
    #[must_use]
    pub fn with_config(mut queue: Queue, config: WorkerConfig) -> Self {
        queue.bind_worker(crate::queue::random_worker_id());
        Self {
            queue,
            handlers: HandlerRegistry::new(),
            status: StatusCell::new(),
            config,
        }
    }

    /// The queue this worker consumes.
    #[must_use]
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// The identity this worker dequeues and heartbeats under.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        self.queue.worker_id()
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status.load()
    }

    /// Returns a handle that can request shutdown from another task.
    #[must_use]
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            status: self.status.clone(),
        }
    }

    /// Requests shutdown. The run loop finishes the task in flight, exits
    /// at its next status check, and only then removes its liveness key.
    pub fn stop(&self) {
        self.status.transition(RunStatus::Running, RunStatus::Stopping);
    }

    /// Registers a handler under the function's own symbol path.
    ///
    /// Intended for startup; the registry is read-only once the worker
    /// runs.
    pub fn register<F, Args>(&mut self, f: F)
    where
        F: HandlerFn<Args>,
        Args: FromPayload + Send + 'static,
    {
        self.handlers.register(f);
    }

    /// Registers a handler under an explicit function path.
    pub fn register_as<F, Args>(&mut self, path: impl Into<String>, f: F)
    where
        F: HandlerFn<Args>,
        Args: FromPayload + Send + 'static,
    {
        self.handlers.register_as(path, f);
    }

    /// Registers a variadic handler under the function's own symbol path.
    pub fn register_variadic<F, Args>(&mut self, f: F)
    where
        F: HandlerFn<Args>,
        Args: FromPayloadVariadic + Send + 'static,
    {
        self.handlers.register_variadic(f);
    }

    /// Registers a variadic handler under an explicit function path.
    pub fn register_variadic_as<F, Args>(&mut self, path: impl Into<String>, f: F)
    where
        F: HandlerFn<Args>,
        Args: FromPayloadVariadic + Send + 'static,
    {
        self.handlers.register_variadic_as(path, f);
    }
}

/// Cloneable handle for requesting worker shutdown from other tasks or
/// signal handlers.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    status: StatusCell,
}

impl WorkerHandle {
    /// Requests shutdown; a no-op unless the worker is running.
    pub fn stop(&self) {
        self.status.transition(RunStatus::Running, RunStatus::Stopping);
    }

    /// The worker's current lifecycle state.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status.load()
    }
}
