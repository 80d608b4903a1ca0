//! Periodic recovery driver.
//!
//! Workers crash; their liveness keys expire; their in-flight tasks sit in
//! the processing hash until someone puts them back. The sweeper is that
//! someone: it calls [`Queue::requeue_lost`] on each of its queues on a
//! fixed interval. Run one sweeper process per deployment; it is
//! independent of the workers.

use std::time::Duration;

use crate::queue::Queue;
use crate::worker::{RunStatus, StatusCell};

const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Recovers lost tasks across one or more queues.
///
/// Cloning shares the lifecycle state, so a clone can be moved into a
/// spawned task while the original keeps control via [`stop`](Self::stop).
#[derive(Debug, Clone)]
pub struct Sweeper {
    queues: Vec<Queue>,
    interval: Duration,
    status: StatusCell,
}

impl Sweeper {
    /// Creates a sweeper over the given queues with the default interval
    /// of sixty seconds.
    #[must_use]
    pub fn new(queues: Vec<Queue>) -> Self {
        Self {
            queues,
            interval: DEFAULT_SWEEP_INTERVAL,
            status: StatusCell::new(),
        }
    }

    /// Overrides the sweep interval. Zero is ignored.
    pub fn set_interval(&mut self, interval: Duration) {
        if !interval.is_zero() {
            self.interval = interval;
        }
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status.load()
    }

    /// Runs recovery passes until stopped. Returns immediately if the
    /// sweeper is already running.
    pub async fn run(&self) {
        if !self
            .status
            .transition(RunStatus::Stopped, RunStatus::Running)
        {
            tracing::warn!("sweeper is already running");
            return;
        }

        tracing::info!(queues = self.queues.len(), "sweeper started");
        while self.status.load() == RunStatus::Running {
            self.sweep().await;
            tokio::time::sleep(self.interval).await;
        }
        self.status.store(RunStatus::Stopped);
        tracing::info!("sweeper stopped");
    }

    /// Requests shutdown; the loop exits at its next check.
    pub fn stop(&self) {
        self.status
            .transition(RunStatus::Running, RunStatus::Stopping);
    }

    async fn sweep(&self) {
        for queue in &self.queues {
            if let Err(err) = queue.requeue_lost().await {
                tracing::error!(queue = %queue.name(), error = %err, "requeue-lost failed");
            }
        }
    }
}
