//! The worker run loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use metrics::counter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::handler::{Handler, HandlerError};
use crate::models::Task;
use crate::queue::Queue;

use super::{RunStatus, Worker, WorkerError, WorkerHandle};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

impl Worker {
    /// Runs the worker until it is stopped.
    ///
    /// Starts the heartbeat (one immediate refresh, then one per
    /// configured interval), subscribes to SIGHUP, and loops: dequeue,
    /// dispatch, release. Store errors back off with a doubling delay from
    /// one second to a minute; handler failures and panics are contained
    /// and logged so one bad task cannot kill the worker.
    ///
    /// The heartbeat keeps refreshing while the worker is stopping, so a
    /// task still in flight is not recovered early; the liveness key is
    /// removed only after the loop has fully exited.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::AlreadyRunning`] when the worker is not
    /// stopped.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        if !self
            .status
            .transition(RunStatus::Stopped, RunStatus::Running)
        {
            return Err(WorkerError::AlreadyRunning);
        }

        tracing::info!(
            worker_id = %self.queue.worker_id(),
            queue = %self.queue.name(),
            "worker started"
        );

        let (heartbeat_stop, heartbeat_stopped) = watch::channel(false);
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.queue.clone(),
            self.config.keep_alive_interval,
            heartbeat_stopped,
        ));
        let sighup = spawn_sighup_listener(self.handle());

        let mut backoff = INITIAL_BACKOFF;
        while self.status.load() == RunStatus::Running {
            match self.queue.dequeue().await {
                Err(err) => {
                    tracing::error!(error = %err, "dequeue failed");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
                Ok(None) => {
                    backoff = INITIAL_BACKOFF;
                }
                Ok(Some(task)) => {
                    backoff = INITIAL_BACKOFF;
                    self.execute(&task).await;
                    if let Err(err) = self.queue.release().await {
                        tracing::error!(error = %err, "failed to release task");
                    }
                }
            }
        }

        if let Some(listener) = sighup {
            listener.abort();
        }
        let _ = heartbeat_stop.send(true);
        let _ = heartbeat.await;
        if let Err(err) = self.queue.die().await {
            tracing::warn!(error = %err, "failed to delete liveness key");
        }

        self.status.store(RunStatus::Stopped);
        tracing::info!(worker_id = %self.queue.worker_id(), "worker stopped");
        Ok(())
    }

    /// Dispatches one task to its handler.
    ///
    /// A task with no registered handler is dropped: another worker may
    /// know it, and releasing it here keeps it from being recovered into a
    /// loop on this one.
    async fn execute(&self, task: &Task) {
        let Some(handler) = self.handlers.get(task.func_path()) else {
            counter!("deferq.tasks.dropped", "reason" => "unregistered").increment(1);
            tracing::debug!(func_path = %task.func_path(), "no handler registered; dropping task");
            return;
        };

        match call_contained(handler, task.payload()).await {
            Ok(()) => {
                counter!("deferq.tasks.executed", "func_path" => task.func_path().to_string())
                    .increment(1);
            }
            Err(err) => {
                counter!("deferq.tasks.failed", "func_path" => task.func_path().to_string())
                    .increment(1);
                tracing::error!(func_path = %task.func_path(), error = %err, "handler failed");
            }
        }
    }
}

/// Invokes a handler with panic containment.
pub(crate) async fn call_contained(
    handler: &Handler,
    payload: &[u8],
) -> Result<(), HandlerError> {
    match AssertUnwindSafe(handler.call(payload)).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(HandlerError::Panicked(panic_message(&panic))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

async fn heartbeat_loop(queue: Queue, interval: Duration, mut stopped: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(err) = queue.keep_alive().await {
                    tracing::warn!(error = %err, "heartbeat failed");
                }
            }
            _ = stopped.changed() => return,
        }
    }
}

#[cfg(unix)]
fn spawn_sighup_listener(handle: WorkerHandle) -> Option<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::hangup()) {
        Ok(mut hangup) => Some(tokio::spawn(async move {
            if hangup.recv().await.is_some() {
                tracing::info!("received SIGHUP, stopping worker");
                handle.stop();
            }
        })),
        Err(err) => {
            tracing::error!(error = %err, "failed to subscribe to SIGHUP");
            None
        }
    }
}

#[cfg(not(unix))]
fn spawn_sighup_listener(_handle: WorkerHandle) -> Option<JoinHandle<()>> {
    None
}
