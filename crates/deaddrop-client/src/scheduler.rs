//! Cancellable periodic tasks.
//!
//! A [`PeriodicTask`] runs one cycle to completion, waits for its interval,
//! then checks whether it was asked to stop. Stopping never interrupts a cycle
//! that is already running: it only cuts the wait short and prevents the next
//! cycle.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::lock;

pub struct PeriodicTask {
    name: &'static str,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `cycle` on the tokio runtime, repeating every `interval`.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut cycle: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            debug!(task = name, interval_ms = interval.as_millis() as u64, "Periodic task started");

            loop {
                if *stop_rx.borrow() {
                    break;
                }

                cycle().await;

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    changed = stop_rx.changed() => {
                        // Handle dropped without stopping: nobody can stop us anymore
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            debug!(task = name, "Periodic task stopped");
        });

        Self {
            name,
            stop_tx,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Ask the task to stop after its current cycle.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopping(&self) -> bool {
        *self.stop_tx.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task to exit.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            warn!(task = self.name, error = %e, "Periodic task ended abnormally");
        }
    }

    pub async fn stop_and_join(self) {
        self.stop();
        self.join().await;
    }
}

/// Holds at most one [`PeriodicTask`] for a named loop, so that two cycles of
/// the same loop never overlap.
#[derive(Default)]
pub struct TaskSlot {
    task: Mutex<Option<PeriodicTask>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the loop. Returns `false` when it is already running.
    ///
    /// A loop that was stopped but is still finishing its last cycle is
    /// awaited before the new one is spawned.
    pub async fn start<F, Fut>(&self, name: &'static str, interval: Duration, cycle: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let previous = {
            let mut slot = lock(&self.task);
            let running = slot
                .as_ref()
                .is_some_and(|task| !task.is_stopping() && !task.is_finished());
            if running {
                return false;
            }
            slot.take()
        };

        if let Some(previous) = previous {
            previous.join().await;
        }

        let mut slot = lock(&self.task);
        if slot.is_some() {
            // Someone else started it while we waited
            return false;
        }
        *slot = Some(PeriodicTask::spawn(name, interval, cycle));
        true
    }

    /// Flip the stop flag; the in-flight cycle (if any) still completes.
    pub fn stop(&self) {
        if let Some(task) = lock(&self.task).as_ref() {
            task.stop();
        }
    }

    /// Stop and wait until the last cycle has finished.
    pub async fn stop_and_join(&self) {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            task.stop_and_join().await;
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|task| !task.is_stopping() && !task.is_finished())
    }
}
