//! Cancellable task and timer handles.
//!
//! Every background task the supervisor spawns (heartbeat loops, reconnect
//! timers) is held through one of these guards, so dropping the guard or
//! removing it from a registry cancels the work. Stale timers are the main
//! way a reconnect pipeline leaks.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Abort-on-drop guard for a spawned task.
pub struct TaskGuard {
    handle: JoinHandle<()>,
    armed: bool,
}

impl TaskGuard {
    /// Spawn `fut` and return a guard for it.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(fut),
            armed: true,
        }
    }

    /// Cancel the task if it is still running.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// Whether the task has run to completion or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Consume the guard without cancelling the task. Used by a task that
    /// removes its own guard from a registry; aborting itself there would
    /// cut off the work it is about to do.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.armed {
            self.handle.abort();
        }
    }
}

/// A one-shot timer: runs `fut` after `delay` unless cancelled or dropped.
pub struct CancellableTimer {
    guard: TaskGuard,
}

impl CancellableTimer {
    /// Arm the timer.
    pub fn start<F>(delay: Duration, fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            guard: TaskGuard::spawn(async move {
                tokio::time::sleep(delay).await;
                fut.await;
            }),
        }
    }

    /// Cancel the timer if it has not fired yet. A fired timer's handle is
    /// inert; cancelling it is a no-op.
    pub fn cancel(&self) {
        self.guard.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.guard.is_finished()
    }

    /// See [`TaskGuard::disarm`].
    pub fn disarm(self) {
        self.guard.disarm();
    }
}
