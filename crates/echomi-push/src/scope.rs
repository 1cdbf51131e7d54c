//! Owned registry of background tasks.
//!
//! Every task the orchestrator starts is spawned through a [`TaskScope`], so
//! shutting the orchestrator down aborts all outstanding work instead of
//! leaving detached tasks behind.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};

/// Tracks spawned tasks and aborts them on shutdown or drop.
///
/// Must be used from within a tokio runtime.
#[derive(Debug, Default)]
pub struct TaskScope {
    handles: Mutex<Vec<AbortHandle>>,
    shut_down: AtomicBool,
}

impl TaskScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `future` as a task owned by this scope.
    ///
    /// After [`shutdown`](Self::shutdown) the task is aborted before it runs.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = tokio::spawn(future);

        if self.is_shut_down() {
            log::debug!("Task scope is shut down; aborting new task");
            handle.abort();
            return handle;
        }

        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.retain(|h| !h.is_finished());
        handles.push(handle.abort_handle());
        handle
    }

    /// Number of tracked tasks still running
    pub fn active(&self) -> usize {
        let handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        handles.iter().filter(|h| !h.is_finished()).count()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Abort every tracked task. Later spawns are aborted immediately.
    pub fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
        let handles: Vec<AbortHandle> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };

        let running = handles.iter().filter(|h| !h.is_finished()).count();
        for handle in handles {
            handle.abort();
        }
        if running > 0 {
            log::info!("Aborted {} background task(s)", running);
        }
    }
}

impl Drop for TaskScope {
    fn drop(&mut self) {
        let handles = self.handles.get_mut().unwrap_or_else(|e| e.into_inner());
        for handle in handles.drain(..) {
            handle.abort();
        }
    }
}
