//! Cancellable task scope of one service instance
//!
//! Observers of a service run as tracked tasks in its scope. Cancelling the
//! scope stops all of them at once. A failing task logs its error and ends
//! without affecting its siblings.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::errors::Result;

struct TrackedTask {
    id: usize,
    name: String,
    handle: JoinHandle<()>,
}

/// Tracked tasks sharing one cancellation token
pub struct ServiceScope {
    name: String,
    next_task_id: AtomicUsize,
    active: Arc<AtomicUsize>,
    tasks: Mutex<Vec<TrackedTask>>,
    cancel_token: CancellationToken,
}

impl ServiceScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            next_task_id: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            tasks: Mutex::new(Vec::new()),
            cancel_token: CancellationToken::new(),
        }
    }

    /// Spawn a task that ends when it completes or the scope is cancelled.
    ///
    /// Returns `None` when the scope is already cancelled.
    pub fn spawn<F>(&self, name: impl Into<String>, future: F) -> Option<usize>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.cancel_token.is_cancelled() {
            warn!("Scope cancelled, task not started (scope: {})", self.name);
            return None;
        }

        let task_name = name.into();
        let task_id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let cancel_token = self.cancel_token.clone();
        let scope_name = self.name.clone();
        let label = task_name.clone();
        let active = self.active.clone();

        active.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            debug!("Task started (scope: {}, task: {}, id: {})", scope_name, label, task_id);
            tokio::select! {
                result = future => match result {
                    Ok(()) => debug!("Task completed (scope: {}, task: {}, id: {})", scope_name, label, task_id),
                    Err(e) => error!(
                        "Task failed (scope: {}, task: {}, id: {}, error: {})",
                        scope_name,
                        label,
                        task_id,
                        e,
                    ),
                },
                _ = cancel_token.cancelled() => {
                    debug!("Task cancelled (scope: {}, task: {}, id: {})", scope_name, label, task_id);
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.handle.is_finished());
        tasks.push(TrackedTask {
            id: task_id,
            name: task_name,
            handle,
        });
        Some(task_id)
    }

    /// Token that fires when the scope is cancelled
    pub fn token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Number of tasks still running
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Names of tracked tasks that have not finished
    pub fn running_tasks(&self) -> Vec<String> {
        self.tasks
            .lock()
            .iter()
            .filter(|t| !t.handle.is_finished())
            .map(|t| t.name.clone())
            .collect()
    }

    /// Cancel every task of the scope
    pub fn cancel(&self) {
        debug!("Cancelling scope (scope: {}, active: {})", self.name, self.active_count());
        self.cancel_token.cancel();
    }

    /// Cancel and wait for the tasks to finish, aborting stragglers after `timeout`
    pub async fn shutdown(&self, timeout: Duration) {
        self.cancel();
        let tasks: Vec<TrackedTask> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let abort = task.handle.abort_handle();
            if tokio::time::timeout(timeout, task.handle).await.is_err() {
                warn!(
                    "Task did not stop in time, aborting (scope: {}, task: {}, id: {})",
                    self.name,
                    task.name,
                    task.id,
                );
                abort.abort();
            }
        }
    }
}

impl Drop for ServiceScope {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
