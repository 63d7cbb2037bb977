//! Cancellable delayed actions

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Runs an action after a delay; scheduling again replaces the pending one.
///
/// At most one action is pending at any time, so a burst of schedules
/// results in a single execution of the last scheduled action.
#[derive(Debug)]
pub struct Debouncer {
    name: &'static str,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            pending: Mutex::new(None),
        }
    }

    /// Schedule `action` to run after `delay`, cancelling a pending one
    pub fn schedule<F>(&self, delay: Duration, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action.await;
        });
        if let Some(previous) = self.pending.lock().replace(handle) {
            if !previous.is_finished() {
                debug!("Replacing pending action (debouncer: {})", self.name);
            }
            previous.abort();
        }
        debug!("Action scheduled (debouncer: {}, delay_ms: {})", self.name, delay.as_millis() as u64);
    }

    /// Drop the pending action without running it
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
