use std::collections::BTreeSet;
use std::fmt;

use tokio::time::Instant;

use crate::model::{CallId, Trigger};

/// Lifecycle of one service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceLifecycle {
    /// Created, first command not handled yet
    Starting,
    /// Handling a call for the given trigger
    Running(Trigger),
    /// A stop is scheduled
    Stopping,
    Stopped,
}

impl ServiceLifecycle {
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceLifecycle::Running(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ServiceLifecycle::Stopped)
    }
}

impl fmt::Display for ServiceLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceLifecycle::Starting => f.write_str("starting"),
            ServiceLifecycle::Running(trigger) => write!(f, "running({})", trigger),
            ServiceLifecycle::Stopping => f.write_str("stopping"),
            ServiceLifecycle::Stopped => f.write_str("stopped"),
        }
    }
}

/// Answer to the platform after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartResult {
    /// Do not restart the service
    NotSticky,
    /// Deliver the same command again later
    RedeliverIntent,
}

/// Mutable state of one service instance.
///
/// Only the worker that handles commands writes it.
#[derive(Debug)]
pub(crate) struct ServiceState {
    pub start_time: Instant,
    pub current_call_id: Option<CallId>,
    pub display_name: Option<String>,
    pub in_foreground: bool,
    /// Notification ids this instance posted or promoted with
    pub notification_ids: BTreeSet<i32>,
    pub lifecycle: ServiceLifecycle,
}

impl ServiceState {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            current_call_id: None,
            display_name: None,
            in_foreground: false,
            notification_ids: BTreeSet::new(),
            lifecycle: ServiceLifecycle::Starting,
        }
    }

    pub fn owns(&self, call_id: &CallId) -> bool {
        self.current_call_id.as_ref() == Some(call_id)
    }
}
