//! The call service: one background execution unit per service class
//!
//! A [`CallService`] is driven by platform commands. Each instance runs a
//! single worker task that owns its [`ServiceLifecycle`] and handles commands
//! strictly in delivery order. Observers of the tracked call run in the
//! instance's [`ServiceScope`](crate::scope::ServiceScope) and talk back to
//! the worker through the same queue, so state is never written concurrently.
//!
//! ```text
//!   platform ──command──▶ ┌────────────┐ ◀──stop / refresh── observers
//!                         │   worker   │
//!   debouncer ──stop────▶ └────────────┘ ──▶ foreground, notifications,
//!                                            sound, screen receiver
//! ```

mod call_service;
mod observers;
mod state;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::client::{CallClient, NotificationSource};
use crate::config::ServiceSettings;
use crate::errors::{Result, ServiceError};
use crate::intent::ServiceCommand;
use crate::model::{CallId, Notification, Trigger};
use crate::platform::PlatformServices;
use crate::profile::ServiceClass;

pub use call_service::CallService;
pub use state::{ServiceLifecycle, StartResult};

/// Collaborators a service instance is built with
#[derive(Clone)]
pub struct ServiceDeps {
    pub client: Arc<dyn CallClient>,
    pub notification_source: Arc<dyn NotificationSource>,
    pub platform: PlatformServices,
    pub settings: ServiceSettings,
}

/// Work items of the service worker
pub(crate) enum ServiceMessage {
    Command {
        command: ServiceCommand,
        reply: oneshot::Sender<Result<StartResult>>,
    },
    StopRequested {
        reason: &'static str,
    },
    /// Deferred stop is due
    ExecuteStop,
    UpdateForeground {
        call_id: CallId,
        notification_id: i32,
        notification: Notification,
        trigger: Trigger,
    },
    RemoveIncoming {
        notification_id: i32,
    },
    TaskRemoved {
        done: oneshot::Sender<()>,
    },
    Timeout,
}

/// Handle to a running service instance. Cheap to clone.
#[derive(Clone)]
pub struct CallServiceHandle {
    service_class: ServiceClass,
    messages: mpsc::UnboundedSender<ServiceMessage>,
    lifecycle: watch::Receiver<ServiceLifecycle>,
    current_call: watch::Receiver<Option<CallId>>,
    stop_signal: watch::Receiver<bool>,
}

impl CallServiceHandle {
    pub fn service_class(&self) -> ServiceClass {
        self.service_class
    }

    /// Deliver a command and wait for the service's answer
    pub async fn start_command(&self, command: ServiceCommand) -> Result<StartResult> {
        self.dispatch(command)?
            .await
            .map_err(|_| ServiceError::ServiceStopped)?
    }

    /// Queue a command; the receiver resolves once it was handled
    pub fn dispatch(&self, command: ServiceCommand) -> Result<oneshot::Receiver<Result<StartResult>>> {
        let (reply, rx) = oneshot::channel();
        self.messages
            .send(ServiceMessage::Command { command, reply })
            .map_err(|_| ServiceError::ServiceStopped)?;
        Ok(rx)
    }

    /// The user removed the app's task
    pub async fn task_removed(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.messages
            .send(ServiceMessage::TaskRemoved { done })
            .map_err(|_| ServiceError::ServiceStopped)?;
        rx.await.map_err(|_| ServiceError::ServiceStopped)
    }

    /// The platform's foreground time limit ran out
    pub fn timeout(&self) -> Result<()> {
        self.messages
            .send(ServiceMessage::Timeout)
            .map_err(|_| ServiceError::ServiceStopped)
    }

    pub fn lifecycle(&self) -> ServiceLifecycle {
        *self.lifecycle.borrow()
    }

    pub fn watch_lifecycle(&self) -> watch::Receiver<ServiceLifecycle> {
        self.lifecycle.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.lifecycle().is_stopped()
    }

    pub fn current_call_id(&self) -> Option<CallId> {
        self.current_call.borrow().clone()
    }

    /// Raised by observers when the call reached a state that ends the service
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_signal.clone()
    }

    /// Resolves once the instance reached [`ServiceLifecycle::Stopped`]
    pub async fn wait_stopped(&self) {
        let mut lifecycle = self.lifecycle.clone();
        // An error means the worker is gone, which only happens after stopping
        let _ = lifecycle.wait_for(|l| l.is_stopped()).await;
    }
}
