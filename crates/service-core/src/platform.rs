//! Narrow interfaces over the OS primitives the call service drives
//!
//! Every trait here stands for one platform facility. Implementations are
//! injected into the launcher and the service at construction time; the
//! [`sim`](crate::sim) module provides in-memory ones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::client::Call;
use crate::errors::Result;
use crate::intent::ServiceCommand;
use crate::model::{Notification, Permission, PermissionCheck};
use crate::profile::{ForegroundServiceTypes, ServiceClass};

/// Starts background execution units and reports which ones are running
pub trait ServiceHost: Send + Sync {
    /// Service classes with a live instance
    fn running_services(&self) -> Result<Vec<ServiceClass>>;

    /// Start a unit that must promote itself to foreground promptly
    fn start_foreground_service(&self, command: ServiceCommand) -> Result<()>;

    /// Start (or deliver a command to) a regular background unit
    fn start_service(&self, command: ServiceCommand) -> Result<()>;
}

/// System notification manager
pub trait NotificationManager: Send + Sync {
    fn notify(&self, id: i32, notification: &Notification) -> Result<()>;

    fn cancel(&self, id: i32);

    /// Whether the app may post notifications at all
    fn has_post_permission(&self) -> bool;
}

/// Foreground controls of one service instance
pub trait ForegroundController: Send + Sync {
    fn start_foreground(&self, id: i32, notification: &Notification, types: ForegroundServiceTypes) -> Result<()>;

    fn stop_foreground(&self);

    /// Terminate the service instance
    fn stop_self(&self);
}

/// Which ringtone a sound player plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sound {
    Incoming,
    Outgoing,
}

/// Ringtone playback and vibration
pub trait SoundPlayer: Send + Sync {
    fn play(&self, sound: Sound, play_if_muted: bool);

    fn stop(&self);

    fn vibrate(&self);

    fn release(&self);
}

/// Screen on/off/unlock broadcast receiver.
///
/// Registering twice or unregistering an unregistered receiver is an error
/// on the platform; use [`ReceiverGuard`] to keep both idempotent.
pub trait ScreenStateReceiver: Send + Sync {
    fn register(&self) -> Result<()>;

    fn unregister(&self) -> Result<()>;
}

/// Runtime permission checks
pub trait PermissionChecker: Send + Sync {
    /// Check the permissions `call` needs; `required` is already narrowed to
    /// the call's capabilities
    fn check_permissions(&self, call: &dyn Call, required: &[Permission]) -> PermissionCheck;

    /// Permissions currently granted to the app
    fn granted(&self) -> Vec<Permission>;
}

/// Idempotent registration wrapper around a [`ScreenStateReceiver`]
pub struct ReceiverGuard {
    receiver: Arc<dyn ScreenStateReceiver>,
    registered: AtomicBool,
}

impl ReceiverGuard {
    pub fn new(receiver: Arc<dyn ScreenStateReceiver>) -> Self {
        Self {
            receiver,
            registered: AtomicBool::new(false),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    pub fn register(&self) {
        if self
            .registered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Screen state receiver already registered");
            return;
        }
        if let Err(e) = self.receiver.register() {
            warn!("Failed to register screen state receiver: {}", e);
            self.registered.store(false, Ordering::SeqCst);
        }
    }

    pub fn unregister(&self) {
        if !self.registered.swap(false, Ordering::SeqCst) {
            debug!("Screen state receiver not registered");
            return;
        }
        if let Err(e) = self.receiver.unregister() {
            warn!("Failed to unregister screen state receiver: {}", e);
        }
    }
}

/// Platform facilities one service instance works with
#[derive(Clone)]
pub struct PlatformServices {
    pub notifications: Arc<dyn NotificationManager>,
    pub foreground: Arc<dyn ForegroundController>,
    pub sound: Arc<dyn SoundPlayer>,
    pub screen_receiver: Arc<dyn ScreenStateReceiver>,
    pub permissions: Arc<dyn PermissionChecker>,
}
