use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::DisconnectCause;
use crate::errors::Result;

/// What the system call UI shows for a registered call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallAttributes {
    pub display_name: String,
    pub address: String,
    pub incoming: bool,
    pub video: bool,
}

/// Actions the system call UI (or a paired device) takes on a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformCallEvent {
    Answer { video: bool },
    Reject,
    SetActive,
    SetInactive,
    Disconnect { cause: DisconnectCause },
}

/// Entry point of the platform call-management API
#[async_trait]
pub trait CallsManager: Send + Sync {
    /// Whether the app may register calls at all
    fn can_use_telecom(&self) -> bool;

    /// Register a call. System-originated actions arrive on `events` until
    /// the call is disconnected.
    async fn add_call(
        &self,
        attributes: CallAttributes,
        events: mpsc::UnboundedSender<PlatformCallEvent>,
    ) -> Result<Arc<dyn CallControl>>;
}

/// Control surface of one registered call
#[async_trait]
pub trait CallControl: Send + Sync {
    async fn answer(&self, video: bool) -> Result<()>;

    async fn set_active(&self) -> Result<()>;

    async fn set_inactive(&self) -> Result<()>;

    async fn disconnect(&self, cause: DisconnectCause) -> Result<()>;
}
