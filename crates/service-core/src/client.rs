//! Collaborator contracts the service layer consumes
//!
//! The call object, the client that owns calls and the notification
//! source all live outside this crate. They are passed in explicitly;
//! nothing here looks them up from global state.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::{broadcast, watch};

use crate::errors::Result;
use crate::model::{CallEvent, CallId, CallSnapshot, ConnectionState, Notification, RejectReason, RingingState};

/// A call as seen by the service layer
#[async_trait]
pub trait Call: Send + Sync {
    fn id(&self) -> &CallId;

    /// Fetch the call's state from the backend
    async fn get(&self) -> Result<()>;

    async fn join(&self) -> Result<()>;

    async fn accept(&self) -> Result<()>;

    async fn reject(&self, reason: RejectReason, source: &str) -> Result<()>;

    async fn leave(&self, reason: &str) -> Result<()>;

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<()>;

    fn microphone_enabled(&self) -> bool;

    fn ringing_state(&self) -> watch::Receiver<RingingState>;

    fn events(&self) -> broadcast::Receiver<CallEvent>;

    fn connection_state(&self) -> watch::Receiver<ConnectionState>;

    fn snapshot(&self) -> watch::Receiver<CallSnapshot>;

    fn has_capability(&self, capability: &str) -> bool;

    /// Notification id previously recorded for this call
    fn notification_id(&self) -> Option<i32>;

    fn set_notification_id(&self, id: i32);

    /// User id of the call creator, when known
    fn created_by(&self) -> Option<String>;

    fn member_count(&self) -> usize;
}

/// The client owning every call of the current user
#[async_trait]
pub trait CallClient: Send + Sync {
    fn user_id(&self) -> String;

    /// Call object for an id, created on first use
    fn call(&self, id: &CallId) -> Arc<dyn Call>;

    fn active_call(&self) -> Option<Arc<dyn Call>>;

    fn ringing_call(&self) -> Option<Arc<dyn Call>>;

    fn add_ringing_call(&self, call: Arc<dyn Call>);

    fn remove_ringing_call(&self, id: &CallId);

    /// Open the realtime connection unless it is already up
    async fn connect_if_not_connected(&self) -> Result<()>;

    /// Release client-side resources held for a call
    fn on_call_clean_up(&self, id: &CallId);
}

/// Produces the notifications the service posts
#[async_trait]
pub trait NotificationSource: Send + Sync {
    fn ongoing_call_notification(
        &self,
        call_id: &CallId,
        display_name: Option<&str>,
        is_outgoing: bool,
        remote_participant_count: usize,
    ) -> Option<Notification>;

    fn ringing_call_notification(
        &self,
        ringing_state: RingingState,
        call_id: &CallId,
        display_name: Option<&str>,
        with_content_intent: bool,
    ) -> Option<Notification>;

    /// Placeholder shown while the service is still resolving the call
    fn setting_up_notification(&self) -> Option<Notification>;

    /// Fresh notification after the call's state changed
    async fn on_call_notification_update(&self, call: Arc<dyn Call>) -> Option<Notification>;

    /// Custom stream of refresh triggers; `None` uses the default triggers
    fn update_triggers(&self, _call: Arc<dyn Call>) -> Option<BoxStream<'static, ()>> {
        None
    }
}
