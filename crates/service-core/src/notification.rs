//! Notification resolution per trigger

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::client::{Call, NotificationSource};
use crate::model::{CallId, Notification, NotificationKind, RingingState, Trigger};
use crate::profile::ServiceClass;

/// Notification to show for a trigger and the id to show it under.
///
/// `notification == None` is a meaningful answer: the trigger has nothing
/// to render (a removal, for instance). The id is still the one a stale
/// notification would have been posted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDescriptor {
    pub notification: Option<Notification>,
    pub notification_id: i32,
}

impl NotificationDescriptor {
    pub fn new(notification: Option<Notification>, notification_id: i32) -> Self {
        Self {
            notification,
            notification_id,
        }
    }
}

/// Resolves `(notification, id)` for a trigger
#[derive(Clone)]
pub struct ServiceNotificationRetriever {
    source: Arc<dyn NotificationSource>,
}

impl ServiceNotificationRetriever {
    pub fn new(source: Arc<dyn NotificationSource>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &Arc<dyn NotificationSource> {
        &self.source
    }

    /// Resolve the notification for a trigger.
    ///
    /// Prefers the id already recorded on the call so that successive
    /// triggers keep updating the same notification.
    pub fn retrieve(
        &self,
        service_class: ServiceClass,
        trigger: Trigger,
        call: &dyn Call,
        call_id: &CallId,
        display_name: Option<&str>,
    ) -> NotificationDescriptor {
        let recorded = call.notification_id();
        let id_for = |kind: NotificationKind| recorded.unwrap_or_else(|| call_id.notification_id(kind));

        let descriptor = match trigger {
            Trigger::OnGoingCall if service_class == ServiceClass::LivestreamViewer => {
                // Viewers get a playback-style notification keyed by the call alone
                let notification = self.source.ongoing_call_notification(call_id, display_name, false, 0);
                NotificationDescriptor::new(notification, recorded.unwrap_or_else(|| call_id.stable_hash()))
            }
            Trigger::OnGoingCall | Trigger::ShareScreen => {
                let remote = call.snapshot().borrow().remote_participants.len();
                let notification = self.source.ongoing_call_notification(call_id, display_name, false, remote);
                NotificationDescriptor::new(notification, id_for(NotificationKind::Ongoing))
            }
            Trigger::IncomingCall => {
                let notification = self.source.ringing_call_notification(
                    RingingState::Incoming { accepted_by_me: false },
                    call_id,
                    display_name,
                    true,
                );
                NotificationDescriptor::new(notification, id_for(NotificationKind::Incoming))
            }
            Trigger::OutgoingCall => {
                let notification = self.source.ringing_call_notification(
                    RingingState::Outgoing { accepted_by_callee: false },
                    call_id,
                    display_name,
                    true,
                );
                NotificationDescriptor::new(notification, id_for(NotificationKind::Outgoing))
            }
            Trigger::RemoveIncomingCall => {
                NotificationDescriptor::new(None, call_id.notification_id(NotificationKind::Incoming))
            }
            Trigger::None => NotificationDescriptor::new(None, call_id.stable_hash()),
        };

        debug!(
            "Resolved notification (call_id: {}, trigger: {}, notification_id: {}, has_notification: {})",
            call_id,
            trigger,
            descriptor.notification_id,
            descriptor.notification.is_some(),
        );
        descriptor
    }
}

/// Notification source producing plain notifications on fixed channels
#[derive(Debug, Clone, Default)]
pub struct DefaultNotificationSource;

impl DefaultNotificationSource {
    pub const INCOMING_CHANNEL: &'static str = "incoming_calls";
    pub const OUTGOING_CHANNEL: &'static str = "outgoing_calls";
    pub const ONGOING_CHANNEL: &'static str = "ongoing_calls";
    pub const SETUP_CHANNEL: &'static str = "call_setup";
}

#[async_trait]
impl NotificationSource for DefaultNotificationSource {
    fn ongoing_call_notification(
        &self,
        call_id: &CallId,
        display_name: Option<&str>,
        is_outgoing: bool,
        remote_participant_count: usize,
    ) -> Option<Notification> {
        let title = display_name.map(str::to_string).unwrap_or_else(|| call_id.cid());
        let body = if is_outgoing {
            "Calling...".to_string()
        } else {
            match remote_participant_count {
                0 => "Waiting for others to join".to_string(),
                1 => "Call in progress".to_string(),
                n => format!("{} people in the call", n + 1),
            }
        };
        Some(Notification::new(Self::ONGOING_CHANNEL, title).with_body(body).ongoing())
    }

    fn ringing_call_notification(
        &self,
        ringing_state: RingingState,
        call_id: &CallId,
        display_name: Option<&str>,
        _with_content_intent: bool,
    ) -> Option<Notification> {
        let title = display_name.map(str::to_string).unwrap_or_else(|| call_id.cid());
        match ringing_state {
            RingingState::Incoming { .. } => Some(
                Notification::new(Self::INCOMING_CHANNEL, title)
                    .with_body("Incoming call")
                    .full_screen(),
            ),
            RingingState::Outgoing { .. } => Some(
                Notification::new(Self::OUTGOING_CHANNEL, title)
                    .with_body("Calling...")
                    .ongoing(),
            ),
            _ => None,
        }
    }

    fn setting_up_notification(&self) -> Option<Notification> {
        Some(Notification::new(Self::SETUP_CHANNEL, "Setting up the call").ongoing())
    }

    async fn on_call_notification_update(&self, call: Arc<dyn Call>) -> Option<Notification> {
        let snapshot = call.snapshot().borrow().clone();
        let call_id = call.id().clone();
        match snapshot.ringing_state {
            RingingState::Active => {
                self.ongoing_call_notification(&call_id, None, false, snapshot.remote_participants.len())
            }
            state @ (RingingState::Incoming { .. } | RingingState::Outgoing { .. }) => {
                self.ringing_call_notification(state, &call_id, None, true)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimCall;

    fn retriever() -> ServiceNotificationRetriever {
        ServiceNotificationRetriever::new(Arc::new(DefaultNotificationSource))
    }

    fn call() -> (CallId, Arc<SimCall>) {
        let id = CallId::new("default", "test-call-123");
        (id.clone(), SimCall::new(id, "me"))
    }

    #[test]
    fn ongoing_uses_kind_hash_without_recorded_id() {
        let (id, call) = call();
        let d = retriever().retrieve(ServiceClass::Call, Trigger::OnGoingCall, call.as_ref(), &id, None);
        assert!(d.notification.is_some());
        assert_eq!(d.notification_id, id.notification_id(NotificationKind::Ongoing));
    }

    #[test]
    fn recorded_id_is_preferred() {
        let (id, call) = call();
        call.set_notification_id(7);
        let d = retriever().retrieve(ServiceClass::Call, Trigger::OutgoingCall, call.as_ref(), &id, None);
        assert_eq!(d.notification_id, 7);
        let d = retriever().retrieve(ServiceClass::Call, Trigger::IncomingCall, call.as_ref(), &id, Some("Bob"));
        assert_eq!(d.notification_id, 7);
        assert_eq!(d.notification.map(|n| n.title), Some("Bob".to_string()));
    }

    #[test]
    fn incoming_is_full_screen() {
        let (id, call) = call();
        let d = retriever().retrieve(ServiceClass::Call, Trigger::IncomingCall, call.as_ref(), &id, None);
        assert!(d.notification.unwrap().full_screen);
        assert_eq!(d.notification_id, id.notification_id(NotificationKind::Incoming));
    }

    #[test]
    fn remove_is_a_signal_with_incoming_id() {
        let (id, call) = call();
        call.set_notification_id(99);
        let d = retriever().retrieve(ServiceClass::Call, Trigger::RemoveIncomingCall, call.as_ref(), &id, None);
        assert_eq!(d, NotificationDescriptor::new(None, id.notification_id(NotificationKind::Incoming)));
    }

    #[test]
    fn none_trigger_uses_call_hash() {
        let (id, call) = call();
        let d = retriever().retrieve(ServiceClass::Call, Trigger::None, call.as_ref(), &id, None);
        assert_eq!(d, NotificationDescriptor::new(None, id.stable_hash()));
    }

    #[test]
    fn viewer_ongoing_keyed_by_call() {
        let (id, call) = call();
        let d = retriever().retrieve(ServiceClass::LivestreamViewer, Trigger::OnGoingCall, call.as_ref(), &id, None);
        assert!(d.notification.is_some());
        assert_eq!(d.notification_id, id.stable_hash());
    }
}
