//! Decides how an incoming call is surfaced to the user

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::client::CallClient;
use crate::config::CallServiceConfig;
use crate::errors::Result;
use crate::intent::ServiceIntentBuilder;
use crate::model::{CallId, Notification, NotificationKind, Trigger};
use crate::platform::{NotificationManager, ServiceHost};

/// Outcome of surfacing an incoming call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShowIncomingCallResult {
    /// A foreground service was started for the call
    PromotedToForeground,
    /// A regular service was started; it promotes itself later
    StartedBackgroundService,
    /// Only a notification was posted
    NotificationOnly,
    /// Nothing could be shown
    Error,
}

impl fmt::Display for ShowIncomingCallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PromotedToForeground => "promoted_to_foreground",
            Self::StartedBackgroundService => "started_background_service",
            Self::NotificationOnly => "notification_only",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Incoming call decision tree.
///
/// Foreground promotion is tried first whenever no other call is active,
/// because a notification without a live foreground process can be killed
/// before the user reacts. Posting only the notification is the last resort.
pub struct IncomingCallPresenter {
    client: Arc<dyn CallClient>,
    host: Arc<dyn ServiceHost>,
    notifications: Arc<dyn NotificationManager>,
    intents: ServiceIntentBuilder,
}

impl IncomingCallPresenter {
    pub fn new(
        client: Arc<dyn CallClient>,
        host: Arc<dyn ServiceHost>,
        notifications: Arc<dyn NotificationManager>,
    ) -> Self {
        let intents = ServiceIntentBuilder::new(host.clone());
        Self {
            client,
            host,
            notifications,
            intents,
        }
    }

    pub fn show_incoming_call(
        &self,
        call_id: &CallId,
        display_name: Option<&str>,
        config: &CallServiceConfig,
        notification: Option<&Notification>,
    ) -> ShowIncomingCallResult {
        match self.try_show(call_id, display_name, config, notification) {
            Ok(result) => {
                info!("Incoming call shown (call_id: {}, result: {})", call_id, result);
                result
            }
            Err(e) => {
                warn!(
                    "Starting the service failed, posting notification only (call_id: {}, error: {})",
                    call_id,
                    e,
                );
                self.notify_only(call_id, notification)
            }
        }
    }

    fn try_show(
        &self,
        call_id: &CallId,
        display_name: Option<&str>,
        config: &CallServiceConfig,
        notification: Option<&Notification>,
    ) -> Result<ShowIncomingCallResult> {
        let command = self
            .intents
            .build_start_command(call_id, Trigger::IncomingCall, display_name, config)?;

        if self.client.active_call().is_none() {
            self.host.start_foreground_service(command)?;
            return Ok(ShowIncomingCallResult::PromotedToForeground);
        }

        if self.intents.is_service_running(config.service_class) {
            // A busy instance keeps its current call; the new one rings as a notification
            debug!(
                "Service already running, posting notification only (call_id: {}, service: {})",
                call_id,
                config.service_class,
            );
            return Ok(self.notify_only(call_id, notification));
        }

        self.host.start_service(command)?;
        Ok(ShowIncomingCallResult::StartedBackgroundService)
    }

    fn notify_only(&self, call_id: &CallId, notification: Option<&Notification>) -> ShowIncomingCallResult {
        let Some(notification) = notification else {
            error!("No notification to post (call_id: {})", call_id);
            return ShowIncomingCallResult::Error;
        };
        if !self.notifications.has_post_permission() {
            error!("Notification permission missing (call_id: {})", call_id);
            return ShowIncomingCallResult::Error;
        }
        let id = call_id.notification_id(NotificationKind::Incoming);
        match self.notifications.notify(id, notification) {
            Ok(()) => ShowIncomingCallResult::NotificationOnly,
            Err(e) => {
                warn!("Posting notification failed (call_id: {}, error: {})", call_id, e);
                ShowIncomingCallResult::NotificationOnly
            }
        }
    }
}

impl ShowIncomingCallResult {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Whether a service instance now handles the call
    pub fn started_service(&self) -> bool {
        matches!(self, Self::PromotedToForeground | Self::StartedBackgroundService)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Call;
    use crate::config::ServiceSettings;
    use crate::intent::ServiceCommand;
    use crate::profile::ServiceClass;
    use crate::sim::{PlatformEvent, SimEnvironment};

    fn setup() -> (SimEnvironment, IncomingCallPresenter) {
        let env = SimEnvironment::new("me", ServiceSettings::default());
        let presenter = IncomingCallPresenter::new(env.client.clone(), env.host.clone(), env.platform.notifications.clone());
        (env, presenter)
    }

    fn ringing() -> Notification {
        Notification::new("incoming_calls", "Bob").full_screen()
    }

    /// Make another call active and keep a service instance busy with it
    async fn busy_with_other_call(env: &SimEnvironment) {
        let other = CallId::new("default", "other");
        env.client.set_active_call(Some(&other));
        env.host
            .start_foreground_service(ServiceCommand::start(ServiceClass::Call, other, Trigger::OnGoingCall))
            .unwrap();
        env.host.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_active_call_promotes_to_foreground() {
        let (env, presenter) = setup();
        let id = CallId::new("default", "c1");

        let result = presenter.show_incoming_call(&id, Some("Bob"), &CallServiceConfig::default(), Some(&ringing()));
        env.host.settle().await;

        assert_eq!(result, ShowIncomingCallResult::PromotedToForeground);
        assert!(env
            .log()
            .contains(|e| matches!(e, PlatformEvent::ServiceStarted { foreground: true, .. })));
        let call = env.client.sim_call(&id);
        assert_eq!(call.notification_id(), Some(id.notification_id(NotificationKind::Incoming)));
    }

    #[tokio::test(start_paused = true)]
    async fn busy_class_posts_notification_only() {
        let (env, presenter) = setup();
        busy_with_other_call(&env).await;
        let id = CallId::new("default", "c1");

        let result = presenter.show_incoming_call(&id, Some("Bob"), &CallServiceConfig::default(), Some(&ringing()));

        assert_eq!(result, ShowIncomingCallResult::NotificationOnly);
        assert!(env
            .platform
            .notifications
            .is_posted(id.notification_id(NotificationKind::Incoming)));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_class_starts_background_service() {
        let (env, presenter) = setup();
        env.client.set_active_call(Some(&CallId::new("livestream", "other")));
        let config = CallServiceConfig::builder()
            .with_service_class(ServiceClass::AudioCall)
            .build();

        let result = presenter.show_incoming_call(&CallId::new("audio_call", "c1"), None, &config, Some(&ringing()));

        assert_eq!(result, ShowIncomingCallResult::StartedBackgroundService);
        assert!(env
            .log()
            .contains(|e| matches!(e, PlatformEvent::ServiceStarted { foreground: false, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_falls_back_to_notification() {
        let (env, presenter) = setup();
        env.host.forbid_foreground_start(true);

        let result = presenter.show_incoming_call(
            &CallId::new("default", "c1"),
            None,
            &CallServiceConfig::default(),
            Some(&ringing()),
        );

        assert_eq!(result, ShowIncomingCallResult::NotificationOnly);
    }

    #[tokio::test(start_paused = true)]
    async fn error_only_without_notification_or_permission() {
        let (env, presenter) = setup();
        let id = CallId::new("default", "c1");
        let config = CallServiceConfig::default();
        env.host.forbid_foreground_start(true);

        assert_eq!(
            presenter.show_incoming_call(&id, None, &config, None),
            ShowIncomingCallResult::Error
        );

        env.platform.notifications.set_post_permission(false);
        assert_eq!(
            presenter.show_incoming_call(&id, None, &config, Some(&ringing())),
            ShowIncomingCallResult::Error
        );

        // Starting succeeds: a missing notification is not an error on this path
        env.host.forbid_foreground_start(false);
        assert_eq!(
            presenter.show_incoming_call(&id, None, &config, None),
            ShowIncomingCallResult::PromotedToForeground
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_running_query_assumes_running() {
        let (env, presenter) = setup();
        env.client.set_active_call(Some(&CallId::new("default", "other")));
        env.host.fail_running_query(true);

        let result = presenter.show_incoming_call(
            &CallId::new("default", "c1"),
            None,
            &CallServiceConfig::default(),
            Some(&ringing()),
        );

        assert_eq!(result, ShowIncomingCallResult::NotificationOnly);
        assert!(!env.log().contains(|e| matches!(e, PlatformEvent::ServiceStarted { .. })));
    }
}
