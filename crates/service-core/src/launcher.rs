//! Entry points callers use to surface, update and stop call services
//!
//! The launcher resolves the [`CallServiceConfig`] for the call's type,
//! turns the request into a platform command and, when enabled, registers
//! the call with the platform telephony subsystem.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::client::{Call, CallClient, NotificationSource};
use crate::config::{CallServiceConfig, CallServiceConfigRegistry, ServiceSettings};
use crate::errors::Result;
use crate::intent::ServiceIntentBuilder;
use crate::model::{CallId, NotificationKind, Trigger};
use crate::notification::ServiceNotificationRetriever;
use crate::platform::{NotificationManager, ServiceHost};
use crate::presenter::{IncomingCallPresenter, ShowIncomingCallResult};
use crate::scope::ServiceScope;
use crate::telecom::{CallsManager, DisconnectCause, TelecomAction, TelecomBridge, TelecomCallState};

/// Why a caller asks for the service to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopForegroundServiceSource {
    CallAccept,
    RemoveActiveCall,
    RemoveRingingCall,
    SetActiveCall,
}

impl StopForegroundServiceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallAccept => "accept the call",
            Self::RemoveActiveCall => "remove active call",
            Self::RemoveRingingCall => "remove ringing call",
            Self::SetActiveCall => "set active call",
        }
    }
}

impl fmt::Display for StopForegroundServiceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decision layer in front of the service host
pub struct ServiceLauncher {
    client: Arc<dyn CallClient>,
    host: Arc<dyn ServiceHost>,
    notifications: Arc<dyn NotificationManager>,
    retriever: ServiceNotificationRetriever,
    intents: ServiceIntentBuilder,
    presenter: IncomingCallPresenter,
    registry: CallServiceConfigRegistry,
    settings: ServiceSettings,
    telecom: Option<Arc<dyn CallsManager>>,
    bridges: Arc<DashMap<CallId, Arc<TelecomBridge>>>,
    tasks: ServiceScope,
}

impl ServiceLauncher {
    pub fn new(
        client: Arc<dyn CallClient>,
        host: Arc<dyn ServiceHost>,
        notifications: Arc<dyn NotificationManager>,
        notification_source: Arc<dyn NotificationSource>,
        registry: CallServiceConfigRegistry,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            presenter: IncomingCallPresenter::new(client.clone(), host.clone(), notifications.clone()),
            intents: ServiceIntentBuilder::new(host.clone()),
            retriever: ServiceNotificationRetriever::new(notification_source),
            client,
            host,
            notifications,
            registry,
            settings,
            telecom: None,
            bridges: Arc::new(DashMap::new()),
            tasks: ServiceScope::new("service-launcher"),
        }
    }

    /// Register calls with the platform telephony subsystem when their config enables it
    pub fn with_telecom(mut self, manager: Arc<dyn CallsManager>) -> Self {
        self.telecom = Some(manager);
        self
    }

    pub fn registry(&self) -> &CallServiceConfigRegistry {
        &self.registry
    }

    /// Telephony bridge of a call, if it was ever registered
    pub fn telecom_bridge(&self, call_id: &CallId) -> Option<Arc<TelecomBridge>> {
        self.bridges.get(call_id).map(|b| b.clone())
    }

    fn config_for(&self, call_id: &CallId) -> Result<CallServiceConfig> {
        self.registry.get(&call_id.call_type)
    }

    /// Surface an incoming call
    pub async fn show_incoming_call(
        &self,
        call_id: &CallId,
        display_name: Option<&str>,
        is_video: bool,
    ) -> Result<ShowIncomingCallResult> {
        let config = self.config_for(call_id)?;
        let call = self.client.call(call_id);
        let notification = self
            .retriever
            .retrieve(config.service_class, Trigger::IncomingCall, call.as_ref(), call_id, display_name)
            .notification;

        let result = self
            .presenter
            .show_incoming_call(call_id, display_name, &config, notification.as_ref());
        if !result.is_error() {
            self.register_telecom(&config, call, display_name, true, is_video).await;
        }
        Ok(result)
    }

    /// Promote the service for a joined call (`OnGoingCall` or `ShareScreen`)
    pub fn show_on_going_call(&self, call_id: &CallId, trigger: Trigger) -> Result<()> {
        let config = self.config_for(call_id)?;
        if !config.run_in_foreground {
            debug!("Foreground disabled for call type, skipping (call_id: {})", call_id);
            return Ok(());
        }
        let command = self.intents.build_start_command(call_id, trigger, None, &config)?;
        self.host.start_foreground_service(command)?;
        info!("Service started (call_id: {}, trigger: {})", call_id, trigger);
        Ok(())
    }

    /// Promote the service for a call this user is placing.
    ///
    /// With telephony enabled, the registered call is activated
    /// `telecom_activation_delay` after registration completed.
    pub async fn show_outgoing_call(&self, call_id: &CallId, display_name: Option<&str>, is_video: bool) -> Result<()> {
        let config = self.config_for(call_id)?;
        if !config.run_in_foreground {
            debug!("Foreground disabled for call type, skipping (call_id: {})", call_id);
            return Ok(());
        }
        let command = self
            .intents
            .build_start_command(call_id, Trigger::OutgoingCall, display_name, &config)?;
        self.host.start_foreground_service(command)?;
        info!("Service started (call_id: {})", call_id);

        let call = self.client.call(call_id);
        if let Some(bridge) = self.register_telecom(&config, call, display_name, false, is_video).await {
            let delay = self.settings.telecom_activation_delay;
            let call_id = call_id.clone();
            self.tasks.spawn("telecom_activation", async move {
                tokio::time::sleep(delay).await;
                if !bridge.state().is_registered() {
                    debug!("Registration gone before activation (call_id: {})", call_id);
                    return Ok(());
                }
                bridge.process_action(TelecomAction::Activate).await
            });
        }
        Ok(())
    }

    /// Withdraw an incoming call.
    ///
    /// When the service cannot be reached, the incoming notification is
    /// cancelled directly.
    pub fn remove_incoming_call(&self, call_id: &CallId) -> Result<()> {
        let config = self.config_for(call_id)?;
        let command = self
            .intents
            .build_start_command(call_id, Trigger::RemoveIncomingCall, None, &config)?;
        if let Err(e) = self.host.start_service(command) {
            warn!("Service unreachable, cancelling notification (call_id: {}, error: {})", call_id, e);
            self.notifications
                .cancel(call_id.notification_id(NotificationKind::Incoming));
        }
        Ok(())
    }

    /// Ask the service serving a call to stop.
    ///
    /// Fails with [`ServiceError::ServiceNotRunning`](crate::errors::ServiceError::ServiceNotRunning)
    /// when no instance of the configured class is running.
    pub async fn stop_service(&self, call_id: &CallId, source: StopForegroundServiceSource) -> Result<()> {
        info!("Stop requested (call_id: {}, source: {})", call_id, source);
        if source == StopForegroundServiceSource::RemoveActiveCall {
            if let Some((_, bridge)) = self.bridges.remove(call_id) {
                if bridge.state().is_registered() {
                    if let Err(e) = bridge
                        .process_action(TelecomAction::Disconnect {
                            cause: DisconnectCause::Local,
                        })
                        .await
                    {
                        warn!("Telecom disconnect failed (call_id: {}, error: {})", call_id, e);
                    }
                }
            }
        }
        let config = self.config_for(call_id)?;
        let command = self.intents.build_stop_command(Some(call_id), &config)?;
        self.host.start_service(command)
    }

    async fn register_telecom(
        &self,
        config: &CallServiceConfig,
        call: Arc<dyn Call>,
        display_name: Option<&str>,
        incoming: bool,
        video: bool,
    ) -> Option<Arc<TelecomBridge>> {
        if !config.enable_telecom {
            return None;
        }
        let manager = self.telecom.clone()?;
        let call_id = call.id().clone();
        if !manager.can_use_telecom() {
            debug!("Telecom unavailable (call_id: {})", call_id);
            return None;
        }

        self.bridges
            .retain(|id, bridge| *id == call_id || bridge.state().is_registered());
        if self.bridges.iter().any(|entry| *entry.key() != call_id) {
            error!("There cannot be more than one call at the same time (call_id: {})", call_id);
            return None;
        }

        let bridge = self
            .bridges
            .entry(call_id.clone())
            .or_insert_with(|| TelecomBridge::new(call.clone(), manager))
            .clone();
        let name = display_name.map(str::to_string).unwrap_or_else(|| call_id.cid());
        match bridge.register(&name, &call_id.cid(), incoming, video).await {
            Ok(()) => {
                self.forget_when_disconnected(call_id, bridge.clone());
                Some(bridge)
            }
            Err(e) => {
                warn!("Registration failed (call_id: {}, error: {})", call_id, e);
                None
            }
        }
    }

    /// Drop the map entry once the OS side of the call is gone
    fn forget_when_disconnected(&self, call_id: CallId, bridge: Arc<TelecomBridge>) {
        let bridges = self.bridges.clone();
        let mut state = bridge.watch_state();
        self.tasks.spawn("telecom_cleanup", async move {
            loop {
                let current = *state.borrow_and_update();
                if matches!(current, TelecomCallState::Disconnected { .. }) {
                    break;
                }
                if state.changed().await.is_err() {
                    return Ok(());
                }
            }
            if bridges.remove_if(&call_id, |_, b| Arc::ptr_eq(b, &bridge)).is_some() {
                debug!("Telecom registration released (call_id: {})", call_id);
            }
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::CallServiceConfig;
    use crate::errors::ServiceError;
    use crate::profile::ServiceClass;
    use crate::sim::{PlatformEvent, SimEnvironment};
    use crate::telecom::TelecomCallState;

    fn launcher(env: &SimEnvironment, registry: CallServiceConfigRegistry) -> ServiceLauncher {
        ServiceLauncher::new(
            env.client.clone(),
            env.host.clone(),
            env.platform.notifications.clone(),
            env.notification_source.clone(),
            registry,
            ServiceSettings::default(),
        )
        .with_telecom(env.calls_manager.clone())
    }

    fn started(event: &PlatformEvent) -> bool {
        matches!(event, PlatformEvent::ServiceStarted { .. })
    }

    #[tokio::test(start_paused = true)]
    async fn ongoing_without_foreground_issues_nothing() {
        let env = SimEnvironment::new("me", ServiceSettings::default());
        let registry = CallServiceConfigRegistry::default();
        registry.update("default", |b| b.with_run_in_foreground(false));
        let launcher = launcher(&env, registry);

        launcher
            .show_on_going_call(&CallId::new("default", "c1"), Trigger::OnGoingCall)
            .unwrap();
        env.host.settle().await;

        assert!(!env.log().contains(started));
    }

    #[tokio::test(start_paused = true)]
    async fn ongoing_starts_foreground_service() {
        let env = SimEnvironment::new("me", ServiceSettings::default());
        let launcher = launcher(&env, CallServiceConfigRegistry::default());
        let id = CallId::new("default", "c1");

        launcher.show_on_going_call(&id, Trigger::OnGoingCall).unwrap();
        env.host.settle().await;

        assert!(env.log().contains(|e| matches!(
            e,
            PlatformEvent::ServiceStarted { foreground: true, command } if command.trigger == Some(Trigger::OnGoingCall)
        )));
        let service = env.host.service(ServiceClass::Call).unwrap();
        assert_eq!(service.current_call_id(), Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_for_stopped_class_is_loud() {
        let env = SimEnvironment::new("me", ServiceSettings::default());
        let launcher = launcher(&env, CallServiceConfigRegistry::default());

        let err = launcher
            .stop_service(&CallId::new("default", "c1"), StopForegroundServiceSource::RemoveActiveCall)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ServiceNotRunning { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_call_type_without_fallback_fails() {
        let env = SimEnvironment::new("me", ServiceSettings::default());
        let launcher = launcher(&env, CallServiceConfigRegistry::empty());

        let err = launcher
            .show_incoming_call(&CallId::new("default", "c1"), None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ConfigNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn remove_falls_back_to_cancelling_notification() {
        let env = SimEnvironment::new("me", ServiceSettings::default());
        let launcher = launcher(&env, CallServiceConfigRegistry::default());
        let id = CallId::new("default", "c1");
        env.host.forbid_background_start(true);

        launcher.remove_incoming_call(&id).unwrap();

        let incoming_id = id.notification_id(NotificationKind::Incoming);
        assert!(env
            .log()
            .contains(|e| *e == PlatformEvent::Cancelled { id: incoming_id }));
    }

    #[tokio::test(start_paused = true)]
    async fn outgoing_call_activates_after_delay() {
        let env = SimEnvironment::new("me", ServiceSettings::default());
        let registry = CallServiceConfigRegistry::default();
        registry.register("default", CallServiceConfig::builder().with_telecom(true).build());
        let launcher = launcher(&env, registry);
        let id = CallId::new("default", "c1");

        launcher.show_outgoing_call(&id, Some("Alice"), false).await.unwrap();
        let bridge = launcher.telecom_bridge(&id).unwrap();
        assert!(matches!(bridge.state(), TelecomCallState::Registered { incoming: false, .. }));

        tokio::time::sleep(Duration::from_millis(1_900)).await;
        assert!(!env.log().contains(|e| *e == PlatformEvent::TelecomActivated));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(env.log().contains(|e| *e == PlatformEvent::TelecomActivated));
        assert_eq!(bridge.state(), TelecomCallState::Active { muted: false });
    }

    #[tokio::test(start_paused = true)]
    async fn second_telecom_registration_is_refused() {
        let env = SimEnvironment::new("me", ServiceSettings::default());
        let registry = CallServiceConfigRegistry::default();
        registry.register("default", CallServiceConfig::builder().with_telecom(true).build());
        let launcher = launcher(&env, registry);
        let first = CallId::new("default", "c1");
        let second = CallId::new("default", "c2");

        launcher.show_incoming_call(&first, Some("Bob"), false).await.unwrap();
        env.host.settle().await;
        launcher.show_incoming_call(&second, Some("Carol"), false).await.unwrap();

        assert!(launcher.telecom_bridge(&first).is_some());
        assert!(launcher.telecom_bridge(&second).is_none());
        assert_eq!(
            env.log()
                .count(|e| matches!(e, PlatformEvent::TelecomCallAdded { .. })),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn removing_active_call_disconnects_telecom() {
        let env = SimEnvironment::new("me", ServiceSettings::default());
        let registry = CallServiceConfigRegistry::default();
        registry.register("default", CallServiceConfig::builder().with_telecom(true).build());
        let launcher = launcher(&env, registry);
        let id = CallId::new("default", "c1");

        launcher.show_outgoing_call(&id, None, false).await.unwrap();
        env.host.settle().await;
        launcher
            .stop_service(&id, StopForegroundServiceSource::RemoveActiveCall)
            .await
            .unwrap();
        env.host.settle().await;

        assert!(env.log().contains(|e| matches!(
            e,
            PlatformEvent::TelecomDisconnected {
                cause: DisconnectCause::Local
            }
        )));
        assert!(launcher.telecom_bridge(&id).is_none());
    }
}
