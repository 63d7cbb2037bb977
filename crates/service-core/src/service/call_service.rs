use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::observers::{self, ObserverContext};
use super::state::{ServiceLifecycle, ServiceState, StartResult};
use super::{CallServiceHandle, ServiceDeps, ServiceMessage};
use crate::client::Call;
use crate::debounce::Debouncer;
use crate::errors::{Result, ServiceError};
use crate::intent::ServiceCommand;
use crate::model::{CallId, Notification, NotificationKind, RejectReason, RingingState, Trigger};
use crate::notification::ServiceNotificationRetriever;
use crate::platform::ReceiverGuard;
use crate::profile::ServiceProfile;
use crate::scope::ServiceScope;

/// State machine of one background execution unit.
///
/// Owned by its worker task; reach it through a [`CallServiceHandle`].
pub struct CallService {
    profile: ServiceProfile,
    deps: ServiceDeps,
    settings: Arc<crate::config::ServiceSettings>,
    retriever: ServiceNotificationRetriever,
    state: ServiceState,
    scope: Option<ServiceScope>,
    receiver: ReceiverGuard,
    stop_debouncer: Debouncer,
    messages: mpsc::UnboundedSender<ServiceMessage>,
    lifecycle_tx: watch::Sender<ServiceLifecycle>,
    current_call_tx: watch::Sender<Option<CallId>>,
    stop_signal: Arc<watch::Sender<bool>>,
}

impl CallService {
    /// Create an instance and start its worker
    pub fn spawn(profile: ServiceProfile, deps: ServiceDeps) -> CallServiceHandle {
        let (messages, mut inbox) = mpsc::unbounded_channel();
        let (lifecycle_tx, lifecycle) = watch::channel(ServiceLifecycle::Starting);
        let (current_call_tx, current_call) = watch::channel(None);
        let (stop_signal_tx, stop_signal) = watch::channel(false);

        let handle = CallServiceHandle {
            service_class: profile.class,
            messages: messages.clone(),
            lifecycle,
            current_call,
            stop_signal,
        };

        let mut service = CallService {
            retriever: ServiceNotificationRetriever::new(deps.notification_source.clone()),
            receiver: ReceiverGuard::new(deps.platform.screen_receiver.clone()),
            settings: Arc::new(deps.settings.clone()),
            state: ServiceState::new(),
            scope: None,
            stop_debouncer: Debouncer::new("stop_service"),
            messages,
            lifecycle_tx,
            current_call_tx,
            stop_signal: Arc::new(stop_signal_tx),
            profile,
            deps,
        };

        info!("{}: Service created", service.profile.log_tag);
        tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                service.on_message(message).await;
                if service.state.lifecycle.is_stopped() {
                    break;
                }
            }
            debug!("{}: Service worker finished", service.profile.log_tag);
        });

        handle
    }

    async fn on_message(&mut self, message: ServiceMessage) {
        match message {
            ServiceMessage::Command { command, reply } => {
                let result = self.handle(command).await;
                if let Err(e) = &result {
                    error!("{}: Command failed: {}", self.profile.log_tag, e);
                }
                let _ = reply.send(result);
            }
            ServiceMessage::StopRequested { reason } => self.stop_gracefully(reason),
            ServiceMessage::ExecuteStop => self.internal_stop(),
            ServiceMessage::UpdateForeground {
                call_id,
                notification_id,
                notification,
                trigger,
            } => self.update_foreground(&call_id, notification_id, &notification, trigger),
            ServiceMessage::RemoveIncoming { notification_id } => self.remove_incoming(notification_id),
            ServiceMessage::TaskRemoved { done } => {
                self.on_task_removed().await;
                let _ = done.send(());
            }
            ServiceMessage::Timeout => {
                warn!("{}: Timeout received from the system, service will stop", self.profile.log_tag);
                self.stop_gracefully("timeout");
            }
        }
    }

    fn set_lifecycle(&mut self, lifecycle: ServiceLifecycle) {
        if self.state.lifecycle != lifecycle {
            debug!(
                "{}: Lifecycle transition (from: {}, to: {})",
                self.profile.log_tag,
                self.state.lifecycle,
                lifecycle,
            );
        }
        self.state.lifecycle = lifecycle;
        self.lifecycle_tx.send_replace(lifecycle);
    }

    fn set_current_call(&mut self, call_id: Option<CallId>) {
        self.state.current_call_id = call_id.clone();
        self.current_call_tx.send_replace(call_id);
    }

    /// Handle one platform command
    async fn handle(&mut self, command: ServiceCommand) -> Result<StartResult> {
        let tag = self.profile.log_tag;
        debug!("{}: Command received (command: {:?}, lifecycle: {})", tag, command, self.state.lifecycle);

        match self.state.lifecycle {
            ServiceLifecycle::Stopped => return Err(ServiceError::ServiceStopped),
            ServiceLifecycle::Stopping if !command.stop => {
                debug!("{}: Stop pending, asking for redelivery", tag);
                return Ok(StartResult::RedeliverIntent);
            }
            _ => {}
        }

        if command.stop {
            return Ok(self.handle_stop(command.call_id.as_ref()));
        }

        let (call_id, trigger) = match (command.call_id, command.trigger) {
            (Some(call_id), Some(trigger)) => (call_id, trigger),
            (call_id, trigger) => {
                warn!("{}: Call id or trigger missing (call_id: {:?}, trigger: {:?})", tag, call_id, trigger);
                self.stop_gracefully("malformed command");
                return Ok(StartResult::RedeliverIntent);
            }
        };
        // Later triggers for the same call keep the name the incoming command carried
        let display_name = command.display_name.or_else(|| {
            self.state
                .owns(&call_id)
                .then(|| self.state.display_name.clone())
                .flatten()
        });

        let call = self.deps.client.call(&call_id);

        if self.deps.client.active_call().is_none()
            && !self.state.in_foreground
            && !matches!(trigger, Trigger::RemoveIncomingCall | Trigger::None)
        {
            self.promote_setting_up(&call_id, call.as_ref(), trigger);
        }

        if trigger != Trigger::IncomingCall {
            let required = self.profile.permissions.required_for(call.as_ref());
            let check = self.deps.platform.permissions.check_permissions(call.as_ref(), &required);
            if !check.granted {
                if self.settings.crash_on_missing_permission {
                    return Err(ServiceError::MissingPermissions { missing: check.missing });
                }
                error!(
                    "{}: Missing permissions, not starting (call_id: {}, missing: {:?})",
                    tag,
                    call_id,
                    check.missing,
                );
                self.stop_gracefully("missing permissions");
                return Ok(StartResult::NotSticky);
            }
        }

        let descriptor = self.retriever.retrieve(
            self.profile.class,
            trigger,
            call.as_ref(),
            &call_id,
            display_name.as_deref(),
        );

        let Some(notification) = descriptor.notification else {
            return Ok(self.handle_missing_notification(&call_id, trigger, descriptor.notification_id));
        };

        if trigger == Trigger::IncomingCall {
            if let Some(current) = self.state.current_call_id.clone() {
                if current != call_id && self.deps.client.active_call().is_some() {
                    // The active call keeps this instance; the new one only rings
                    info!(
                        "{}: Busy with another call, posting incoming notification (current: {}, call_id: {})",
                        tag,
                        current,
                        call_id,
                    );
                    self.notify(descriptor.notification_id, &notification);
                    return Ok(StartResult::NotSticky);
                }
            }
        }

        if let Some(current) = self.state.current_call_id.clone() {
            if current != call_id {
                self.release_call(&current);
            }
        }

        self.set_current_call(Some(call_id.clone()));
        self.state.display_name = display_name;
        call.set_notification_id(descriptor.notification_id);

        if trigger == Trigger::IncomingCall {
            self.deps.client.add_ringing_call(call.clone());
        }

        let types = self
            .profile
            .foreground_type(trigger, &self.deps.platform.permissions.granted());
        if let Err(e) = self
            .deps
            .platform
            .foreground
            .start_foreground(descriptor.notification_id, &notification, types)
        {
            error!("{}: Foreground promotion failed (call_id: {}, error: {})", tag, call_id, e);
            self.stop_gracefully("foreground promotion failed");
            return Err(e);
        }
        self.state.in_foreground = true;
        self.state.notification_ids.insert(descriptor.notification_id);

        if self.scope.is_none() {
            self.start_observing(call);
        }
        self.set_lifecycle(ServiceLifecycle::Running(trigger));
        info!(
            "{}: Service running (call_id: {}, trigger: {}, notification_id: {})",
            tag,
            call_id,
            trigger,
            descriptor.notification_id,
        );
        Ok(StartResult::NotSticky)
    }

    fn handle_stop(&mut self, call_id: Option<&CallId>) -> StartResult {
        let tag = self.profile.log_tag;
        match (call_id, self.state.current_call_id.clone()) {
            (Some(target), Some(current)) if *target != current => {
                let call = self.deps.client.call(target);
                let ringing = *call.ringing_state().borrow();
                if ringing == RingingState::Idle {
                    debug!("{}: Stop for an expired ringing call, ignoring (call_id: {})", tag, target);
                } else {
                    debug!(
                        "{}: Stop for a call this instance does not own (call_id: {}, current: {})",
                        tag,
                        target,
                        current,
                    );
                    self.deps
                        .platform
                        .notifications
                        .cancel(target.notification_id(NotificationKind::Incoming));
                }
            }
            _ => self.stop_gracefully("stop command"),
        }
        StartResult::NotSticky
    }

    fn handle_missing_notification(&mut self, call_id: &CallId, trigger: Trigger, notification_id: i32) -> StartResult {
        let tag = self.profile.log_tag;
        match trigger {
            Trigger::RemoveIncomingCall if self.state.owns(call_id) => {
                info!("{}: Removing incoming call (call_id: {})", tag, call_id);
                self.deps.platform.notifications.cancel(notification_id);
                self.stop_gracefully("incoming call removed");
                StartResult::NotSticky
            }
            Trigger::RemoveIncomingCall => {
                debug!("{}: Incoming call was notification only, cancelling it (call_id: {})", tag, call_id);
                self.deps.platform.notifications.cancel(notification_id);
                if self.state.lifecycle == ServiceLifecycle::Starting && self.state.current_call_id.is_none() {
                    // Started only to deliver the removal; nothing was promoted
                    self.deps.platform.foreground.stop_self();
                    self.set_lifecycle(ServiceLifecycle::Stopped);
                }
                StartResult::NotSticky
            }
            _ => {
                error!("{}: No notification for trigger (call_id: {}, trigger: {})", tag, call_id, trigger);
                if self.state.current_call_id.is_none() {
                    self.stop_gracefully("no notification");
                }
                StartResult::RedeliverIntent
            }
        }
    }

    /// Best-effort placeholder foreground before anything else is resolved
    fn promote_setting_up(&mut self, call_id: &CallId, call: &dyn Call, trigger: Trigger) {
        let Some(notification) = self.deps.notification_source.setting_up_notification() else {
            return;
        };
        let kind = match trigger {
            Trigger::IncomingCall => NotificationKind::Incoming,
            Trigger::OutgoingCall => NotificationKind::Outgoing,
            _ => NotificationKind::Ongoing,
        };
        let notification_id = call.notification_id().unwrap_or_else(|| call_id.notification_id(kind));
        let types = self
            .profile
            .foreground_type(trigger, &self.deps.platform.permissions.granted());
        match self
            .deps
            .platform
            .foreground
            .start_foreground(notification_id, &notification, types)
        {
            Ok(()) => {
                debug!(
                    "{}: Promoted with setting-up notification (notification_id: {})",
                    self.profile.log_tag,
                    notification_id,
                );
                self.state.in_foreground = true;
                self.state.notification_ids.insert(notification_id);
            }
            Err(e) => warn!("{}: Setting-up promotion failed: {}", self.profile.log_tag, e),
        }
    }

    fn start_observing(&mut self, call: Arc<dyn Call>) {
        let scope = ServiceScope::new(self.profile.log_tag);
        let ctx = ObserverContext {
            call,
            client: self.deps.client.clone(),
            sound: self.deps.platform.sound.clone(),
            notification_source: self.deps.notification_source.clone(),
            settings: self.settings.clone(),
            messages: self.messages.clone(),
            stop_signal: self.stop_signal.clone(),
            log_tag: self.profile.log_tag,
        };

        scope.spawn("initialize_call", observers::initialize_call(ctx.clone()));
        scope.spawn("connect_client", observers::connect_client(ctx.clone()));
        scope.spawn("ringing_state", observers::observe_ringing_state(ctx.clone()));
        scope.spawn("call_events", observers::observe_call_events(ctx.clone()));
        scope.spawn("connection_state", observers::observe_connection_state(ctx.clone()));
        if self.settings.update_notifications {
            scope.spawn("notification_updates", observers::observe_notification_updates(ctx));
        }
        self.receiver.register();
        self.scope = Some(scope);
    }

    /// Drop everything held for a call this instance no longer serves
    fn release_call(&mut self, call_id: &CallId) {
        info!("{}: Replacing tracked call (call_id: {})", self.profile.log_tag, call_id);
        for id in std::mem::take(&mut self.state.notification_ids) {
            self.deps.platform.notifications.cancel(id);
        }
        self.deps.platform.sound.stop();
        if let Some(scope) = self.scope.take() {
            scope.cancel();
        }
        self.set_current_call(None);
    }

    fn update_foreground(&mut self, call_id: &CallId, notification_id: i32, notification: &Notification, trigger: Trigger) {
        if !self.state.lifecycle.is_running() || !self.state.owns(call_id) {
            debug!("{}: Not serving this call, skipping (call_id: {})", self.profile.log_tag, call_id);
            return;
        }
        let types = self
            .profile
            .foreground_type(trigger, &self.deps.platform.permissions.granted());
        match self
            .deps
            .platform
            .foreground
            .start_foreground(notification_id, notification, types)
        {
            Ok(()) => {
                self.state.notification_ids.insert(notification_id);
                self.set_lifecycle(ServiceLifecycle::Running(trigger));
            }
            Err(e) => warn!("{}: Refreshing notification failed: {}", self.profile.log_tag, e),
        }
    }

    fn remove_incoming(&mut self, notification_id: i32) {
        debug!(
            "{}: Cancelling incoming notification (notification_id: {})",
            self.profile.log_tag,
            notification_id,
        );
        self.deps.platform.notifications.cancel(notification_id);
        if self.state.current_call_id.is_none() {
            self.stop_gracefully("incoming removed without call");
        }
    }

    fn notify(&mut self, notification_id: i32, notification: &Notification) {
        if !self.deps.platform.notifications.has_post_permission() {
            warn!(
                "{}: Permission not granted, cannot show notification (notification_id: {})",
                self.profile.log_tag,
                notification_id,
            );
            return;
        }
        if let Err(e) = self.deps.platform.notifications.notify(notification_id, notification) {
            warn!("{}: Posting notification failed: {}", self.profile.log_tag, e);
        }
    }

    /// End the tracked call when the user swipes the app away
    async fn on_task_removed(&mut self) {
        let tag = self.profile.log_tag;
        if let Some(call_id) = self.state.current_call_id.clone() {
            let call = self.deps.client.call(&call_id);
            let ringing = *call.ringing_state().borrow();
            let result = match ringing {
                RingingState::Outgoing { .. } => call.reject(RejectReason::Cancel, "call-service-end-call-outgoing").await,
                RingingState::Incoming { .. } if call.member_count() == 2 => {
                    call.reject(RejectReason::Decline, "memberCount == 2").await
                }
                RingingState::Incoming { .. } => call.leave("call-service-end-call-incoming").await,
                _ => call.leave("call-service-end-call-unknown").await,
            };
            match result {
                Ok(()) => info!("{}: Ended call (call_id: {}, ringing: {:?})", tag, call_id, ringing),
                Err(e) => warn!("{}: Ending call failed (call_id: {}, error: {})", tag, call_id, e),
            }
        }
        self.stop_gracefully("task removed");
    }

    /// Stop, deferred until the instance is old enough.
    ///
    /// Stopping too soon after promotion can leave the notification behind,
    /// so stops within `stop_debounce_threshold` of the start run later.
    fn stop_gracefully(&mut self, reason: &'static str) {
        if self.state.lifecycle.is_stopped() {
            return;
        }
        let elapsed = self.state.start_time.elapsed();
        let threshold = self.settings.stop_debounce_threshold;
        if elapsed >= threshold {
            info!("{}: Stopping now (reason: {})", self.profile.log_tag, reason);
            self.internal_stop();
            return;
        }

        let delay = (threshold - elapsed).max(self.settings.stop_throttle_interval);
        info!(
            "{}: Service too young, deferring stop (reason: {}, delay_ms: {})",
            self.profile.log_tag,
            reason,
            delay.as_millis() as u64,
        );
        let messages = self.messages.clone();
        self.stop_debouncer.schedule(delay, async move {
            let _ = messages.send(ServiceMessage::ExecuteStop);
        });
        self.set_lifecycle(ServiceLifecycle::Stopping);
    }

    /// Tear down in order; notifications go before the scope so in-flight
    /// refreshes never post into a cancelled scope's aftermath.
    fn internal_stop(&mut self) {
        if self.state.lifecycle.is_stopped() {
            return;
        }
        let tag = self.profile.log_tag;
        info!("{}: Stopping service (call_id: {:?})", tag, self.state.current_call_id);

        let platform = &self.deps.platform;
        if self.state.in_foreground {
            platform.foreground.stop_foreground();
            self.state.in_foreground = false;
        }

        let mut ids = std::mem::take(&mut self.state.notification_ids);
        if let Some(call_id) = &self.state.current_call_id {
            ids.insert(call_id.notification_id(NotificationKind::Incoming));
        }
        for id in ids {
            platform.notifications.cancel(id);
        }

        self.receiver.unregister();
        platform.sound.stop();
        platform.sound.release();

        if let Some(scope) = self.scope.take() {
            scope.cancel();
        }
        self.stop_debouncer.cancel();
        platform.foreground.stop_self();
        self.set_lifecycle(ServiceLifecycle::Stopped);
    }
}
