//! Long-running subscriptions of a service instance
//!
//! Observers only read call and client state. Anything that changes the
//! service goes back to the worker as a [`ServiceMessage`].

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, error, info, warn};

use super::ServiceMessage;
use crate::client::{Call, CallClient, NotificationSource};
use crate::config::ServiceSettings;
use crate::errors::{Result, ServiceError};
use crate::model::{CallEvent, CallSnapshot, ConnectionState, NotificationKind, RejectReason, RingingState, Trigger};
use crate::platform::{Sound, SoundPlayer};

/// What every observer of one call shares
#[derive(Clone)]
pub(crate) struct ObserverContext {
    pub call: Arc<dyn Call>,
    pub client: Arc<dyn CallClient>,
    pub sound: Arc<dyn SoundPlayer>,
    pub notification_source: Arc<dyn NotificationSource>,
    pub settings: Arc<ServiceSettings>,
    pub messages: mpsc::UnboundedSender<ServiceMessage>,
    pub stop_signal: Arc<watch::Sender<bool>>,
    pub log_tag: &'static str,
}

impl ObserverContext {
    /// Raise the stop signal and ask the worker to stop
    pub fn request_stop(&self, reason: &'static str) {
        info!("{}: Stop requested (call_id: {}, reason: {})", self.log_tag, self.call.id(), reason);
        self.stop_signal.send_replace(true);
        self.send(ServiceMessage::StopRequested { reason });
    }

    pub fn remove_incoming(&self) {
        let notification_id = self.call.id().notification_id(NotificationKind::Incoming);
        self.send(ServiceMessage::RemoveIncoming { notification_id });
    }

    fn send(&self, message: ServiceMessage) {
        if self.messages.send(message).is_err() {
            debug!("{}: Service worker gone, message dropped", self.log_tag);
        }
    }
}

/// Ringtone, vibration and terminal ringing states
pub(crate) async fn observe_ringing_state(ctx: ObserverContext) -> Result<()> {
    let mut ringing = ctx.call.ringing_state();
    loop {
        let state = *ringing.borrow_and_update();
        debug!("{}: Ringing state (state: {:?})", ctx.log_tag, state);
        on_ringing_state(&ctx, state).await;
        if ringing.changed().await.is_err() {
            return Ok(());
        }
    }
}

async fn on_ringing_state(ctx: &ObserverContext, state: RingingState) {
    match state {
        RingingState::Incoming { accepted_by_me: false } => {
            ctx.sound.play(Sound::Incoming, ctx.settings.play_incoming_sound_if_muted);
            if ctx.settings.vibrate_on_incoming {
                ctx.sound.vibrate();
            }
        }
        RingingState::Outgoing { accepted_by_callee: false } => {
            ctx.sound.play(Sound::Outgoing, ctx.settings.play_outgoing_sound_if_muted);
        }
        RingingState::RejectedByAll => {
            if let Err(e) = ctx.call.reject(RejectReason::Decline, "RingingState.RejectedByAll").await {
                warn!("{}: Reject failed: {}", ctx.log_tag, e);
            }
            ctx.sound.stop();
            ctx.request_stop("rejected by all");
        }
        // Accepted on either side, active, timed out or idle
        _ => ctx.sound.stop(),
    }
}

/// Accepted, rejected, missed and ended events of the call
pub(crate) async fn observe_call_events(ctx: ObserverContext) -> Result<()> {
    let mut events = ctx.call.events();
    loop {
        match events.recv().await {
            Ok(event) => on_call_event(&ctx, event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("{}: Lagged behind call events (skipped: {})", ctx.log_tag, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

fn on_call_event(ctx: &ObserverContext, event: CallEvent) {
    debug!("{}: Call event (event: {:?})", ctx.log_tag, event);
    let me = ctx.client.user_id();
    match event {
        CallEvent::Accepted { user_id } => {
            let ringing_here = matches!(*ctx.call.ringing_state().borrow(), RingingState::Incoming { .. });
            // Accepted by me somewhere else while this device still rings
            if user_id == me && ringing_here {
                ctx.request_stop("accepted on another device");
            }
        }
        CallEvent::Rejected { user_id } => {
            let by_creator = ctx.call.created_by().as_deref() == Some(user_id.as_str());
            if user_id == me || by_creator {
                remove_or_stop(ctx, "rejected");
            }
        }
        CallEvent::Missed => remove_or_stop(ctx, "missed"),
        CallEvent::Ended => ctx.request_stop("call ended"),
    }
}

fn remove_or_stop(ctx: &ObserverContext, reason: &'static str) {
    if ctx.client.active_call().is_some() {
        ctx.remove_incoming();
    } else {
        ctx.request_stop(reason);
    }
}

/// Clean up a ringing call whose connection failed
pub(crate) async fn observe_connection_state(ctx: ObserverContext) -> Result<()> {
    let mut connection = ctx.call.connection_state();
    loop {
        let state = connection.borrow_and_update().clone();
        if let ConnectionState::Failed { reason } = state {
            let call_id = ctx.call.id().clone();
            let is_ringing_call = ctx.client.ringing_call().is_some_and(|c| c.id() == &call_id);
            if is_ringing_call {
                warn!("{}: Ringing call failed (call_id: {}, reason: {})", ctx.log_tag, call_id, reason);
                ctx.client.remove_ringing_call(&call_id);
                ctx.client.on_call_clean_up(&call_id);
            }
        }
        if connection.changed().await.is_err() {
            return Ok(());
        }
    }
}

/// Distinct snapshots of the state a notification depends on
fn default_update_triggers(snapshot: watch::Receiver<CallSnapshot>) -> BoxStream<'static, ()> {
    WatchStream::new(snapshot)
        .scan(None::<CallSnapshot>, |last, snapshot| {
            let changed = last.as_ref() != Some(&snapshot);
            *last = Some(snapshot);
            futures::future::ready(Some(changed))
        })
        .filter_map(|changed| futures::future::ready(changed.then_some(())))
        .boxed()
}

/// Keep the foreground notification in sync with the call
pub(crate) async fn observe_notification_updates(ctx: ObserverContext) -> Result<()> {
    let mut triggers = ctx
        .notification_source
        .update_triggers(ctx.call.clone())
        .unwrap_or_else(|| default_update_triggers(ctx.call.snapshot()));

    while triggers.next().await.is_some() {
        let ringing = *ctx.call.ringing_state().borrow();
        let Some(notification) = ctx.notification_source.on_call_notification_update(ctx.call.clone()).await else {
            debug!("{}: No notification generated (ringing: {:?})", ctx.log_tag, ringing);
            continue;
        };
        let (trigger, kind) = match ringing {
            RingingState::Active => (Trigger::OnGoingCall, NotificationKind::Ongoing),
            RingingState::Outgoing { .. } => (Trigger::OutgoingCall, NotificationKind::Outgoing),
            RingingState::Incoming { .. } => (Trigger::IncomingCall, NotificationKind::Incoming),
            other => {
                debug!("{}: Unhandled ringing state (state: {:?})", ctx.log_tag, other);
                continue;
            }
        };
        let notification_id = ctx
            .call
            .notification_id()
            .unwrap_or_else(|| ctx.call.id().notification_id(kind));
        ctx.send(ServiceMessage::UpdateForeground {
            call_id: ctx.call.id().clone(),
            notification_id,
            notification,
            trigger,
        });
    }
    Ok(())
}

/// Refresh the call and make sure the client is connected
pub(crate) async fn initialize_call(ctx: ObserverContext) -> Result<()> {
    if let Err(e) = ctx.call.get().await {
        error!("{}: Failed to update call (call_id: {}, error: {})", ctx.log_tag, ctx.call.id(), e);
        ctx.request_stop("call update failed");
        return Err(e);
    }
    Ok(())
}

pub(crate) async fn connect_client(ctx: ObserverContext) -> Result<()> {
    let client = ctx.client.clone();
    crate::recovery::retry_with_backoff("connect_if_not_connected", ctx.settings.connect_retry.clone(), || {
        let client = client.clone();
        async move { client.connect_if_not_connected().await }
    })
    .await
    .map_err(|e| ServiceError::call(format!("client connection failed: {}", e)))
}
