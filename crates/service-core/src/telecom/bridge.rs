use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use super::platform::{CallAttributes, CallControl, CallsManager, PlatformCallEvent};
use super::state::{DisconnectCause, TelecomCallState, TelecomTransition};
use crate::client::Call;
use crate::errors::{Result, ServiceError};
use crate::model::{CallEvent, RejectReason, RingingState};
use crate::scope::ServiceScope;

/// Actions the SDK takes on a registered call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelecomAction {
    Answer { video: bool },
    Disconnect { cause: DisconnectCause },
    Hold,
    Activate,
    ToggleMute,
}

/// Two-way bridge between a call and its platform telephony registration.
///
/// System actions become `join`/`leave`/`reject` on the call; the call's
/// ended and rejected events become a disconnect towards the system.
pub struct TelecomBridge {
    call: Arc<dyn Call>,
    manager: Arc<dyn CallsManager>,
    state: watch::Sender<TelecomCallState>,
    control: Mutex<Option<Arc<dyn CallControl>>>,
    last_error: Mutex<Option<String>>,
    scope: Mutex<Option<ServiceScope>>,
}

impl TelecomBridge {
    pub fn new(call: Arc<dyn Call>, manager: Arc<dyn CallsManager>) -> Arc<Self> {
        let (state, _) = watch::channel(TelecomCallState::Idle);
        Arc::new(Self {
            call,
            manager,
            state,
            control: Mutex::new(None),
            last_error: Mutex::new(None),
            scope: Mutex::new(None),
        })
    }

    pub fn state(&self) -> TelecomCallState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<TelecomCallState> {
        self.state.subscribe()
    }

    /// Last error a control action reported
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn transition(&self, transition: TelecomTransition) -> Result<TelecomCallState> {
        let mut outcome = Err(ServiceError::telecom("transition not applied"));
        self.state.send_if_modified(|state| match state.apply(transition) {
            Ok(next) => {
                let changed = next != *state;
                *state = next;
                outcome = Ok(next);
                changed
            }
            Err(e) => {
                outcome = Err(e);
                false
            }
        });
        if let Ok(next) = &outcome {
            debug!("Transition (call_id: {}, transition: {:?}, state: {})", self.call.id(), transition, next);
        }
        outcome
    }

    /// Register the call with the system.
    ///
    /// Only one call can hold the registration; a second attempt fails.
    pub async fn register(self: &Arc<Self>, display_name: &str, address: &str, incoming: bool, video: bool) -> Result<()> {
        if self.state().is_registered() {
            error!("There cannot be more than one call at the same time (call_id: {})", self.call.id());
            return Err(ServiceError::telecom("a call is already registered"));
        }
        self.transition(TelecomTransition::Register { incoming })?;

        let attributes = CallAttributes {
            display_name: display_name.to_string(),
            address: address.to_string(),
            incoming,
            video,
        };
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let control = match self.manager.add_call(attributes, events_tx).await {
            Ok(control) => control,
            Err(e) => {
                error!("Registration failed (call_id: {}, error: {})", self.call.id(), e);
                self.transition(TelecomTransition::RegistrationFailed)?;
                return Err(e);
            }
        };
        *self.control.lock() = Some(control);
        self.transition(TelecomTransition::Registered)?;

        let scope = ServiceScope::new(format!("telecom-{}", self.call.id()));
        let bridge = self.clone();
        scope.spawn("platform_events", bridge.forward_platform_events(events_rx));
        let bridge = self.clone();
        scope.spawn("call_events", bridge.forward_call_events(self.call.events()));
        if let Some(previous) = self.scope.lock().replace(scope) {
            previous.cancel();
        }
        info!("Call registered with telecom (call_id: {}, incoming: {})", self.call.id(), incoming);
        Ok(())
    }

    async fn forward_platform_events(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<PlatformCallEvent>) -> Result<()> {
        while let Some(event) = events.recv().await {
            if let Err(e) = self.on_platform_event(event).await {
                warn!(
                    "Platform event failed (call_id: {}, event: {:?}, error: {})",
                    self.call.id(),
                    event,
                    e,
                );
            }
        }
        Ok(())
    }

    async fn forward_call_events(self: Arc<Self>, mut events: broadcast::Receiver<CallEvent>) -> Result<()> {
        loop {
            let cause = match events.recv().await {
                Ok(CallEvent::Ended) => DisconnectCause::Local,
                Ok(CallEvent::Rejected { .. }) => DisconnectCause::Rejected,
                Ok(CallEvent::Missed) => DisconnectCause::Missed,
                Ok(CallEvent::Accepted { .. }) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            };
            if self.state().is_registered() {
                return self.process_action(TelecomAction::Disconnect { cause }).await;
            }
        }
    }

    /// Apply an action taken from the system call UI
    pub async fn on_platform_event(&self, event: PlatformCallEvent) -> Result<()> {
        debug!("System action (call_id: {}, event: {:?})", self.call.id(), event);
        match event {
            PlatformCallEvent::Answer { .. } => {
                self.transition(TelecomTransition::Answered)?;
                self.call.accept().await?;
                self.call.join().await
            }
            PlatformCallEvent::SetActive => self.transition(TelecomTransition::SetActive).map(|_| ()),
            PlatformCallEvent::SetInactive => self.transition(TelecomTransition::SetInactive).map(|_| ()),
            PlatformCallEvent::Reject => {
                self.transition(TelecomTransition::Disconnected {
                    cause: DisconnectCause::Rejected,
                })?;
                let result = self.call.reject(RejectReason::Decline, "telecom-reject").await;
                self.release();
                result
            }
            PlatformCallEvent::Disconnect { cause } => {
                self.transition(TelecomTransition::Disconnected { cause })?;
                let ringing = *self.call.ringing_state().borrow();
                let result = if matches!(ringing, RingingState::Incoming { .. }) {
                    self.call.reject(RejectReason::Decline, "telecom-disconnect").await
                } else {
                    self.call.leave("telecom-disconnect").await
                };
                self.release();
                result
            }
        }
    }

    /// Apply an action taken by the SDK
    pub async fn process_action(&self, action: TelecomAction) -> Result<()> {
        debug!("SDK action (call_id: {}, action: {:?})", self.call.id(), action);
        let control = self
            .control
            .lock()
            .clone()
            .ok_or_else(|| ServiceError::telecom("call is not registered"))?;

        match action {
            TelecomAction::Answer { video } => match control.answer(video).await {
                Ok(()) => self.transition(TelecomTransition::Answered).map(|_| ()),
                Err(e) => {
                    self.record_error(&e);
                    self.transition(TelecomTransition::Disconnected {
                        cause: DisconnectCause::Busy,
                    })?;
                    self.release();
                    Err(e)
                }
            },
            TelecomAction::Disconnect { cause } => {
                if let Err(e) = control.disconnect(cause).await {
                    self.record_error(&e);
                }
                self.transition(TelecomTransition::Disconnected { cause })?;
                self.release();
                Ok(())
            }
            TelecomAction::Hold => match control.set_inactive().await {
                Ok(()) => self.transition(TelecomTransition::SetInactive).map(|_| ()),
                Err(e) => {
                    self.record_error(&e);
                    Err(e)
                }
            },
            TelecomAction::Activate => match control.set_active().await {
                Ok(()) => {
                    *self.last_error.lock() = None;
                    self.transition(TelecomTransition::SetActive).map(|_| ())
                }
                Err(e) => {
                    self.record_error(&e);
                    Err(e)
                }
            },
            TelecomAction::ToggleMute => {
                // The system stack cannot be muted; capture follows the registration's flag
                let state = self.transition(TelecomTransition::ToggleMute)?;
                self.call.set_microphone_enabled(!state.is_muted()).await
            }
        }
    }

    fn record_error(&self, error: &ServiceError) {
        warn!("Call control failed (call_id: {}, error: {})", self.call.id(), error);
        *self.last_error.lock() = Some(error.to_string());
    }

    /// End the registration scope; a new registration may follow
    fn release(&self) {
        self.control.lock().take();
        if let Some(scope) = self.scope.lock().take() {
            scope.cancel();
        }
    }

    /// Drop the registration without telling the system
    pub fn unregister(&self) {
        self.release();
        let _ = self.transition(TelecomTransition::Reset);
    }
}
