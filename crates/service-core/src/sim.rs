//! In-memory platform and collaborators
//!
//! Every platform trait and collaborator contract has a simulated
//! implementation here. All of them append to one shared [`EventLog`] so a
//! scenario can be asserted (or printed) as the ordered list of platform
//! interactions it caused. [`SimServiceHost`] routes commands to real
//! [`CallService`] instances, one per service class.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::client::{Call, CallClient, NotificationSource};
use crate::config::ServiceSettings;
use crate::errors::{Result, ServiceError};
use crate::intent::ServiceCommand;
use crate::model::{
    CallEvent, CallId, CallSnapshot, ConnectionState, Notification, Permission, PermissionCheck, RejectReason,
    RingingState, SEND_AUDIO, SEND_VIDEO,
};
use crate::notification::DefaultNotificationSource;
use crate::platform::{
    ForegroundController, NotificationManager, PermissionChecker, PlatformServices, ScreenStateReceiver, ServiceHost,
    Sound, SoundPlayer,
};
use crate::profile::{ForegroundServiceTypes, ServiceClass, ServiceProfile};
use crate::service::{CallService, CallServiceHandle, ServiceDeps, ServiceLifecycle, StartResult};
use crate::telecom::{CallAttributes, CallControl, CallsManager, DisconnectCause, PlatformCallEvent};

/// One observable interaction with the simulated platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlatformEvent {
    ServiceStarted { command: ServiceCommand, foreground: bool },
    CommandHandled { service_class: ServiceClass, result: String },
    Notified { id: i32, channel_id: String, title: String },
    Cancelled { id: i32 },
    ForegroundStarted { service_class: ServiceClass, id: i32, channel_id: String, types: u32 },
    ForegroundStopped { service_class: ServiceClass },
    StoppedSelf { service_class: ServiceClass },
    SoundPlayed { service_class: ServiceClass, sound: String },
    SoundStopped { service_class: ServiceClass },
    Vibrated { service_class: ServiceClass },
    SoundReleased { service_class: ServiceClass },
    ReceiverRegistered { service_class: ServiceClass },
    ReceiverUnregistered { service_class: ServiceClass },
    TelecomCallAdded { display_name: String, incoming: bool },
    TelecomAnswered { video: bool },
    TelecomActivated,
    TelecomDeactivated,
    TelecomDisconnected { cause: DisconnectCause },
}

/// Ordered record of platform interactions, shared by all sim components
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<PlatformEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: PlatformEvent) {
        debug!("Platform event (event: {:?})", event);
        self.events.lock().push(event);
    }

    pub fn snapshot(&self) -> Vec<PlatformEvent> {
        self.events.lock().clone()
    }

    /// Remove and return everything recorded so far
    pub fn drain(&self) -> Vec<PlatformEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn count(&self, predicate: impl Fn(&PlatformEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    pub fn contains(&self, predicate: impl Fn(&PlatformEvent) -> bool) -> bool {
        self.count(predicate) > 0
    }

    /// Index of the first matching event
    pub fn position(&self, predicate: impl Fn(&PlatformEvent) -> bool) -> Option<usize> {
        self.events.lock().iter().position(predicate)
    }
}

/// Something the service layer asked a [`SimCall`] to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallAction {
    Get,
    Join,
    Accept,
    Reject { reason: RejectReason, source: String },
    Leave { reason: String },
    SetMicrophone { enabled: bool },
}

/// Scriptable call
pub struct SimCall {
    id: CallId,
    ringing: watch::Sender<RingingState>,
    snapshot: watch::Sender<CallSnapshot>,
    connection: watch::Sender<ConnectionState>,
    events: broadcast::Sender<CallEvent>,
    notification_id: Mutex<Option<i32>>,
    microphone: AtomicBool,
    created_by: Mutex<Option<String>>,
    capabilities: RwLock<Vec<String>>,
    actions: Mutex<Vec<CallAction>>,
    fail_get: AtomicBool,
}

impl SimCall {
    /// New idle call; `user_id` becomes its only member and may publish
    /// audio and video
    pub fn new(id: CallId, user_id: &str) -> Arc<Self> {
        let (ringing, _) = watch::channel(RingingState::Idle);
        let (snapshot, _) = watch::channel(CallSnapshot {
            members: vec![user_id.to_string()],
            ..Default::default()
        });
        let (connection, _) = watch::channel(ConnectionState::Idle);
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            id,
            ringing,
            snapshot,
            connection,
            events,
            notification_id: Mutex::new(None),
            microphone: AtomicBool::new(true),
            created_by: Mutex::new(None),
            capabilities: RwLock::new(vec![SEND_AUDIO.to_string(), SEND_VIDEO.to_string()]),
            actions: Mutex::new(Vec::new()),
            fail_get: AtomicBool::new(false),
        })
    }

    pub fn set_ringing_state(&self, state: RingingState) {
        self.ringing.send_replace(state);
        self.snapshot.send_modify(|s| s.ringing_state = state);
    }

    pub fn current_ringing_state(&self) -> RingingState {
        *self.ringing.borrow()
    }

    pub fn set_members(&self, members: &[&str]) {
        let members = members.iter().map(|m| m.to_string()).collect();
        self.snapshot.send_modify(|s| s.members = members);
    }

    pub fn set_remote_participants(&self, participants: &[&str]) {
        let participants = participants.iter().map(|p| p.to_string()).collect();
        self.snapshot.send_modify(|s| s.remote_participants = participants);
    }

    pub fn set_backstage(&self, backstage: bool) {
        self.snapshot.send_modify(|s| s.backstage = backstage);
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.connection.send_replace(state);
    }

    /// Deliver an event to every subscriber
    pub fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    pub fn set_created_by(&self, user_id: &str) {
        *self.created_by.lock() = Some(user_id.to_string());
    }

    pub fn grant_capability(&self, capability: &str) {
        self.capabilities.write().push(capability.to_string());
    }

    pub fn revoke_capability(&self, capability: &str) {
        self.capabilities.write().retain(|c| c != capability);
    }

    /// Make `get()` fail from now on
    pub fn fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn actions(&self) -> Vec<CallAction> {
        self.actions.lock().clone()
    }

    fn record(&self, action: CallAction) {
        debug!("Call action (call_id: {}, action: {:?})", self.id, action);
        self.actions.lock().push(action);
    }
}

#[async_trait]
impl Call for SimCall {
    fn id(&self) -> &CallId {
        &self.id
    }

    async fn get(&self) -> Result<()> {
        self.record(CallAction::Get);
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(ServiceError::call(format!("failed to load call {}", self.id)));
        }
        Ok(())
    }

    async fn join(&self) -> Result<()> {
        self.record(CallAction::Join);
        self.set_ringing_state(RingingState::Active);
        self.connection.send_replace(ConnectionState::Connected);
        Ok(())
    }

    async fn accept(&self) -> Result<()> {
        self.record(CallAction::Accept);
        if let RingingState::Incoming { .. } = self.current_ringing_state() {
            self.set_ringing_state(RingingState::Incoming { accepted_by_me: true });
        }
        Ok(())
    }

    async fn reject(&self, reason: RejectReason, source: &str) -> Result<()> {
        self.record(CallAction::Reject {
            reason,
            source: source.to_string(),
        });
        Ok(())
    }

    async fn leave(&self, reason: &str) -> Result<()> {
        self.record(CallAction::Leave {
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn set_microphone_enabled(&self, enabled: bool) -> Result<()> {
        self.record(CallAction::SetMicrophone { enabled });
        self.microphone.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn microphone_enabled(&self) -> bool {
        self.microphone.load(Ordering::SeqCst)
    }

    fn ringing_state(&self) -> watch::Receiver<RingingState> {
        self.ringing.subscribe()
    }

    fn events(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    fn snapshot(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshot.subscribe()
    }

    fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.read().iter().any(|c| c == capability)
    }

    fn notification_id(&self) -> Option<i32> {
        *self.notification_id.lock()
    }

    fn set_notification_id(&self, id: i32) {
        *self.notification_id.lock() = Some(id);
    }

    fn created_by(&self) -> Option<String> {
        self.created_by.lock().clone()
    }

    fn member_count(&self) -> usize {
        self.snapshot.borrow().members.len()
    }
}

/// Client owning [`SimCall`]s, created on first use
pub struct SimClient {
    user_id: String,
    calls: DashMap<CallId, Arc<SimCall>>,
    active: Mutex<Option<CallId>>,
    ringing: Mutex<Option<CallId>>,
    connects: AtomicUsize,
    connect_failures: AtomicUsize,
    cleaned_up: Mutex<Vec<CallId>>,
}

impl SimClient {
    pub fn new(user_id: &str) -> Arc<Self> {
        Arc::new(Self {
            user_id: user_id.to_string(),
            calls: DashMap::new(),
            active: Mutex::new(None),
            ringing: Mutex::new(None),
            connects: AtomicUsize::new(0),
            connect_failures: AtomicUsize::new(0),
            cleaned_up: Mutex::new(Vec::new()),
        })
    }

    /// The simulated call for an id
    pub fn sim_call(&self, id: &CallId) -> Arc<SimCall> {
        self.calls
            .entry(id.clone())
            .or_insert_with(|| SimCall::new(id.clone(), &self.user_id))
            .clone()
    }

    pub fn set_active_call(&self, id: Option<&CallId>) {
        *self.active.lock() = id.cloned();
    }

    pub fn ringing_call_id(&self) -> Option<CallId> {
        self.ringing.lock().clone()
    }

    /// Fail the next `n` connection attempts with a recoverable error
    pub fn fail_next_connects(&self, n: usize) {
        self.connect_failures.store(n, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn cleaned_up(&self) -> Vec<CallId> {
        self.cleaned_up.lock().clone()
    }
}

#[async_trait]
impl CallClient for SimClient {
    fn user_id(&self) -> String {
        self.user_id.clone()
    }

    fn call(&self, id: &CallId) -> Arc<dyn Call> {
        self.sim_call(id)
    }

    fn active_call(&self) -> Option<Arc<dyn Call>> {
        let id = self.active.lock().clone()?;
        Some(self.call(&id))
    }

    fn ringing_call(&self) -> Option<Arc<dyn Call>> {
        let id = self.ringing.lock().clone()?;
        Some(self.call(&id))
    }

    fn add_ringing_call(&self, call: Arc<dyn Call>) {
        *self.ringing.lock() = Some(call.id().clone());
    }

    fn remove_ringing_call(&self, id: &CallId) {
        let mut ringing = self.ringing.lock();
        if ringing.as_ref() == Some(id) {
            *ringing = None;
        }
    }

    async fn connect_if_not_connected(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .connect_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ServiceError::platform("socket connection refused"));
        }
        Ok(())
    }

    fn on_call_clean_up(&self, id: &CallId) {
        self.cleaned_up.lock().push(id.clone());
    }
}

/// Notification source that can be switched to produce nothing
#[derive(Default)]
pub struct SimNotificationSource {
    inner: DefaultNotificationSource,
    suppressed: AtomicBool,
    updates: AtomicUsize,
}

impl SimNotificationSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// While suppressed, every method returns `None`
    pub fn suppress(&self, suppressed: bool) {
        self.suppressed.store(suppressed, Ordering::SeqCst);
    }

    /// How many refreshes were requested
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    fn enabled(&self) -> bool {
        !self.suppressed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSource for SimNotificationSource {
    fn ongoing_call_notification(
        &self,
        call_id: &CallId,
        display_name: Option<&str>,
        is_outgoing: bool,
        remote_participant_count: usize,
    ) -> Option<Notification> {
        self.enabled()
            .then(|| {
                self.inner
                    .ongoing_call_notification(call_id, display_name, is_outgoing, remote_participant_count)
            })
            .flatten()
    }

    fn ringing_call_notification(
        &self,
        ringing_state: RingingState,
        call_id: &CallId,
        display_name: Option<&str>,
        with_content_intent: bool,
    ) -> Option<Notification> {
        self.enabled()
            .then(|| {
                self.inner
                    .ringing_call_notification(ringing_state, call_id, display_name, with_content_intent)
            })
            .flatten()
    }

    fn setting_up_notification(&self) -> Option<Notification> {
        self.enabled().then(|| self.inner.setting_up_notification()).flatten()
    }

    async fn on_call_notification_update(&self, call: Arc<dyn Call>) -> Option<Notification> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        if !self.enabled() {
            return None;
        }
        self.inner.on_call_notification_update(call).await
    }
}

/// Notification manager keeping the posted notifications by id
pub struct SimNotificationManager {
    log: EventLog,
    posted: Mutex<BTreeMap<i32, Notification>>,
    post_permission: AtomicBool,
}

impl SimNotificationManager {
    pub fn new(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            posted: Mutex::new(BTreeMap::new()),
            post_permission: AtomicBool::new(true),
        })
    }

    pub fn set_post_permission(&self, granted: bool) {
        self.post_permission.store(granted, Ordering::SeqCst);
    }

    pub fn posted(&self) -> BTreeMap<i32, Notification> {
        self.posted.lock().clone()
    }

    pub fn is_posted(&self, id: i32) -> bool {
        self.posted.lock().contains_key(&id)
    }
}

impl NotificationManager for SimNotificationManager {
    fn notify(&self, id: i32, notification: &Notification) -> Result<()> {
        if !self.has_post_permission() {
            return Err(ServiceError::platform("POST_NOTIFICATIONS not granted"));
        }
        self.posted.lock().insert(id, notification.clone());
        self.log.push(PlatformEvent::Notified {
            id,
            channel_id: notification.channel_id.clone(),
            title: notification.title.clone(),
        });
        Ok(())
    }

    fn cancel(&self, id: i32) {
        self.posted.lock().remove(&id);
        self.log.push(PlatformEvent::Cancelled { id });
    }

    fn has_post_permission(&self) -> bool {
        self.post_permission.load(Ordering::SeqCst)
    }
}

/// Foreground controls of one service class.
///
/// Promotion posts the notification through the shared manager, like the
/// platform does.
pub struct SimForeground {
    service_class: ServiceClass,
    log: EventLog,
    notifications: Arc<SimNotificationManager>,
    fail_promotion: Arc<AtomicBool>,
}

impl ForegroundController for SimForeground {
    fn start_foreground(&self, id: i32, notification: &Notification, types: ForegroundServiceTypes) -> Result<()> {
        if self.fail_promotion.load(Ordering::SeqCst) {
            return Err(ServiceError::platform("foreground service start not allowed"));
        }
        self.notifications.posted.lock().insert(id, notification.clone());
        self.log.push(PlatformEvent::ForegroundStarted {
            service_class: self.service_class,
            id,
            channel_id: notification.channel_id.clone(),
            types: types.bits(),
        });
        Ok(())
    }

    fn stop_foreground(&self) {
        self.log.push(PlatformEvent::ForegroundStopped {
            service_class: self.service_class,
        });
    }

    fn stop_self(&self) {
        self.log.push(PlatformEvent::StoppedSelf {
            service_class: self.service_class,
        });
    }
}

/// Sound player of one service class
pub struct SimSoundPlayer {
    service_class: ServiceClass,
    log: EventLog,
    playing: Mutex<Option<Sound>>,
}

impl SimSoundPlayer {
    pub fn playing(&self) -> Option<Sound> {
        *self.playing.lock()
    }
}

impl SoundPlayer for SimSoundPlayer {
    fn play(&self, sound: Sound, _play_if_muted: bool) {
        *self.playing.lock() = Some(sound);
        let sound = match sound {
            Sound::Incoming => "incoming",
            Sound::Outgoing => "outgoing",
        };
        self.log.push(PlatformEvent::SoundPlayed {
            service_class: self.service_class,
            sound: sound.to_string(),
        });
    }

    fn stop(&self) {
        self.playing.lock().take();
        self.log.push(PlatformEvent::SoundStopped {
            service_class: self.service_class,
        });
    }

    fn vibrate(&self) {
        self.log.push(PlatformEvent::Vibrated {
            service_class: self.service_class,
        });
    }

    fn release(&self) {
        self.playing.lock().take();
        self.log.push(PlatformEvent::SoundReleased {
            service_class: self.service_class,
        });
    }
}

/// Screen receiver that fails on double registration like the platform
pub struct SimScreenReceiver {
    service_class: ServiceClass,
    log: EventLog,
    registered: Mutex<bool>,
}

impl ScreenStateReceiver for SimScreenReceiver {
    fn register(&self) -> Result<()> {
        let mut registered = self.registered.lock();
        if *registered {
            return Err(ServiceError::platform("receiver already registered"));
        }
        *registered = true;
        self.log.push(PlatformEvent::ReceiverRegistered {
            service_class: self.service_class,
        });
        Ok(())
    }

    fn unregister(&self) -> Result<()> {
        let mut registered = self.registered.lock();
        if !*registered {
            return Err(ServiceError::platform("receiver not registered"));
        }
        *registered = false;
        self.log.push(PlatformEvent::ReceiverUnregistered {
            service_class: self.service_class,
        });
        Ok(())
    }
}

/// Permission checker with a mutable grant set; everything is granted initially
pub struct SimPermissionChecker {
    granted: RwLock<Vec<Permission>>,
}

impl Default for SimPermissionChecker {
    fn default() -> Self {
        Self {
            granted: RwLock::new(vec![
                Permission::Camera,
                Permission::RecordAudio,
                Permission::PostNotifications,
                Permission::BluetoothConnect,
            ]),
        }
    }
}

impl SimPermissionChecker {
    pub fn grant_only(&self, permissions: &[Permission]) {
        *self.granted.write() = permissions.to_vec();
    }

    pub fn deny(&self, permission: Permission) {
        self.granted.write().retain(|p| *p != permission);
    }
}

impl PermissionChecker for SimPermissionChecker {
    fn check_permissions(&self, call: &dyn Call, required: &[Permission]) -> PermissionCheck {
        let granted = self.granted.read();
        debug!("Checking permissions (call_id: {}, required: {:?})", call.id(), required);
        let missing: Vec<String> = required
            .iter()
            .filter(|p| !granted.contains(p))
            .map(|p| p.as_str().to_string())
            .collect();
        if missing.is_empty() {
            PermissionCheck::granted()
        } else {
            PermissionCheck::denied(missing)
        }
    }

    fn granted(&self) -> Vec<Permission> {
        self.granted.read().clone()
    }
}

/// Platform facilities shared across service classes
#[derive(Clone)]
pub struct SimPlatform {
    pub log: EventLog,
    pub notifications: Arc<SimNotificationManager>,
    pub permissions: Arc<SimPermissionChecker>,
    sound_players: Arc<DashMap<ServiceClass, Arc<SimSoundPlayer>>>,
    fail_promotion: Arc<AtomicBool>,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new(EventLog::new())
    }
}

impl SimPlatform {
    pub fn new(log: EventLog) -> Self {
        Self {
            notifications: SimNotificationManager::new(log.clone()),
            permissions: Arc::new(SimPermissionChecker::default()),
            sound_players: Arc::new(DashMap::new()),
            fail_promotion: Arc::new(AtomicBool::new(false)),
            log,
        }
    }

    /// Make every foreground promotion fail
    pub fn fail_foreground_promotion(&self, fail: bool) {
        self.fail_promotion.store(fail, Ordering::SeqCst);
    }

    pub fn sound_player(&self, service_class: ServiceClass) -> Arc<SimSoundPlayer> {
        self.sound_players
            .entry(service_class)
            .or_insert_with(|| {
                Arc::new(SimSoundPlayer {
                    service_class,
                    log: self.log.clone(),
                    playing: Mutex::new(None),
                })
            })
            .clone()
    }

    /// Facilities of a fresh instance of `service_class`
    pub fn services_for(&self, service_class: ServiceClass) -> PlatformServices {
        PlatformServices {
            notifications: self.notifications.clone(),
            foreground: Arc::new(SimForeground {
                service_class,
                log: self.log.clone(),
                notifications: self.notifications.clone(),
                fail_promotion: self.fail_promotion.clone(),
            }),
            sound: self.sound_player(service_class),
            screen_receiver: Arc::new(SimScreenReceiver {
                service_class,
                log: self.log.clone(),
                registered: Mutex::new(false),
            }),
            permissions: self.permissions.clone(),
        }
    }
}

struct PendingCommand {
    command: ServiceCommand,
    handle: CallServiceHandle,
    reply: oneshot::Receiver<Result<StartResult>>,
    redelivered: bool,
}

/// Service host running real [`CallService`] instances in-process.
///
/// Commands are queued on the addressed instance; [`settle`](Self::settle)
/// waits for their answers and redelivers commands the service asked to get
/// again once the stopping instance is gone.
pub struct SimServiceHost {
    platform: SimPlatform,
    client: Arc<dyn CallClient>,
    notification_source: Arc<dyn NotificationSource>,
    settings: ServiceSettings,
    services: DashMap<ServiceClass, CallServiceHandle>,
    pending: Mutex<Vec<PendingCommand>>,
    results: Mutex<Vec<(ServiceCommand, Result<StartResult>)>>,
    fail_running_query: AtomicBool,
    forbid_foreground_start: AtomicBool,
    forbid_background_start: AtomicBool,
}

impl SimServiceHost {
    pub fn new(
        platform: SimPlatform,
        client: Arc<dyn CallClient>,
        notification_source: Arc<dyn NotificationSource>,
        settings: ServiceSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            platform,
            client,
            notification_source,
            settings,
            services: DashMap::new(),
            pending: Mutex::new(Vec::new()),
            results: Mutex::new(Vec::new()),
            fail_running_query: AtomicBool::new(false),
            forbid_foreground_start: AtomicBool::new(false),
            forbid_background_start: AtomicBool::new(false),
        })
    }

    pub fn fail_running_query(&self, fail: bool) {
        self.fail_running_query.store(fail, Ordering::SeqCst);
    }

    pub fn forbid_foreground_start(&self, forbid: bool) {
        self.forbid_foreground_start.store(forbid, Ordering::SeqCst);
    }

    pub fn forbid_background_start(&self, forbid: bool) {
        self.forbid_background_start.store(forbid, Ordering::SeqCst);
    }

    /// Live (or most recent) instance of a class
    pub fn service(&self, service_class: ServiceClass) -> Option<CallServiceHandle> {
        self.services.get(&service_class).map(|h| h.clone())
    }

    /// Answers of every command handled so far
    pub fn results(&self) -> Vec<(ServiceCommand, Result<StartResult>)> {
        self.results.lock().clone()
    }

    fn instance(&self, service_class: ServiceClass) -> CallServiceHandle {
        if let Some(handle) = self.services.get(&service_class) {
            if !handle.is_stopped() {
                return handle.clone();
            }
        }
        info!("Creating service instance (service: {})", service_class);
        let deps = ServiceDeps {
            client: self.client.clone(),
            notification_source: self.notification_source.clone(),
            platform: self.platform.services_for(service_class),
            settings: self.settings.clone(),
        };
        let handle = CallService::spawn(ServiceProfile::for_class(service_class), deps);
        self.services.insert(service_class, handle.clone());
        handle
    }

    fn deliver(&self, command: ServiceCommand, redelivered: bool) -> Result<()> {
        let handle = self.instance(command.service_class);
        let reply = handle.dispatch(command.clone())?;
        self.pending.lock().push(PendingCommand {
            command,
            handle,
            reply,
            redelivered,
        });
        Ok(())
    }

    /// Wait until every delivered command was answered and observers caught up
    pub async fn settle(&self) {
        loop {
            let pending = std::mem::take(&mut *self.pending.lock());
            if pending.is_empty() {
                break;
            }
            for p in pending {
                let result = p.reply.await.unwrap_or(Err(ServiceError::ServiceStopped));
                self.platform.log.push(PlatformEvent::CommandHandled {
                    service_class: p.command.service_class,
                    result: match &result {
                        Ok(r) => format!("{:?}", r),
                        Err(e) => e.to_string(),
                    },
                });
                // Only an instance on its way out hands the command to a successor
                let redeliver = matches!(result, Ok(StartResult::RedeliverIntent))
                    && matches!(p.handle.lifecycle(), ServiceLifecycle::Stopping | ServiceLifecycle::Stopped)
                    && !p.redelivered
                    && p.command.call_id.is_some()
                    && p.command.trigger.is_some();
                self.results.lock().push((p.command.clone(), result));
                if redeliver {
                    p.handle.wait_stopped().await;
                    debug!("Redelivering command (command: {:?})", p.command);
                    if let Err(e) = self.deliver(p.command, true) {
                        warn!("Redelivery failed: {}", e);
                    }
                }
            }
        }
        // Let observer tasks drain what the commands caused
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

impl ServiceHost for SimServiceHost {
    fn running_services(&self) -> Result<Vec<ServiceClass>> {
        if self.fail_running_query.load(Ordering::SeqCst) {
            return Err(ServiceError::platform("running services query failed"));
        }
        Ok(self
            .services
            .iter()
            .filter(|entry| !entry.value().is_stopped())
            .map(|entry| *entry.key())
            .collect())
    }

    fn start_foreground_service(&self, command: ServiceCommand) -> Result<()> {
        if self.forbid_foreground_start.load(Ordering::SeqCst) {
            return Err(ServiceError::platform("foreground service start not allowed"));
        }
        self.platform.log.push(PlatformEvent::ServiceStarted {
            command: command.clone(),
            foreground: true,
        });
        self.deliver(command, false)
    }

    fn start_service(&self, command: ServiceCommand) -> Result<()> {
        if self.forbid_background_start.load(Ordering::SeqCst) {
            return Err(ServiceError::platform("background service start not allowed"));
        }
        self.platform.log.push(PlatformEvent::ServiceStarted {
            command: command.clone(),
            foreground: false,
        });
        self.deliver(command, false)
    }
}

/// Control of a call registered with [`SimCallsManager`]
pub struct SimCallControl {
    log: EventLog,
    fail: Arc<AtomicBool>,
}

impl SimCallControl {
    fn check(&self, action: &str) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::telecom(format!("{} rejected by the system", action)));
        }
        Ok(())
    }
}

#[async_trait]
impl CallControl for SimCallControl {
    async fn answer(&self, video: bool) -> Result<()> {
        self.check("answer")?;
        self.log.push(PlatformEvent::TelecomAnswered { video });
        Ok(())
    }

    async fn set_active(&self) -> Result<()> {
        self.check("set_active")?;
        self.log.push(PlatformEvent::TelecomActivated);
        Ok(())
    }

    async fn set_inactive(&self) -> Result<()> {
        self.check("set_inactive")?;
        self.log.push(PlatformEvent::TelecomDeactivated);
        Ok(())
    }

    async fn disconnect(&self, cause: DisconnectCause) -> Result<()> {
        self.check("disconnect")?;
        self.log.push(PlatformEvent::TelecomDisconnected { cause });
        Ok(())
    }
}

/// Simulated system call manager
pub struct SimCallsManager {
    log: EventLog,
    usable: AtomicBool,
    fail_add: AtomicBool,
    fail_control: Arc<AtomicBool>,
    system: Mutex<Option<mpsc::UnboundedSender<PlatformCallEvent>>>,
}

impl SimCallsManager {
    pub fn new(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            usable: AtomicBool::new(true),
            fail_add: AtomicBool::new(false),
            fail_control: Arc::new(AtomicBool::new(false)),
            system: Mutex::new(None),
        })
    }

    pub fn set_usable(&self, usable: bool) {
        self.usable.store(usable, Ordering::SeqCst);
    }

    pub fn fail_registration(&self, fail: bool) {
        self.fail_add.store(fail, Ordering::SeqCst);
    }

    pub fn fail_control(&self, fail: bool) {
        self.fail_control.store(fail, Ordering::SeqCst);
    }

    /// Act from the system call UI; false when no call is registered
    pub fn system_action(&self, event: PlatformCallEvent) -> bool {
        match self.system.lock().as_ref() {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl CallsManager for SimCallsManager {
    fn can_use_telecom(&self) -> bool {
        self.usable.load(Ordering::SeqCst)
    }

    async fn add_call(
        &self,
        attributes: CallAttributes,
        events: mpsc::UnboundedSender<PlatformCallEvent>,
    ) -> Result<Arc<dyn CallControl>> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(ServiceError::telecom("addCall failed"));
        }
        self.log.push(PlatformEvent::TelecomCallAdded {
            display_name: attributes.display_name,
            incoming: attributes.incoming,
        });
        *self.system.lock() = Some(events);
        Ok(Arc::new(SimCallControl {
            log: self.log.clone(),
            fail: self.fail_control.clone(),
        }))
    }
}

/// A complete simulated environment wired together
pub struct SimEnvironment {
    pub client: Arc<SimClient>,
    pub platform: SimPlatform,
    pub host: Arc<SimServiceHost>,
    pub notification_source: Arc<SimNotificationSource>,
    pub calls_manager: Arc<SimCallsManager>,
}

impl SimEnvironment {
    pub fn new(user_id: &str, settings: ServiceSettings) -> Self {
        let platform = SimPlatform::default();
        let client = SimClient::new(user_id);
        let notification_source = SimNotificationSource::new();
        let host = SimServiceHost::new(platform.clone(), client.clone(), notification_source.clone(), settings);
        let calls_manager = SimCallsManager::new(platform.log.clone());
        Self {
            client,
            platform,
            host,
            notification_source,
            calls_manager,
        }
    }

    pub fn log(&self) -> &EventLog {
        &self.platform.log
    }
}
