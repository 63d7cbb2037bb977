//! Shared setup for the service-core integration tests
//!
//! Every test runs against the in-memory platform in `sim`; assertions are
//! made on the platform event log and on the simulated calls.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use ringline_service_core::config::{CallServiceConfigRegistry, ServiceSettings};
use ringline_service_core::launcher::ServiceLauncher;
use ringline_service_core::model::CallId;
use ringline_service_core::profile::ServiceClass;
use ringline_service_core::service::CallServiceHandle;
use ringline_service_core::sim::{PlatformEvent, SimCall, SimEnvironment};

pub const ME: &str = "me";

/// A simulated environment plus a launcher wired to it
pub struct Harness {
    pub env: SimEnvironment,
    pub launcher: ServiceLauncher,
}

pub fn harness() -> Harness {
    harness_with(CallServiceConfigRegistry::default(), ServiceSettings::default())
}

pub fn harness_with(registry: CallServiceConfigRegistry, settings: ServiceSettings) -> Harness {
    let env = SimEnvironment::new(ME, settings.clone());
    let launcher = ServiceLauncher::new(
        env.client.clone(),
        env.host.clone(),
        env.platform.notifications.clone(),
        env.notification_source.clone(),
        registry,
        settings,
    )
    .with_telecom(env.calls_manager.clone());
    Harness { env, launcher }
}

pub fn call_id(id: &str) -> CallId {
    CallId::new("default", id)
}

impl Harness {
    pub fn call(&self, id: &CallId) -> Arc<SimCall> {
        self.env.client.sim_call(id)
    }

    pub fn service(&self) -> CallServiceHandle {
        self.service_of(ServiceClass::Call)
    }

    pub fn service_of(&self, class: ServiceClass) -> CallServiceHandle {
        self.env
            .host
            .service(class)
            .unwrap_or_else(|| panic!("no {} instance was started", class))
    }

    pub async fn settle(&self) {
        self.env.host.settle().await;
    }

    /// Let (paused) time pass, then settle
    pub async fn advance(&self, millis: u64) {
        tokio::time::sleep(Duration::from_millis(millis)).await;
        self.settle().await;
    }

    pub fn events(&self) -> Vec<PlatformEvent> {
        self.env.log().snapshot()
    }

    /// How many times an instance ran its internal stop sequence
    pub fn internal_stops(&self) -> usize {
        self.env
            .log()
            .count(|e| matches!(e, PlatformEvent::StoppedSelf { .. }))
    }

    pub fn count(&self, predicate: impl Fn(&PlatformEvent) -> bool) -> usize {
        self.env.log().count(predicate)
    }

    pub fn position(&self, predicate: impl Fn(&PlatformEvent) -> bool) -> usize {
        self.env
            .log()
            .position(predicate)
            .unwrap_or_else(|| panic!("event not found in {:#?}", self.events()))
    }
}
