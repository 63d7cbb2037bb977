//! Call-type routing driven by configuration files and presets

mod common;

use std::time::Duration;

use common::harness_with;
use ringline_service_core::config::{AudioUsage, ConfigFile, Preset};
use ringline_service_core::model::{CallId, Trigger};
use ringline_service_core::profile::ServiceClass;
use ringline_service_core::sim::PlatformEvent;
use ringline_service_core::{ServiceError, ServiceLifecycle, StopForegroundServiceSource};

const CONFIG: &str = r#"
[settings]
stop_debounce_threshold = 500
vibrate_on_incoming = true

[types."*"]
enable_telecom = false

[types.livestream]
service_class = "livestream_host"
audio_usage = "media"

[types.lobby]
run_in_foreground = false
"#;

#[tokio::test(start_paused = true)]
async fn config_file_routes_call_types_to_service_classes() {
    let (registry, settings) = ConfigFile::from_toml_str(CONFIG).unwrap().into_parts();
    assert_eq!(settings.stop_debounce_threshold, Duration::from_millis(500));
    assert!(settings.vibrate_on_incoming);
    assert_eq!(registry.get("livestream").unwrap().audio_usage, AudioUsage::Media);

    let h = harness_with(registry, settings);
    let live = CallId::new("livestream", "show");
    h.launcher.show_on_going_call(&live, Trigger::OnGoingCall).unwrap();
    h.settle().await;

    assert_eq!(
        h.service_of(ServiceClass::LivestreamHost).current_call_id(),
        Some(live)
    );
    assert!(h.env.host.service(ServiceClass::Call).is_none());
}

#[tokio::test(start_paused = true)]
async fn unlisted_call_types_use_the_fallback() {
    let (registry, settings) = ConfigFile::from_toml_str(CONFIG).unwrap().into_parts();
    let h = harness_with(registry, settings);

    h.launcher
        .show_on_going_call(&CallId::new("team_sync", "1"), Trigger::OnGoingCall)
        .unwrap();
    h.settle().await;

    assert!(h.service_of(ServiceClass::Call).lifecycle().is_running());
}

#[tokio::test(start_paused = true)]
async fn background_only_call_types_never_start_a_service() {
    let (registry, settings) = ConfigFile::from_toml_str(CONFIG).unwrap().into_parts();
    let h = harness_with(registry, settings);

    h.launcher
        .show_on_going_call(&CallId::new("lobby", "1"), Trigger::OnGoingCall)
        .unwrap();
    h.settle().await;

    assert_eq!(h.count(|e| matches!(e, PlatformEvent::ServiceStarted { .. })), 0);
}

#[tokio::test(start_paused = true)]
async fn shorter_threshold_stops_sooner() {
    let (registry, settings) = ConfigFile::from_toml_str(CONFIG).unwrap().into_parts();
    let h = harness_with(registry, settings);
    let id = CallId::new("default", "c1");
    h.launcher.show_on_going_call(&id, Trigger::OnGoingCall).unwrap();
    h.settle().await;
    h.advance(600).await;

    h.launcher
        .stop_service(&id, StopForegroundServiceSource::CallAccept)
        .await
        .unwrap();
    h.settle().await;

    assert!(h.service().is_stopped());
}

#[tokio::test(start_paused = true)]
async fn preset_viewer_gets_its_own_class() {
    let registry = Preset::LivestreamGuest.registry();
    let h = harness_with(registry, Default::default());
    let id = CallId::new("livestream", "watch");

    h.launcher.show_on_going_call(&id, Trigger::OnGoingCall).unwrap();
    h.settle().await;

    let viewer = h.service_of(ServiceClass::LivestreamViewer);
    assert_eq!(viewer.lifecycle(), ServiceLifecycle::Running(Trigger::OnGoingCall));
    let stable = id.stable_hash();
    assert!(h.count(|e| matches!(e, PlatformEvent::ForegroundStarted { id, .. } if *id == stable)) > 0);
}

#[test]
fn missing_fallback_is_reported() {
    let file = ConfigFile::from_toml_str("[types.default]\nrun_in_foreground = true\n").unwrap();
    let (registry, _) = file.into_parts();

    assert!(registry.get("default").is_ok());
    assert!(matches!(
        registry.get("livestream"),
        Err(ServiceError::ConfigNotFound { call_type }) if call_type == "livestream"
    ));
}

#[test]
fn malformed_file_is_a_config_error() {
    let err = ConfigFile::from_toml_str("[types.default]\nservice_class = \"spaceship\"\n").unwrap_err();
    assert!(matches!(err, ServiceError::Config { .. }));
}
