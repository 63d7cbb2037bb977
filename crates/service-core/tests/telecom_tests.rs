//! Launcher flows with telephony registration enabled

mod common;

use common::{call_id, harness_with, Harness};
use ringline_service_core::config::{CallServiceConfigRegistry, ServiceSettings};
use ringline_service_core::model::{CallEvent, RingingState};
use ringline_service_core::sim::{CallAction, PlatformEvent};
use ringline_service_core::telecom::{DisconnectCause, PlatformCallEvent, TelecomCallState};
use ringline_service_core::{ShowIncomingCallResult, StopForegroundServiceSource};

fn telecom_harness() -> Harness {
    let registry = CallServiceConfigRegistry::default();
    registry.update("*", |b| b.with_telecom(true));
    harness_with(registry, ServiceSettings::default())
}

#[tokio::test(start_paused = true)]
async fn incoming_call_answered_from_system_ui_joins() {
    let h = telecom_harness();
    let id = call_id("c1");

    let result = h.launcher.show_incoming_call(&id, Some("Bob"), true).await.unwrap();
    h.settle().await;
    assert_eq!(result, ShowIncomingCallResult::PromotedToForeground);
    assert!(h.events().contains(&PlatformEvent::TelecomCallAdded {
        display_name: "Bob".to_string(),
        incoming: true,
    }));

    let call = h.call(&id);
    call.set_ringing_state(RingingState::Incoming { accepted_by_me: false });
    assert!(h.env.calls_manager.system_action(PlatformCallEvent::Answer { video: true }));
    h.settle().await;

    let actions = call.actions();
    assert!(actions.contains(&CallAction::Accept));
    assert!(actions.contains(&CallAction::Join));
    let bridge = h.launcher.telecom_bridge(&id).unwrap();
    assert!(bridge.state().is_registered());
}

#[tokio::test(start_paused = true)]
async fn ended_call_disconnects_registration() {
    let h = telecom_harness();
    let id = call_id("c1");
    h.launcher.show_incoming_call(&id, None, false).await.unwrap();
    h.settle().await;

    let bridge = h.launcher.telecom_bridge(&id).unwrap();

    h.call(&id).emit(CallEvent::Ended);
    h.settle().await;

    assert!(h.events().contains(&PlatformEvent::TelecomDisconnected {
        cause: DisconnectCause::Local
    }));
    assert_eq!(
        bridge.state(),
        TelecomCallState::Disconnected {
            cause: DisconnectCause::Local
        }
    );
    assert!(h.launcher.telecom_bridge(&id).is_none());
}

#[tokio::test(start_paused = true)]
async fn system_disconnect_releases_the_registration() {
    let h = telecom_harness();
    let first = call_id("c1");
    h.launcher.show_incoming_call(&first, Some("Bob"), false).await.unwrap();
    h.settle().await;

    assert!(h.env.calls_manager.system_action(PlatformCallEvent::Disconnect {
        cause: DisconnectCause::Remote
    }));
    h.settle().await;
    assert!(h.launcher.telecom_bridge(&first).is_none());

    let second = call_id("c2");
    h.launcher.show_incoming_call(&second, Some("Carol"), false).await.unwrap();
    assert!(h.launcher.telecom_bridge(&second).unwrap().state().is_registered());
}

#[tokio::test(start_paused = true)]
async fn outgoing_call_is_activated_after_delay() {
    let h = telecom_harness();
    let id = call_id("c1");
    h.launcher.show_outgoing_call(&id, Some("Alice"), false).await.unwrap();
    h.settle().await;
    assert!(!h.events().contains(&PlatformEvent::TelecomActivated));

    h.advance(2_100).await;

    assert!(h.events().contains(&PlatformEvent::TelecomActivated));
}

#[tokio::test(start_paused = true)]
async fn unusable_telecom_still_shows_the_call() {
    let h = telecom_harness();
    h.env.calls_manager.set_usable(false);
    let id = call_id("c1");

    let result = h.launcher.show_incoming_call(&id, None, false).await.unwrap();
    h.settle().await;

    assert_eq!(result, ShowIncomingCallResult::PromotedToForeground);
    assert_eq!(h.count(|e| matches!(e, PlatformEvent::TelecomCallAdded { .. })), 0);
    assert!(h.launcher.telecom_bridge(&id).is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_registration_does_not_fail_the_show() {
    let h = telecom_harness();
    h.env.calls_manager.fail_registration(true);
    let id = call_id("c1");

    let result = h.launcher.show_incoming_call(&id, None, false).await.unwrap();
    h.settle().await;

    assert_eq!(result, ShowIncomingCallResult::PromotedToForeground);
    assert!(!h.env.calls_manager.system_action(PlatformCallEvent::Reject));
}

#[tokio::test(start_paused = true)]
async fn removing_active_call_disconnects_before_stopping() {
    let h = telecom_harness();
    let id = call_id("c1");
    h.launcher.show_outgoing_call(&id, None, false).await.unwrap();
    h.settle().await;
    h.advance(2_500).await;

    h.launcher
        .stop_service(&id, StopForegroundServiceSource::RemoveActiveCall)
        .await
        .unwrap();
    h.settle().await;

    let disconnected = h.position(|e| {
        matches!(e, PlatformEvent::TelecomDisconnected { cause } if *cause == DisconnectCause::Local)
    });
    let stopped = h.position(|e| matches!(e, PlatformEvent::StoppedSelf { .. }));
    assert!(disconnected < stopped);
    assert!(h.launcher.telecom_bridge(&id).is_none());
}
