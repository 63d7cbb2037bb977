use std::time::Duration;

use anyhow::{bail, Result};
use clap::ValueEnum;
use ringline_service_core::config::{CallServiceConfigRegistry, ServiceSettings};
use ringline_service_core::model::{CallEvent, CallId, RingingState, Trigger};
use ringline_service_core::sim::{PlatformEvent, SimEnvironment};
use ringline_service_core::telecom::PlatformCallEvent;
use ringline_service_core::{ServiceLauncher, ShowIncomingCallResult, StopForegroundServiceSource};
use tracing::{debug, info};

const USER: &str = "demo-user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Incoming call accepted on this device, then ended remotely
    Incoming,
    /// Outgoing call answered by the callee, then hung up locally
    Outgoing,
    /// Incoming call nobody answers
    Missed,
    /// A second call rings while the first one is active
    Busy,
    /// The app is swiped away during a call
    TaskRemoved,
}

struct Driver {
    env: SimEnvironment,
    launcher: ServiceLauncher,
    settings: ServiceSettings,
}

impl Driver {
    fn new(registry: CallServiceConfigRegistry, settings: ServiceSettings) -> Self {
        let env = SimEnvironment::new(USER, settings.clone());
        let launcher = ServiceLauncher::new(
            env.client.clone(),
            env.host.clone(),
            env.platform.notifications.clone(),
            env.notification_source.clone(),
            registry,
            settings.clone(),
        )
        .with_telecom(env.calls_manager.clone());
        Self {
            env,
            launcher,
            settings,
        }
    }

    async fn settle(&self) {
        self.env.host.settle().await;
    }

    /// Wait out the stop debounce so deferred stops become visible
    async fn linger(&self) {
        tokio::time::sleep(self.settings.stop_debounce_threshold + Duration::from_millis(100)).await;
        self.settle().await;
    }

    async fn incoming(&self, call_id: &CallId) -> Result<()> {
        let result = self.launcher.show_incoming_call(call_id, Some("Alice"), false).await?;
        info!("Incoming call shown (result: {})", result);
        if result == ShowIncomingCallResult::Error {
            bail!("incoming call for {} could not be shown", call_id);
        }
        self.env
            .client
            .sim_call(call_id)
            .set_ringing_state(RingingState::Incoming { accepted_by_me: false });
        self.settle().await;
        Ok(())
    }
}

/// Replay `scenario` and return the platform event log
pub async fn run(
    scenario: Scenario,
    call_type: &str,
    registry: CallServiceConfigRegistry,
    settings: ServiceSettings,
) -> Result<Vec<PlatformEvent>> {
    let driver = Driver::new(registry, settings);
    let first = CallId::new(call_type, "demo-1");
    let call = driver.env.client.sim_call(&first);

    match scenario {
        Scenario::Incoming => {
            driver.incoming(&first).await?;
            let answered = driver
                .env
                .calls_manager
                .system_action(PlatformCallEvent::Answer { video: false });
            if !answered {
                call.set_ringing_state(RingingState::Active);
            }
            driver.env.client.set_active_call(Some(&first));
            driver.launcher.show_on_going_call(&first, Trigger::OnGoingCall)?;
            driver.settle().await;
            call.set_remote_participants(&["alice"]);
            driver.linger().await;
            call.emit(CallEvent::Ended);
        }
        Scenario::Outgoing => {
            driver.launcher.show_outgoing_call(&first, Some("Bob"), false).await?;
            driver.settle().await;
            call.set_ringing_state(RingingState::Outgoing { accepted_by_callee: false });
            driver.settle().await;
            call.set_ringing_state(RingingState::Active);
            driver.env.client.set_active_call(Some(&first));
            driver.launcher.show_on_going_call(&first, Trigger::OnGoingCall)?;
            driver.linger().await;
            driver
                .launcher
                .stop_service(&first, StopForegroundServiceSource::RemoveActiveCall)
                .await?;
        }
        Scenario::Missed => {
            driver.incoming(&first).await?;
            call.set_ringing_state(RingingState::TimeoutNoAnswer);
            call.emit(CallEvent::Missed);
        }
        Scenario::Busy => {
            call.set_ringing_state(RingingState::Active);
            driver.env.client.set_active_call(Some(&first));
            driver.launcher.show_on_going_call(&first, Trigger::OnGoingCall)?;
            driver.settle().await;

            let second = CallId::new(call_type, "demo-2");
            driver.incoming(&second).await?;
            driver.launcher.remove_incoming_call(&second)?;
            driver.settle().await;
            call.emit(CallEvent::Ended);
        }
        Scenario::TaskRemoved => {
            driver.launcher.show_outgoing_call(&first, None, false).await?;
            driver.settle().await;
            call.set_ringing_state(RingingState::Outgoing { accepted_by_callee: false });
            driver.settle().await;
            match driver.env.host.service(driver.launcher.registry().get(call_type)?.service_class) {
                Some(service) => service.task_removed().await?,
                None => bail!("no service instance is running for {}", call_type),
            }
        }
    }

    driver.settle().await;
    driver.linger().await;
    debug!("Scenario finished (events: {})", driver.env.log().count(|_| true));
    Ok(driver.env.log().snapshot())
}
