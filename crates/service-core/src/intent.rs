//! Start and stop commands addressed to a call service class

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::CallServiceConfig;
use crate::errors::{Result, ServiceError};
use crate::model::{CallId, Trigger};
use crate::platform::ServiceHost;
use crate::profile::ServiceClass;

/// Command delivered by the platform to a service instance.
///
/// Fields are optional because the platform may redeliver a command that
/// lost its payload; the service validates them on receipt.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceCommand {
    pub service_class: ServiceClass,
    pub call_id: Option<CallId>,
    pub trigger: Option<Trigger>,
    pub display_name: Option<String>,
    /// Stop the service instead of handling a trigger
    pub stop: bool,
}

impl ServiceCommand {
    pub fn start(service_class: ServiceClass, call_id: CallId, trigger: Trigger) -> Self {
        Self {
            service_class,
            call_id: Some(call_id),
            trigger: Some(trigger),
            display_name: None,
            stop: false,
        }
    }

    pub fn stop(service_class: ServiceClass, call_id: Option<CallId>) -> Self {
        Self {
            service_class,
            call_id,
            trigger: None,
            display_name: None,
            stop: true,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

/// Builds commands for the service class configured for a call type
pub struct ServiceIntentBuilder {
    host: Arc<dyn ServiceHost>,
}

impl ServiceIntentBuilder {
    pub fn new(host: Arc<dyn ServiceHost>) -> Self {
        Self { host }
    }

    /// Start command for a trigger.
    ///
    /// The display name is only carried for incoming calls. `Trigger::None`
    /// is not something a service can be started for.
    pub fn build_start_command(
        &self,
        call_id: &CallId,
        trigger: Trigger,
        display_name: Option<&str>,
        config: &CallServiceConfig,
    ) -> Result<ServiceCommand> {
        if trigger == Trigger::None {
            return Err(ServiceError::UnknownTrigger {
                trigger: trigger.as_str().to_string(),
            });
        }
        let mut command = ServiceCommand::start(config.service_class, call_id.clone(), trigger);
        if trigger == Trigger::IncomingCall {
            command.display_name = display_name.map(str::to_string);
        }
        debug!(
            "Built start command (call_id: {}, trigger: {}, service: {})",
            call_id,
            trigger,
            config.service_class,
        );
        Ok(command)
    }

    /// Stop command for the configured class.
    ///
    /// Fails with [`ServiceError::ServiceNotRunning`] when no instance of the
    /// class is running: asking to stop something never started is a caller bug.
    pub fn build_stop_command(&self, call_id: Option<&CallId>, config: &CallServiceConfig) -> Result<ServiceCommand> {
        let service_class = config.service_class;
        if !self.is_service_running(service_class) {
            return Err(ServiceError::ServiceNotRunning {
                service_class: service_class.to_string(),
            });
        }
        Ok(ServiceCommand::stop(service_class, call_id.cloned()))
    }

    /// Whether an instance of the class is running.
    ///
    /// Answers `true` when the platform query fails so that callers never
    /// start a second foreground instance by mistake.
    pub fn is_service_running(&self, service_class: ServiceClass) -> bool {
        match self.host.running_services() {
            Ok(running) => running.contains(&service_class),
            Err(e) => {
                warn!("Query failed, assuming running (error: {}, service: {})", e, service_class);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FixedHost {
        running: Mutex<Option<Vec<ServiceClass>>>,
    }

    impl ServiceHost for FixedHost {
        fn running_services(&self) -> Result<Vec<ServiceClass>> {
            self.running
                .lock()
                .clone()
                .ok_or_else(|| ServiceError::platform("activity manager unavailable"))
        }

        fn start_foreground_service(&self, _command: ServiceCommand) -> Result<()> {
            Ok(())
        }

        fn start_service(&self, _command: ServiceCommand) -> Result<()> {
            Ok(())
        }
    }

    fn builder(running: Option<Vec<ServiceClass>>) -> ServiceIntentBuilder {
        let host = FixedHost {
            running: Mutex::new(running),
        };
        ServiceIntentBuilder::new(Arc::new(host))
    }

    fn call_id() -> CallId {
        CallId::new("default", "test-call-123")
    }

    #[test]
    fn outgoing_start_has_no_display_name() {
        let command = builder(Some(vec![]))
            .build_start_command(&call_id(), Trigger::OutgoingCall, Some("Alice"), &CallServiceConfig::default())
            .unwrap();
        assert_eq!(command.service_class, ServiceClass::Call);
        assert_eq!(command.call_id, Some(call_id()));
        assert_eq!(command.trigger, Some(Trigger::OutgoingCall));
        assert_eq!(command.display_name, None);
        assert!(!command.stop);
    }

    #[test]
    fn incoming_start_carries_display_name_and_class() {
        let config = CallServiceConfig::builder()
            .with_service_class(ServiceClass::LivestreamHost)
            .build();
        let command = builder(Some(vec![]))
            .build_start_command(&call_id(), Trigger::IncomingCall, Some("Alice"), &config)
            .unwrap();
        assert_eq!(command.service_class, ServiceClass::LivestreamHost);
        assert_eq!(command.display_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn none_trigger_is_rejected() {
        let err = builder(Some(vec![]))
            .build_start_command(&call_id(), Trigger::None, None, &CallServiceConfig::default())
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnknownTrigger { .. }));
    }

    #[test]
    fn stop_for_running_class() {
        let command = builder(Some(vec![ServiceClass::Call]))
            .build_stop_command(Some(&call_id()), &CallServiceConfig::default())
            .unwrap();
        assert!(command.stop);
        assert_eq!(command.call_id, Some(call_id()));
    }

    #[test]
    fn stop_for_class_not_running_is_an_error() {
        let err = builder(Some(vec![ServiceClass::LivestreamHost]))
            .build_stop_command(None, &CallServiceConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::ServiceNotRunning {
                service_class: "CallService".to_string()
            }
        );
    }

    #[test]
    fn failed_query_assumes_running() {
        let builder = builder(None);
        assert!(builder.is_service_running(ServiceClass::AudioCall));
        assert!(builder.build_stop_command(None, &CallServiceConfig::default()).is_ok());
    }
}
