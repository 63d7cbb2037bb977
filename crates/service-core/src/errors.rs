//! Error types for the call service layer

use thiserror::Error;

/// Result type for call service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors that can occur while orchestrating call services
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// No config registered for the call type and no any-type fallback either
    #[error("No call service config registered for call type '{call_type}' and no fallback is registered")]
    ConfigNotFound { call_type: String },

    /// Configuration could not be parsed or is inconsistent
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Trigger name outside the closed trigger vocabulary
    #[error("Unknown trigger '{trigger}'")]
    UnknownTrigger { trigger: String },

    /// Composite call id that is not of the form `type:id`
    #[error("Invalid call id '{cid}'")]
    InvalidCallId { cid: String },

    /// A stop was requested for a service class that is not running
    #[error("Service {service_class} is not running")]
    ServiceNotRunning { service_class: String },

    /// Runtime permissions required by the call are missing
    #[error("Missing permissions: {}", missing.join(", "))]
    MissingPermissions { missing: Vec<String> },

    /// A platform command is missing required fields
    #[error("Invalid service command: {reason}")]
    InvalidCommand { reason: String },

    /// Platform primitive failed (service start, foreground promotion, ...)
    #[error("Platform error: {message}")]
    Platform { message: String },

    /// The call collaborator reported a failure
    #[error("Call error: {message}")]
    Call { message: String },

    /// Platform telephony integration failed
    #[error("Telecom error: {message}")]
    Telecom { message: String },

    /// A state machine received an event that is not valid in its state
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    /// The service worker is gone
    #[error("Service has stopped")]
    ServiceStopped,
}

impl ServiceError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid command error
    pub fn invalid_command(reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            reason: reason.into(),
        }
    }

    /// Create a platform error
    pub fn platform(message: impl Into<String>) -> Self {
        Self::Platform {
            message: message.into(),
        }
    }

    /// Create a call error
    pub fn call(message: impl Into<String>) -> Self {
        Self::Call {
            message: message.into(),
        }
    }

    /// Create a telecom error
    pub fn telecom(message: impl Into<String>) -> Self {
        Self::Telecom {
            message: message.into(),
        }
    }

    /// Create an invalid transition error
    pub fn invalid_transition(from: impl std::fmt::Debug, event: impl std::fmt::Debug) -> Self {
        Self::InvalidTransition {
            from: format!("{:?}", from),
            event: format!("{:?}", event),
        }
    }

    /// Whether retrying the failed operation later can succeed.
    ///
    /// Developer misconfiguration (missing fallback config, stop of a service
    /// that never ran, unknown triggers) is never recoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidCommand { .. } | Self::Platform { .. } | Self::Call { .. } | Self::Telecom { .. }
        )
    }
}
