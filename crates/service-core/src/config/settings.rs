use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::duration_ms;
use crate::recovery::RetryConfig;

/// Process-wide switches shared by every call service instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Fail the command with an error instead of aborting quietly when
    /// runtime permissions are missing
    pub crash_on_missing_permission: bool,
    /// Keep the foreground notification in sync with call state
    pub update_notifications: bool,
    pub vibrate_on_incoming: bool,
    pub play_incoming_sound_if_muted: bool,
    pub play_outgoing_sound_if_muted: bool,
    /// Minimum service age before a stop executes
    #[serde(with = "duration_ms")]
    pub stop_debounce_threshold: Duration,
    /// Minimum delay of a deferred stop
    #[serde(with = "duration_ms")]
    pub stop_throttle_interval: Duration,
    /// Delay between telecom registration and activating an outgoing call
    #[serde(with = "duration_ms")]
    pub telecom_activation_delay: Duration,
    /// Backoff for re-establishing the client connection
    pub connect_retry: RetryConfig,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            crash_on_missing_permission: false,
            update_notifications: true,
            vibrate_on_incoming: false,
            play_incoming_sound_if_muted: false,
            play_outgoing_sound_if_muted: false,
            stop_debounce_threshold: Duration::from_millis(2000),
            stop_throttle_interval: Duration::from_millis(1000),
            telecom_activation_delay: Duration::from_millis(2000),
            connect_retry: RetryConfig::default(),
        }
    }
}

impl ServiceSettings {
    pub fn with_crash_on_missing_permission(mut self, crash: bool) -> Self {
        self.crash_on_missing_permission = crash;
        self
    }

    pub fn with_update_notifications(mut self, enabled: bool) -> Self {
        self.update_notifications = enabled;
        self
    }

    pub fn with_vibrate_on_incoming(mut self, vibrate: bool) -> Self {
        self.vibrate_on_incoming = vibrate;
        self
    }

    pub fn with_connect_retry(mut self, retry: RetryConfig) -> Self {
        self.connect_retry = retry;
        self
    }
}
