//! Per-call-type service configuration
//!
//! Every call type (`default`, `livestream`, `audio_room`, ...) resolves to a
//! [`CallServiceConfig`] through the [`CallServiceConfigRegistry`]. Lookups
//! fall back to the entry registered under [`ANY_MARKER`] when a type has no
//! entry of its own.
//!
//! # Key Components
//!
//! - **CallServiceConfig** - foreground mode, audio usage, service class,
//!   telecom integration and moderation for one call type
//! - **CallServiceConfigBuilder** - copy-then-patch builder used by
//!   registration and updates
//! - **CallServiceConfigRegistry** - the call-type map
//! - **ServiceSettings** - process-wide switches shared by every service
//!
//! # Usage Examples
//!
//! ```rust
//! use ringline_service_core::config::{CallServiceConfigRegistry, AudioUsage};
//! use ringline_service_core::profile::ServiceClass;
//!
//! let registry = CallServiceConfigRegistry::default();
//! registry.register_with("livestream", |b| {
//!     b.with_service_class(ServiceClass::LivestreamHost)
//!         .with_audio_usage(AudioUsage::Media)
//! });
//!
//! let livestream = registry.get("livestream").unwrap();
//! assert_eq!(livestream.service_class, ServiceClass::LivestreamHost);
//!
//! // Unknown types resolve to the fallback
//! let other = registry.get("audio_room").unwrap();
//! assert_eq!(other.service_class, ServiceClass::Call);
//! ```
//!
//! Loading from TOML:
//!
//! ```rust
//! use ringline_service_core::config::ConfigFile;
//!
//! let file = ConfigFile::from_toml_str(r#"
//!     [settings]
//!     crash_on_missing_permission = true
//!
//!     [types."*"]
//!     run_in_foreground = true
//!
//!     [types.livestream]
//!     service_class = "livestream_host"
//!     audio_usage = "media"
//! "#).unwrap();
//!
//! assert!(file.settings.crash_on_missing_permission);
//! let (registry, _settings) = file.into_parts();
//! assert!(registry.get("livestream").is_ok());
//! ```

mod presets;
mod registry;
mod settings;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::profile::ServiceClass;

pub use presets::Preset;
pub use registry::{CallServiceConfigRegistry, ConfigFile};
pub use settings::ServiceSettings;

/// Call type key that registers the fallback config
pub const ANY_MARKER: &str = "ALL_CALL_TYPES";

/// Short alias accepted for [`ANY_MARKER`] in config files
pub const ANY_MARKER_ALIAS: &str = "*";

/// Audio routing mode a call type plays through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioUsage {
    #[default]
    VoiceCommunication,
    Media,
}

/// Moderation behaviour applied while a call is in the foreground
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Blur outgoing video after a moderation warning
    pub video_blur_enabled: bool,
    /// How long the blur stays applied
    #[serde(with = "duration_ms")]
    pub video_blur_duration: Duration,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            video_blur_enabled: true,
            video_blur_duration: Duration::from_secs(20),
        }
    }
}

/// Service configuration for one call type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallServiceConfig {
    /// Whether calls of this type are kept alive by a foreground service
    pub run_in_foreground: bool,
    pub audio_usage: AudioUsage,
    /// Background execution class for this call type
    pub service_class: ServiceClass,
    /// Register calls of this type with the platform telephony subsystem
    pub enable_telecom: bool,
    pub moderation: ModerationConfig,
}

impl Default for CallServiceConfig {
    fn default() -> Self {
        Self {
            run_in_foreground: true,
            audio_usage: AudioUsage::VoiceCommunication,
            service_class: ServiceClass::Call,
            enable_telecom: false,
            moderation: ModerationConfig::default(),
        }
    }
}

impl CallServiceConfig {
    pub fn builder() -> CallServiceConfigBuilder {
        CallServiceConfigBuilder::default()
    }

    /// Builder seeded with a copy of this config
    pub fn to_builder(&self) -> CallServiceConfigBuilder {
        CallServiceConfigBuilder::from(self.clone())
    }
}

/// Fluent builder for [`CallServiceConfig`].
///
/// Starts from either the defaults or a copy of an existing config; every
/// field not set through a `with_*` call keeps its seeded value.
#[derive(Debug, Clone, Default)]
pub struct CallServiceConfigBuilder {
    config: CallServiceConfig,
}

impl From<CallServiceConfig> for CallServiceConfigBuilder {
    fn from(config: CallServiceConfig) -> Self {
        Self { config }
    }
}

impl CallServiceConfigBuilder {
    pub fn with_run_in_foreground(mut self, run_in_foreground: bool) -> Self {
        self.config.run_in_foreground = run_in_foreground;
        self
    }

    pub fn with_audio_usage(mut self, audio_usage: AudioUsage) -> Self {
        self.config.audio_usage = audio_usage;
        self
    }

    pub fn with_service_class(mut self, service_class: ServiceClass) -> Self {
        self.config.service_class = service_class;
        self
    }

    pub fn with_telecom(mut self, enable_telecom: bool) -> Self {
        self.config.enable_telecom = enable_telecom;
        self
    }

    pub fn with_moderation(mut self, moderation: ModerationConfig) -> Self {
        self.config.moderation = moderation;
        self
    }

    pub fn build(self) -> CallServiceConfig {
        self.config
    }
}

/// Serde adapter storing a `Duration` as whole milliseconds
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
