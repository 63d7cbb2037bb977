use std::str::FromStr;

use super::{AudioUsage, CallServiceConfig, CallServiceConfigRegistry, ANY_MARKER};
use crate::errors::ServiceError;
use crate::profile::ServiceClass;

/// Ready-made registries for the common call types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Regular audio/video calls under the call service
    Default,
    /// Livestream host publishing camera and microphone
    Livestream,
    /// Livestream host publishing audio only
    LivestreamAudio,
    /// Livestream viewer, playback only
    LivestreamGuest,
    /// Audio-only calls
    AudioCall,
}

impl Preset {
    /// Call type the preset adds besides the fallback
    pub fn call_type(&self) -> &'static str {
        match self {
            Preset::Default => "default",
            Preset::Livestream | Preset::LivestreamAudio | Preset::LivestreamGuest => "livestream",
            Preset::AudioCall => "audio_call",
        }
    }

    pub fn config(&self) -> CallServiceConfig {
        let builder = CallServiceConfig::builder();
        match self {
            Preset::Default => builder,
            Preset::Livestream => builder
                .with_service_class(ServiceClass::LivestreamHost)
                .with_audio_usage(AudioUsage::Media),
            Preset::LivestreamAudio => builder
                .with_service_class(ServiceClass::LivestreamAudio)
                .with_audio_usage(AudioUsage::Media),
            Preset::LivestreamGuest => builder
                .with_service_class(ServiceClass::LivestreamViewer)
                .with_audio_usage(AudioUsage::Media),
            Preset::AudioCall => builder.with_service_class(ServiceClass::AudioCall),
        }
        .build()
    }

    /// Registry with the default fallback plus this preset's call type
    pub fn registry(&self) -> CallServiceConfigRegistry {
        let registry = CallServiceConfigRegistry::empty();
        registry.register(ANY_MARKER, CallServiceConfig::default());
        registry.register(self.call_type(), self.config());
        registry
    }
}

impl FromStr for Preset {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Preset::Default),
            "livestream" => Ok(Preset::Livestream),
            "livestream_audio" => Ok(Preset::LivestreamAudio),
            "livestream_guest" => Ok(Preset::LivestreamGuest),
            "audio_call" => Ok(Preset::AudioCall),
            other => Err(ServiceError::config(format!("unknown preset '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn livestream_guest_uses_viewer_class() {
        let registry = Preset::LivestreamGuest.registry();
        let config = registry.get("livestream").unwrap();
        assert_eq!(config.service_class, ServiceClass::LivestreamViewer);
        assert_eq!(config.audio_usage, AudioUsage::Media);
        assert_eq!(registry.get("default").unwrap(), CallServiceConfig::default());
    }

    #[test]
    fn every_preset_registers_fallback() {
        for name in ["default", "livestream", "livestream_audio", "livestream_guest", "audio_call"] {
            let preset: Preset = name.parse().unwrap();
            assert!(preset.registry().contains(ANY_MARKER), "{name}");
        }
        assert!("video_room".parse::<Preset>().is_err());
    }
}
