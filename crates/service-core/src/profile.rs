//! Service classes and the profile values that specialise a call service
//!
//! Livestream, audio-only and telecom variants of the call service differ
//! only in data: which foreground service types they declare, which
//! permissions they check and the tag they log under.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::client::Call;
use crate::errors::ServiceError;
use crate::model::{Permission, Trigger};

/// Background execution class a call type runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceClass {
    #[default]
    Call,
    LivestreamHost,
    LivestreamAudio,
    LivestreamViewer,
    AudioCall,
    TelecomVoip,
}

impl ServiceClass {
    pub const ALL: [ServiceClass; 6] = [
        ServiceClass::Call,
        ServiceClass::LivestreamHost,
        ServiceClass::LivestreamAudio,
        ServiceClass::LivestreamViewer,
        ServiceClass::AudioCall,
        ServiceClass::TelecomVoip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceClass::Call => "call",
            ServiceClass::LivestreamHost => "livestream_host",
            ServiceClass::LivestreamAudio => "livestream_audio",
            ServiceClass::LivestreamViewer => "livestream_viewer",
            ServiceClass::AudioCall => "audio_call",
            ServiceClass::TelecomVoip => "telecom_voip",
        }
    }

    /// Platform-facing class name
    pub fn class_name(&self) -> &'static str {
        match self {
            ServiceClass::Call => "CallService",
            ServiceClass::LivestreamHost => "LivestreamCallService",
            ServiceClass::LivestreamAudio => "LivestreamAudioCallService",
            ServiceClass::LivestreamViewer => "LivestreamViewerService",
            ServiceClass::AudioCall => "AudioCallService",
            ServiceClass::TelecomVoip => "TelecomVoipService",
        }
    }
}

impl fmt::Display for ServiceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class_name())
    }
}

impl FromStr for ServiceClass {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceClass::ALL
            .into_iter()
            .find(|c| c.as_str() == s || c.class_name() == s)
            .ok_or_else(|| ServiceError::config(format!("unknown service class '{}'", s)))
    }
}

/// Foreground service type bits declared when promoting to foreground
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ForegroundServiceTypes(u32);

impl ForegroundServiceTypes {
    pub const NONE: Self = Self(0);
    pub const PHONE_CALL: Self = Self(1 << 2);
    pub const MEDIA_PLAYBACK: Self = Self(1 << 1);
    pub const CONNECTED_DEVICE: Self = Self(1 << 4);
    pub const CAMERA: Self = Self(1 << 6);
    pub const MICROPHONE: Self = Self(1 << 7);
    pub const SHORT_SERVICE: Self = Self(1 << 11);

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Keep only the bits in `mask`
    pub const fn intersection(&self, mask: Self) -> Self {
        Self(self.0 & mask.0)
    }
}

impl BitOr for ForegroundServiceTypes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for ForegroundServiceTypes {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// How a profile decides which permissions a call needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStrategy {
    /// Camera and microphone
    AudioVideo,
    /// Microphone only
    AudioOnly,
    /// Watching does not need capture permissions
    None,
}

impl PermissionStrategy {
    pub fn required(&self) -> &'static [Permission] {
        match self {
            PermissionStrategy::AudioVideo => &[Permission::Camera, Permission::RecordAudio],
            PermissionStrategy::AudioOnly => &[Permission::RecordAudio],
            PermissionStrategy::None => &[],
        }
    }

    /// Permissions `call` needs: those backing a capability it can publish
    /// with, within this strategy
    pub fn required_for(&self, call: &dyn Call) -> Vec<Permission> {
        self.required()
            .iter()
            .copied()
            .filter(|p| match p.capability() {
                Some(capability) => call.has_capability(capability),
                None => true,
            })
            .collect()
    }
}

/// Data value specialising a call service instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProfile {
    pub class: ServiceClass,
    pub log_tag: &'static str,
    pub foreground_types: ForegroundServiceTypes,
    pub permissions: PermissionStrategy,
}

impl ServiceProfile {
    pub fn for_class(class: ServiceClass) -> Self {
        use ForegroundServiceTypes as T;
        let (log_tag, foreground_types, permissions) = match class {
            ServiceClass::Call => ("CallService", T::PHONE_CALL, PermissionStrategy::AudioVideo),
            ServiceClass::LivestreamHost => (
                "LivestreamHostService",
                T::CAMERA | T::MICROPHONE,
                PermissionStrategy::AudioVideo,
            ),
            ServiceClass::LivestreamAudio => (
                "LivestreamAudioService",
                T::MICROPHONE,
                PermissionStrategy::AudioOnly,
            ),
            ServiceClass::LivestreamViewer => (
                "LivestreamViewerService",
                T::MEDIA_PLAYBACK,
                PermissionStrategy::None,
            ),
            ServiceClass::AudioCall => ("AudioCallService", T::MICROPHONE, PermissionStrategy::AudioOnly),
            ServiceClass::TelecomVoip => (
                "TelecomVoipService",
                T::PHONE_CALL | T::CONNECTED_DEVICE,
                PermissionStrategy::AudioVideo,
            ),
        };
        Self {
            class,
            log_tag,
            foreground_types,
            permissions,
        }
    }

    /// Foreground types to declare for a trigger given the granted permissions.
    ///
    /// Ringing triggers only declare the call types; capture types are
    /// dropped when the matching permission was not granted because the OS
    /// refuses a camera or microphone foreground without it.
    pub fn foreground_type(&self, trigger: Trigger, granted: &[Permission]) -> ForegroundServiceTypes {
        use ForegroundServiceTypes as T;
        let call_bits = T::PHONE_CALL | T::CONNECTED_DEVICE | T::MEDIA_PLAYBACK;
        let mut types = self.foreground_types.intersection(call_bits);
        let ringing = matches!(trigger, Trigger::IncomingCall | Trigger::OutgoingCall);
        if !ringing {
            if self.foreground_types.contains(T::CAMERA) && granted.contains(&Permission::Camera) {
                types |= T::CAMERA;
            }
            if self.foreground_types.contains(T::MICROPHONE) && granted.contains(&Permission::RecordAudio) {
                types |= T::MICROPHONE;
            }
        }
        if types.is_empty() {
            // The platform needs at least one declared type
            types = T::SHORT_SERVICE;
        }
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_parse() {
        for class in ServiceClass::ALL {
            assert_eq!(class.as_str().parse::<ServiceClass>().unwrap(), class);
            assert_eq!(class.class_name().parse::<ServiceClass>().unwrap(), class);
        }
        assert!("nope".parse::<ServiceClass>().is_err());
    }

    #[test]
    fn required_permissions_follow_call_capabilities() {
        use crate::model::{CallId, SEND_AUDIO, SEND_VIDEO};
        use crate::sim::SimCall;

        let call = SimCall::new(CallId::new("default", "c1"), "me");
        let strategy = PermissionStrategy::AudioVideo;
        assert_eq!(
            strategy.required_for(call.as_ref()),
            vec![Permission::Camera, Permission::RecordAudio]
        );

        call.revoke_capability(SEND_VIDEO);
        assert_eq!(strategy.required_for(call.as_ref()), vec![Permission::RecordAudio]);

        // Capabilities never widen what the strategy asks for
        call.grant_capability(SEND_VIDEO);
        assert_eq!(
            PermissionStrategy::AudioOnly.required_for(call.as_ref()),
            vec![Permission::RecordAudio]
        );

        call.revoke_capability(SEND_AUDIO);
        call.revoke_capability(SEND_VIDEO);
        assert!(strategy.required_for(call.as_ref()).is_empty());
    }

    #[test]
    fn livestream_host_declares_capture_types_when_granted() {
        let profile = ServiceProfile::for_class(ServiceClass::LivestreamHost);
        let types = profile.foreground_type(
            Trigger::OnGoingCall,
            &[Permission::Camera, Permission::RecordAudio],
        );
        assert!(types.contains(ForegroundServiceTypes::CAMERA));
        assert!(types.contains(ForegroundServiceTypes::MICROPHONE));
    }

    #[test]
    fn capture_types_dropped_without_permission() {
        let profile = ServiceProfile::for_class(ServiceClass::LivestreamHost);
        let types = profile.foreground_type(Trigger::OnGoingCall, &[Permission::RecordAudio]);
        assert!(!types.contains(ForegroundServiceTypes::CAMERA));
        assert!(types.contains(ForegroundServiceTypes::MICROPHONE));
    }

    #[test]
    fn ringing_triggers_never_declare_capture() {
        let profile = ServiceProfile::for_class(ServiceClass::LivestreamAudio);
        let types = profile.foreground_type(Trigger::IncomingCall, &[Permission::RecordAudio]);
        assert_eq!(types, ForegroundServiceTypes::SHORT_SERVICE);

        let call = ServiceProfile::for_class(ServiceClass::Call);
        assert_eq!(
            call.foreground_type(Trigger::IncomingCall, &[]),
            ForegroundServiceTypes::PHONE_CALL
        );
    }

    #[test]
    fn viewer_needs_no_permissions() {
        let profile = ServiceProfile::for_class(ServiceClass::LivestreamViewer);
        assert!(profile.permissions.required().is_empty());
        assert_eq!(
            profile.foreground_type(Trigger::OnGoingCall, &[]),
            ForegroundServiceTypes::MEDIA_PLAYBACK
        );
    }
}
