use std::fmt;

use serde::{Deserialize, Serialize};

/// Own capability that lets the user publish audio
pub const SEND_AUDIO: &str = "send-audio";

/// Own capability that lets the user publish video
pub const SEND_VIDEO: &str = "send-video";

/// Runtime permissions the service layer cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Camera,
    RecordAudio,
    PostNotifications,
    BluetoothConnect,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Camera => "CAMERA",
            Permission::RecordAudio => "RECORD_AUDIO",
            Permission::PostNotifications => "POST_NOTIFICATIONS",
            Permission::BluetoothConnect => "BLUETOOTH_CONNECT",
        }
    }

    /// Call capability whose publishing needs this permission
    pub fn capability(&self) -> Option<&'static str> {
        match self {
            Permission::Camera => Some(SEND_VIDEO),
            Permission::RecordAudio => Some(SEND_AUDIO),
            Permission::PostNotifications | Permission::BluetoothConnect => None,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a permission check for a call
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PermissionCheck {
    pub granted: bool,
    pub missing: Vec<String>,
}

impl PermissionCheck {
    pub fn granted() -> Self {
        Self {
            granted: true,
            missing: Vec::new(),
        }
    }

    pub fn denied(missing: Vec<String>) -> Self {
        Self {
            granted: false,
            missing,
        }
    }
}
