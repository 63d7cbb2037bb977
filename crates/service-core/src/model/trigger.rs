use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, ServiceError};

/// Reason a command is sent to a call service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    IncomingCall,
    OutgoingCall,
    #[serde(rename = "ongoing_call")]
    OnGoingCall,
    #[serde(rename = "remove_call")]
    RemoveIncomingCall,
    ShareScreen,
    None,
}

impl Trigger {
    pub const ALL: [Trigger; 6] = [
        Trigger::IncomingCall,
        Trigger::OutgoingCall,
        Trigger::OnGoingCall,
        Trigger::RemoveIncomingCall,
        Trigger::ShareScreen,
        Trigger::None,
    ];

    /// Wire name carried in service commands
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::IncomingCall => "incoming_call",
            Trigger::OutgoingCall => "outgoing_call",
            Trigger::OnGoingCall => "ongoing_call",
            Trigger::RemoveIncomingCall => "remove_call",
            Trigger::ShareScreen => "share_screen",
            Trigger::None => "none",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Trigger {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self> {
        Trigger::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ServiceError::UnknownTrigger {
                trigger: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_parse_back() {
        for trigger in Trigger::ALL {
            assert_eq!(trigger.as_str().parse::<Trigger>().unwrap(), trigger);
        }
    }

    #[test]
    fn unknown_name_is_an_error() {
        let err = "ringing".parse::<Trigger>().unwrap_err();
        assert_eq!(
            err,
            ServiceError::UnknownTrigger {
                trigger: "ringing".to_string()
            }
        );
    }

    #[test]
    fn serde_uses_wire_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            trigger: Trigger,
        }
        let w: Wrapper = toml::from_str("trigger = \"remove_call\"").unwrap();
        assert_eq!(w.trigger, Trigger::RemoveIncomingCall);
        let w: Wrapper = toml::from_str("trigger = \"ongoing_call\"").unwrap();
        assert_eq!(w.trigger, Trigger::OnGoingCall);
    }
}
