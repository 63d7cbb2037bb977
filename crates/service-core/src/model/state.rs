use serde::{Deserialize, Serialize};

/// Ringing state of a call, owned by the call collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RingingState {
    #[default]
    Idle,
    Incoming {
        accepted_by_me: bool,
    },
    Outgoing {
        accepted_by_callee: bool,
    },
    Active,
    RejectedByAll,
    TimeoutNoAnswer,
}

impl RingingState {
    /// Whether the call is still ringing on either side
    pub fn is_ringing(&self) -> bool {
        matches!(self, RingingState::Incoming { .. } | RingingState::Outgoing { .. })
    }

    /// States after which the call will not ring again
    pub fn is_terminal(&self) -> bool {
        matches!(self, RingingState::RejectedByAll | RingingState::TimeoutNoAnswer)
    }
}

/// Events delivered on a call's event stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallEvent {
    Accepted { user_id: String },
    Rejected { user_id: String },
    Missed,
    Ended,
}

/// Connection state of a call's media session
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Failed { reason: String },
}

/// Why a call is being rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Decline,
    Cancel,
    Busy,
    Timeout,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Decline => "decline",
            RejectReason::Cancel => "cancel",
            RejectReason::Busy => "busy",
            RejectReason::Timeout => "timeout",
        }
    }
}

/// The part of a call's state that drives notification refreshes
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub ringing_state: RingingState,
    pub members: Vec<String>,
    pub remote_participants: Vec<String>,
    pub backstage: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ringing_classification() {
        assert!(RingingState::Incoming { accepted_by_me: false }.is_ringing());
        assert!(RingingState::Outgoing { accepted_by_callee: true }.is_ringing());
        assert!(!RingingState::Active.is_ringing());
        assert!(RingingState::RejectedByAll.is_terminal());
        assert!(RingingState::TimeoutNoAnswer.is_terminal());
        assert!(!RingingState::Idle.is_terminal());
    }
}
