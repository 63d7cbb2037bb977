//! Registration state of a call with the platform telephony subsystem

use std::fmt;

use serde::Serialize;

use crate::errors::{Result, ServiceError};

/// Why the telephony subsystem considers a call over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectCause {
    Local,
    Remote,
    Rejected,
    Missed,
    Busy,
    Canceled,
    Error,
}

/// Registration state of one call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TelecomCallState {
    #[default]
    Idle,
    Registering {
        incoming: bool,
    },
    /// Registered, waiting to be answered or activated
    Registered {
        incoming: bool,
        muted: bool,
    },
    Active {
        muted: bool,
    },
    /// On hold
    Inactive {
        muted: bool,
    },
    Disconnected {
        cause: DisconnectCause,
    },
}

impl TelecomCallState {
    /// Whether a call currently holds the registration
    pub fn is_registered(&self) -> bool {
        matches!(
            self,
            Self::Registering { .. } | Self::Registered { .. } | Self::Active { .. } | Self::Inactive { .. }
        )
    }

    pub fn is_muted(&self) -> bool {
        match self {
            Self::Registered { muted, .. } | Self::Active { muted } | Self::Inactive { muted } => *muted,
            _ => false,
        }
    }
}

impl fmt::Display for TelecomCallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Registering { .. } => "registering",
            Self::Registered { .. } => "registered",
            Self::Active { .. } => "active",
            Self::Inactive { .. } => "inactive",
            Self::Disconnected { .. } => "disconnected",
        };
        f.write_str(name)
    }
}

/// Events moving a registration forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelecomTransition {
    Register { incoming: bool },
    Registered,
    RegistrationFailed,
    /// The call was answered, locally or from the system UI
    Answered,
    SetActive,
    SetInactive,
    ToggleMute,
    Disconnected { cause: DisconnectCause },
    /// Registration scope ended; ready for the next call
    Reset,
}

impl TelecomCallState {
    /// Next state for a transition, or an error when it does not apply
    pub fn apply(self, transition: TelecomTransition) -> Result<Self> {
        use TelecomCallState as S;
        use TelecomTransition as T;

        let next = match (self, transition) {
            (S::Idle | S::Disconnected { .. }, T::Register { incoming }) => S::Registering { incoming },
            (S::Registering { incoming }, T::Registered) => S::Registered { incoming, muted: false },
            (S::Registering { .. }, T::RegistrationFailed) => S::Disconnected {
                cause: DisconnectCause::Error,
            },
            (S::Registered { muted, .. } | S::Inactive { muted }, T::Answered | T::SetActive) => S::Active { muted },
            (S::Active { muted }, T::SetActive) => S::Active { muted },
            (S::Active { muted } | S::Inactive { muted }, T::SetInactive) => S::Inactive { muted },
            (S::Registered { incoming, muted }, T::ToggleMute) => S::Registered { incoming, muted: !muted },
            (S::Active { muted }, T::ToggleMute) => S::Active { muted: !muted },
            (S::Inactive { muted }, T::ToggleMute) => S::Inactive { muted: !muted },
            (
                S::Registering { .. } | S::Registered { .. } | S::Active { .. } | S::Inactive { .. },
                T::Disconnected { cause },
            ) => S::Disconnected { cause },
            (_, T::Reset) => S::Idle,
            (state, transition) => return Err(ServiceError::invalid_transition(state, transition)),
        };
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_call_lifecycle() {
        let state = TelecomCallState::Idle
            .apply(TelecomTransition::Register { incoming: true })
            .and_then(|s| s.apply(TelecomTransition::Registered))
            .and_then(|s| s.apply(TelecomTransition::Answered))
            .and_then(|s| s.apply(TelecomTransition::SetInactive))
            .and_then(|s| s.apply(TelecomTransition::SetActive))
            .and_then(|s| {
                s.apply(TelecomTransition::Disconnected {
                    cause: DisconnectCause::Local,
                })
            })
            .unwrap();
        assert_eq!(
            state,
            TelecomCallState::Disconnected {
                cause: DisconnectCause::Local
            }
        );
        assert_eq!(state.apply(TelecomTransition::Reset).unwrap(), TelecomCallState::Idle);
    }

    #[test]
    fn mute_survives_hold() {
        let state = TelecomCallState::Active { muted: false }
            .apply(TelecomTransition::ToggleMute)
            .and_then(|s| s.apply(TelecomTransition::SetInactive))
            .unwrap();
        assert_eq!(state, TelecomCallState::Inactive { muted: true });
        assert!(state.is_muted());
    }

    #[test]
    fn cannot_answer_before_registration() {
        let err = TelecomCallState::Idle.apply(TelecomTransition::Answered).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidTransition { .. }));
    }

    #[test]
    fn cannot_register_twice() {
        let registered = TelecomCallState::Registered {
            incoming: false,
            muted: false,
        };
        assert!(registered.is_registered());
        assert!(registered
            .apply(TelecomTransition::Register { incoming: true })
            .is_err());
    }
}
