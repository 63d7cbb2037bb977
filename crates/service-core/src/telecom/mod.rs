//! Platform telephony integration
//!
//! Registers calls with the system's call-management API so the OS renders
//! native call UI, and bridges the actions it supplies back to the call.
//! The registration itself is the explicit state machine in [`state`].

mod bridge;
mod platform;
pub mod state;

pub use bridge::{TelecomAction, TelecomBridge};
pub use platform::{CallAttributes, CallControl, CallsManager, PlatformCallEvent};
pub use state::{DisconnectCause, TelecomCallState, TelecomTransition};
