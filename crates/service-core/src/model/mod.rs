//! Value types shared by every layer of the call service

mod call_id;
mod notification;
mod permission;
mod state;
mod trigger;

pub use call_id::CallId;
pub use notification::{Notification, NotificationKind, NotificationPriority};
pub use permission::{Permission, PermissionCheck, SEND_AUDIO, SEND_VIDEO};
pub use state::{CallEvent, CallSnapshot, ConnectionState, RejectReason, RingingState};
pub use trigger::Trigger;
