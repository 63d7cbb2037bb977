use serde::{Deserialize, Serialize};

/// Kind of call notification, part of the deterministic notification id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Incoming,
    Outgoing,
    Ongoing,
    Missed,
    SettingUp,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Incoming => "Incoming",
            NotificationKind::Outgoing => "Outgoing",
            NotificationKind::Ongoing => "Ongoing",
            NotificationKind::Missed => "Missed",
            NotificationKind::SettingUp => "SettingUp",
        }
    }
}

/// Priority a notification is posted with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Default,
    High,
}

/// A renderable system notification.
///
/// The platform layer owns the real object; this carries what the
/// orchestration decides about it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Notification {
    pub channel_id: String,
    pub title: String,
    pub body: String,
    pub priority: NotificationPriority,
    pub full_screen: bool,
    pub ongoing: bool,
}

impl Notification {
    pub fn new(channel_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_priority(mut self, priority: NotificationPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn full_screen(mut self) -> Self {
        self.full_screen = true;
        self.priority = NotificationPriority::High;
        self
    }

    pub fn ongoing(mut self) -> Self {
        self.ongoing = true;
        self
    }
}
