use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::NotificationKind;
use crate::errors::{Result, ServiceError};

/// Addressing key of a call: `{type, id}` with composite form `"type:id"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId {
    pub call_type: String,
    pub id: String,
}

impl CallId {
    pub fn new(call_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            call_type: call_type.into(),
            id: id.into(),
        }
    }

    /// Composite key `"type:id"`
    pub fn cid(&self) -> String {
        format!("{}:{}", self.call_type, self.id)
    }

    /// Parse a composite key. The type is everything before the first `:`.
    pub fn parse_cid(cid: &str) -> Result<Self> {
        match cid.split_once(':') {
            Some((call_type, id)) if !call_type.is_empty() && !id.is_empty() => {
                Ok(Self::new(call_type, id))
            }
            _ => Err(ServiceError::InvalidCallId {
                cid: cid.to_string(),
            }),
        }
    }

    /// Deterministic notification id for a notification kind of this call.
    ///
    /// Stable across processes and releases, so an id computed before a
    /// restart still addresses the notification that was posted.
    pub fn notification_id(&self, kind: NotificationKind) -> i32 {
        string_hash(&format!("{}{}", kind.as_str(), self.cid()))
    }

    /// Deterministic hash of the composite key alone
    pub fn stable_hash(&self) -> i32 {
        string_hash(&self.cid())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.call_type, self.id)
    }
}

impl FromStr for CallId {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_cid(s)
    }
}

// 31-multiplier polynomial over UTF-16 code units, wrapping at i32
fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_round_trips() {
        let id = CallId::new("default", "abc-123");
        assert_eq!(id.cid(), "default:abc-123");
        assert_eq!(id.to_string(), id.cid());
        assert_eq!(CallId::parse_cid("default:abc-123").unwrap(), id);
    }

    #[test]
    fn parse_keeps_colons_in_id() {
        let id: CallId = "livestream:a:b".parse().unwrap();
        assert_eq!(id.call_type, "livestream");
        assert_eq!(id.id, "a:b");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(CallId::parse_cid("no-separator").is_err());
        assert!(CallId::parse_cid(":id").is_err());
        assert!(CallId::parse_cid("type:").is_err());
    }

    #[test]
    fn string_hash_matches_known_values() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("a"), 97);
        assert_eq!(string_hash("ab"), 97 * 31 + 98);
    }

    #[test]
    fn notification_ids_differ_per_kind() {
        let id = CallId::new("default", "1");
        let incoming = id.notification_id(NotificationKind::Incoming);
        let ongoing = id.notification_id(NotificationKind::Ongoing);
        assert_ne!(incoming, ongoing);
        assert_eq!(incoming, CallId::new("default", "1").notification_id(NotificationKind::Incoming));
    }
}
