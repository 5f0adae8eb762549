use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Opaque stable identifier — a ULID string, lexicographically sortable by
/// creation time. Used for memories, relations, sessions, and scheduled items.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A user identifier. Plain strings flow in from channel adapters, often
/// prefixed (`telegram:42`, `api:ws-abc`); the prefix is parsed at delivery
/// time to pick a channel, not stored separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split a prefixed user id into (channel_name, raw_id), if a `:` prefix
    /// is present. Falls back to `None` for bare ids (e.g. test fixtures).
    pub fn channel_prefix(&self) -> Option<(&str, &str)> {
        self.0.split_once(':')
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_lexicographically_sortable() {
        let a = Id::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = Id::new();
        assert!(a.as_str() < b.as_str());
    }

    #[test]
    fn channel_prefix_splits_on_first_colon() {
        let u = UserId::from("telegram:42");
        assert_eq!(u.channel_prefix(), Some(("telegram", "42")));

        let u = UserId::from("bare-id");
        assert_eq!(u.channel_prefix(), None);
    }
}
