//! Branded ID newtypes.
//!
//! Session handles and alert IDs are both strings on the wire, so each gets
//! its own newtype to keep them from being mixed up. New IDs are UUID v7
//! (time-ordered), which keeps alert rows roughly insertion-sorted.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a fresh ID (UUID v7).
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            /// Borrow the inner string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(
    /// Opaque handle for one connected dashboard client.
    SessionId
);

branded_id!(
    /// Identifier of a persisted alert.
    AlertId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn v7_ids_sort_by_creation() {
        let first = AlertId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = AlertId::new();
        assert!(first < second);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = AlertId::from("alert-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"alert-1\"");
        let back: AlertId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_matches_inner() {
        let id = SessionId::from("s-42");
        assert_eq!(id.to_string(), "s-42");
        assert_eq!(id.as_str(), "s-42");
    }
}
