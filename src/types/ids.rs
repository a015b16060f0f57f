//! Strongly-typed identifiers.
//!
//! All IDs are validated at construction time and implement common traits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed ID newtype wrapper.
///
/// Generates: struct, `from_string()`, `as_str()`, Display, Serialize, Deserialize.
/// Optionally generates `new()` (UUID v4) and `Default` if `uuid` flag is passed.
macro_rules! define_id {
    ($name:ident, uuid) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

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
                write!(f, "{}", self.0)
            }
        }
    };
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn from_string(s: String) -> Result<Self, &'static str> {
                if s.is_empty() {
                    return Err(concat!(stringify!($name), " cannot be empty"));
                }
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(EnvelopeId, uuid);
define_id!(RequestId, uuid);
define_id!(SessionId, uuid);
define_id!(UserId);

/// Caller-supplied identifier under which envelope state is persisted.
///
/// Unlike the other IDs, a `ThreadId` is always supplied by the caller
/// (there is no `new()` generator) — it names a conversation/session the
/// caller already owns, not something the runtime mints.
define_id!(ThreadId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_id_generates_unique_values() {
        let a = EnvelopeId::new();
        let b = EnvelopeId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn user_id_rejects_empty_string() {
        assert!(UserId::from_string(String::new()).is_err());
    }

    #[test]
    fn thread_id_round_trips_through_display() {
        let id = ThreadId::from_string("thread-42".to_string()).unwrap();
        assert_eq!(id.to_string(), "thread-42");
        assert_eq!(id.as_str(), "thread-42");
    }
}
