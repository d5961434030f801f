//! Opaque identifiers shared by every CallRelay crate
//!
//! All three are assigned by external services (the Call Directory or the
//! account system) and are never interpreted, only compared.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing identifier
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Call record identifier assigned by the Call Directory
    CallId
);

string_id!(
    /// Participant identity
    UserId
);

string_id!(
    /// Correlates the two endpoints of one call
    RoomId
);

impl CallId {
    /// Generate a fresh call id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

impl RoomId {
    /// Generate a fresh room id
    pub fn generate() -> Self {
        Self(format!("room-{}", uuid::Uuid::new_v4().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = CallId::from("42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"42\"");

        let user: UserId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(user, UserId::new("alice"));
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(CallId::generate(), CallId::generate());
        assert!(RoomId::generate().as_str().starts_with("room-"));
    }
}
