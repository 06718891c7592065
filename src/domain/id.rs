//! Domain ID types with the NewType pattern.
//!
//! Type-safe wrappers around string UUIDs so that an environment id can
//! never be passed where an item id is expected. Each type implements
//! Display, FromStr, Serialize and Deserialize; queries bind via `as_str`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Macro to generate NewType ID wrappers with all required traits
macro_rules! domain_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Create an ID from an existing string (for database retrieval)
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Get the inner string value
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Convert to inner string value
            pub fn into_string(self) -> String {
                self.0
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

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)?;
                Ok(Self(s.to_string()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

domain_id! {
    /// Workspace identifier
    WorkspaceId
}

domain_id! {
    /// Project identifier
    ProjectId
}

domain_id! {
    /// Environment identifier
    EnvironmentId
}

domain_id! {
    /// Secret/Variable (config item) identifier
    ItemId
}

domain_id! {
    /// Integration identifier
    IntegrationId
}

domain_id! {
    /// Integration run identifier
    RunId
}

domain_id! {
    /// Change event identifier, shared between the audit trail and
    /// integration runs triggered by the same event
    EventId
}

domain_id! {
    /// Acting user identifier
    UserId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique() {
        assert_ne!(ItemId::new(), ItemId::new());
    }

    #[test]
    fn test_parse_rejects_non_uuid() {
        assert!("not-a-uuid".parse::<EnvironmentId>().is_err());
        let id = ItemId::new();
        assert!(id.as_str().parse::<ItemId>().is_ok());
    }

    #[test]
    fn test_serde_transparent() {
        let id = ProjectId::from_string("abc".to_string());
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
