//! Strongly-typed identifiers for domain entities

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate strongly-typed ID wrappers
macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            pub fn into_uuid(self) -> Uuid {
                self.0
            }

            /// Returns the operator-facing ID with its type prefix
            pub fn to_prefixed_id(&self) -> String {
                format!("{}_{}", $prefix, self.0)
            }

            /// Parse from a prefixed ID
            pub fn from_prefixed_id(s: &str) -> Option<Self> {
                let prefix = concat!($prefix, "_");
                s.strip_prefix(prefix)
                    .and_then(|stripped| Uuid::parse_str(stripped).ok())
                    .map(Self)
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

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                if let Some(id) = Self::from_prefixed_id(s) {
                    return Ok(id);
                }
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

define_id!(TenantId, "tn");
define_id!(IdentityProviderId, "idp");

// Sync checkpoint IDs
define_id!(SyncRunId, "run");
define_id!(SyncRecordId, "rec");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation() {
        let id1 = SyncRunId::new();
        let id2 = SyncRunId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_prefixed_id_roundtrip() {
        let id = IdentityProviderId::new();
        let prefixed = id.to_prefixed_id();
        assert!(prefixed.starts_with("idp_"));

        let parsed = IdentityProviderId::from_prefixed_id(&prefixed).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_parsing_accepts_both_forms() {
        let id = SyncRecordId::new();
        let plain: SyncRecordId = id.to_string().parse().unwrap();
        let prefixed: SyncRecordId = id.to_prefixed_id().parse().unwrap();
        assert_eq!(plain, prefixed);
    }
}
