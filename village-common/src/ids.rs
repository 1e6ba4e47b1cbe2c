//! Opaque identifier newtypes minted at creation time.
//!
//! Every entity in the update pipeline is addressed by one of these types
//! rather than a bare `String`, so a `BuildId` can never be passed where an
//! `OrgId` is expected. All of them wrap a UUIDv4 string by default but
//! accept any string (provider identifiers and org identifiers are often
//! externally supplied slugs, not UUIDs).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            /// Mint a new identifier from a random UUIDv4.
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Wrap an externally supplied identifier (provider slugs, org
            /// slugs, repo URLs) without requiring UUID shape.
            pub fn from_str(id: impl Into<String>) -> Self {
                Self(id.into())
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

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

opaque_id!(ProviderId, "Identifies an upstream agent-CLI provider (codex, claude_code, gemini_cli, ...).");
opaque_id!(AdapterId, "Identifies a bundled adapter package.");
opaque_id!(BuildId, "Identifies an immutable `RunnerBuild`.");
opaque_id!(ResultId, "Identifies a `CompatibilityResult`.");
opaque_id!(EntryId, "Identifies a `KnownGoodEntry`.");
opaque_id!(SuiteId, "Identifies a `CanaryTestSuite`.");
opaque_id!(TestId, "Identifies a `CanaryTestCase` within a suite.");
opaque_id!(RolloutId, "Identifies an `ActiveRollout`.");
opaque_id!(OrgId, "Identifies an organization.");
opaque_id!(EventId, "Identifies a `RolloutEvent` audit record.");
opaque_id!(SweepId, "Identifies a `SweepConfig`/`SweepJob`.");
opaque_id!(JobId, "Identifies a running `SweepJob`.");
opaque_id!(HouseId, "Identifies a village house.");
opaque_id!(RepoId, "Identifies a monitored repository.");
opaque_id!(VillageId, "Identifies a village (a collection of houses).");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(BuildId::new(), BuildId::new());
    }

    #[test]
    fn from_str_preserves_external_slugs() {
        let org = OrgId::from_str("acme-corp");
        assert_eq!(org.as_str(), "acme-corp");
    }

    #[test]
    fn display_matches_inner_string() {
        let id = ProviderId::from("codex");
        assert_eq!(format!("{id}"), "codex");
    }
}
