//! Upstream provider releases and the adapters bundled with a build.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::ProviderId;

/// An upstream agent-CLI release observed by the `VersionWatcher`.
///
/// Invariant: `canary_passed_at` is `Some` if and only if `canary_passed`
/// is `true`. Constructed only through [`RuntimeVersion::new`] and mutated
/// only through [`RuntimeVersion::mark_canary_passed`] to uphold that
/// invariant everywhere in the codebase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeVersion {
    pub provider_id: ProviderId,
    pub version: String,
    pub released_at: DateTime<Utc>,
    pub source_url: Option<String>,
    pub checksum: Option<String>,
    canary_passed: bool,
    canary_passed_at: Option<DateTime<Utc>>,
}

impl RuntimeVersion {
    pub fn new(provider_id: ProviderId, version: impl Into<String>, released_at: DateTime<Utc>) -> Self {
        Self {
            provider_id,
            version: version.into(),
            released_at,
            source_url: None,
            checksum: None,
            canary_passed: false,
            canary_passed_at: None,
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    pub fn canary_passed(&self) -> bool {
        self.canary_passed
    }

    pub fn canary_passed_at(&self) -> Option<DateTime<Utc>> {
        self.canary_passed_at
    }

    /// Record that canary testing passed for this version at `now`.
    ///
    /// A no-op pass (status other than passed) must not call this; callers
    /// check the result status before invoking it, preserving the iff
    /// invariant.
    pub fn mark_canary_passed(&mut self, now: DateTime<Utc>) {
        self.canary_passed = true;
        self.canary_passed_at = Some(now);
    }
}

/// A version of a bundled adapter, with the semver ranges of providers it
/// declares compatibility with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterVersion {
    pub adapter_id: crate::ids::AdapterId,
    pub version: String,
    /// Maps provider id to a semver range string (e.g. `"^1.2.0"`).
    pub compatible_providers: HashMap<ProviderId, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn new_runtime_version_starts_uncanaried() {
        let rv = RuntimeVersion::new(ProviderId::from("codex"), "1.0.0", Utc::now());
        assert!(!rv.canary_passed());
        assert!(rv.canary_passed_at().is_none());
    }

    #[test]
    fn mark_canary_passed_sets_both_fields_together() {
        let mut rv = RuntimeVersion::new(ProviderId::from("codex"), "1.0.0", Utc::now());
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        rv.mark_canary_passed(now);
        assert!(rv.canary_passed());
        assert_eq!(rv.canary_passed_at(), Some(now));
    }
}
