//! Append-only compatibility results and the known-good promotion lifecycle
//! (spec §3 CompatibilityResult / KnownGoodEntry, §4.3 KnownGoodRegistry).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{BuildId, ResultId, SuiteId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatStatus {
    Compatible,
    Incompatible,
    Partial,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub result_id: ResultId,
    pub build_id: BuildId,
    pub test_suite_id: SuiteId,
    pub status: CompatStatus,
    pub tested_at: DateTime<Utc>,
    pub metrics_json: Value,
    pub recommended_flags: Option<Vec<String>>,
    pub notes: Option<String>,
}

impl CompatibilityResult {
    pub fn new(build_id: BuildId, test_suite_id: SuiteId, status: CompatStatus, tested_at: DateTime<Utc>) -> Self {
        Self {
            result_id: ResultId::new(),
            build_id,
            test_suite_id,
            status,
            tested_at,
            metrics_json: Value::Null,
            recommended_flags: None,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Testing,
    KnownGood,
    KnownBad,
    Deprecated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Recommended,
    Acceptable,
    NotRecommended,
    Blocked,
}

impl Recommendation {
    /// Maps the latest compatibility result's status to a recommendation,
    /// per spec §4.3 `addCompatibilityResult`.
    pub fn from_latest_compat_status(status: CompatStatus) -> Self {
        match status {
            CompatStatus::Compatible => Recommendation::Acceptable,
            CompatStatus::Partial => Recommendation::Acceptable,
            CompatStatus::Incompatible => Recommendation::NotRecommended,
            CompatStatus::Unknown => Recommendation::NotRecommended,
        }
    }
}

/// The promotion-lifecycle wrapper around exactly one `RunnerBuild`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownGoodEntry {
    pub entry_id: crate::ids::EntryId,
    pub build_id: BuildId,
    pub status: EntryStatus,
    pub promoted_at: Option<DateTime<Utc>>,
    pub deprecated_at: Option<DateTime<Utc>>,
    pub deprecation_reason: Option<String>,
    /// Append-only; never truncated.
    pub compat_results: Vec<CompatibilityResult>,
    pub recommendation: Recommendation,
}

impl KnownGoodEntry {
    pub fn new(build_id: BuildId) -> Self {
        Self {
            entry_id: crate::ids::EntryId::new(),
            build_id,
            status: EntryStatus::Testing,
            promoted_at: None,
            deprecated_at: None,
            deprecation_reason: None,
            compat_results: Vec::new(),
            recommendation: Recommendation::NotRecommended,
        }
    }

    pub fn has_compatible_result(&self) -> bool {
        self.compat_results.iter().any(|r| r.status == CompatStatus::Compatible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommendation_mapping_matches_spec_table() {
        assert_eq!(
            Recommendation::from_latest_compat_status(CompatStatus::Compatible),
            Recommendation::Acceptable
        );
        assert_eq!(
            Recommendation::from_latest_compat_status(CompatStatus::Partial),
            Recommendation::Acceptable
        );
        assert_eq!(
            Recommendation::from_latest_compat_status(CompatStatus::Incompatible),
            Recommendation::NotRecommended
        );
        assert_eq!(
            Recommendation::from_latest_compat_status(CompatStatus::Unknown),
            Recommendation::NotRecommended
        );
    }

    #[test]
    fn new_entry_starts_in_testing_with_no_compatible_result() {
        let entry = KnownGoodEntry::new(BuildId::new());
        assert_eq!(entry.status, EntryStatus::Testing);
        assert!(!entry.has_compatible_result());
    }
}
