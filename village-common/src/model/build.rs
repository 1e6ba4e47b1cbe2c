//! Immutable build records: a runner version plus the adapters and
//! runtimes bundled with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::{BuildId, ProviderId};
use super::version::AdapterVersion;

/// Free-form build provenance. Kept as a struct (rather than a JSON blob)
/// so the commit SHA and build environment are addressable without a
/// string key lookup, while `tags` stays open-ended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildMetadata {
    pub commit_sha: Option<String>,
    pub build_env: Option<String>,
    pub tags: Vec<String>,
}

/// A registered build of the runner: one runner version, an ordered list
/// of adapters, and the resolved runtime version for each provider it
/// bundles. Immutable after construction — the registry never mutates a
/// `RunnerBuild` in place, only the `KnownGoodEntry` wrapped around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerBuild {
    pub build_id: BuildId,
    pub runner_version: String,
    pub adapters: Vec<AdapterVersion>,
    pub runtime_versions: HashMap<ProviderId, String>,
    pub built_at: DateTime<Utc>,
    pub metadata: BuildMetadata,
}

impl RunnerBuild {
    pub fn new(
        runner_version: impl Into<String>,
        runtime_versions: HashMap<ProviderId, String>,
        built_at: DateTime<Utc>,
    ) -> Self {
        Self {
            build_id: BuildId::new(),
            runner_version: runner_version.into(),
            adapters: Vec::new(),
            runtime_versions,
            built_at,
            metadata: BuildMetadata::default(),
        }
    }

    pub fn with_adapters(mut self, adapters: Vec<AdapterVersion>) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn with_metadata(mut self, metadata: BuildMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The bundled version string for `provider_id`, if this build bundles
    /// that provider at all.
    pub fn runtime_version_for(&self, provider_id: &ProviderId) -> Option<&str> {
        self.runtime_versions.get(provider_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(built_at: DateTime<Utc>) -> RunnerBuild {
        let mut runtimes = HashMap::new();
        runtimes.insert(ProviderId::from("codex"), "1.0.0".to_string());
        RunnerBuild::new("runner-2.3.0", runtimes, built_at)
    }

    #[test]
    fn runtime_version_for_known_and_unknown_provider() {
        let build = sample(Utc::now());
        assert_eq!(build.runtime_version_for(&ProviderId::from("codex")), Some("1.0.0"));
        assert_eq!(build.runtime_version_for(&ProviderId::from("gemini_cli")), None);
    }

    #[test]
    fn build_ids_are_unique_across_constructions() {
        let now = Utc::now();
        assert_ne!(sample(now).build_id, sample(now).build_id);
    }
}
