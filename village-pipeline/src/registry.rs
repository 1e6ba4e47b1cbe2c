//! Known-good build registry (spec §4.3).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use village_common::errors::{PipelineError, Result};
use village_common::events::RegistryEvent;
use village_common::ids::{BuildId, ProviderId};
use village_common::model::{
    CanaryTestResult, CompatStatus, CompatibilityResult, EntryStatus, KnownGoodEntry, ReleaseChannel, Recommendation,
    RunnerBuild, TestSuiteStatus,
};
use village_common::semver_util;

use crate::event_bus::EventBus;

/// A snapshot suitable for external persistence (spec §6 "Persistence
/// hooks"): `export_data()`/`import_data()` are the entire persistence
/// surface, the registry itself never touches disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub versions: HashMap<ProviderId, HashMap<String, village_common::model::RuntimeVersion>>,
    pub builds: HashMap<BuildId, RunnerBuild>,
    pub entries: HashMap<BuildId, KnownGoodEntry>,
}

struct RegistryState {
    versions: HashMap<ProviderId, HashMap<String, village_common::model::RuntimeVersion>>,
    builds: HashMap<BuildId, RunnerBuild>,
    entries: HashMap<BuildId, KnownGoodEntry>,
    /// Insertion order, oldest first, used as the build-trimming tie-break
    /// (Design Notes §9: builtAt ascending, buildId as final tie-break).
    build_order: Vec<BuildId>,
}

pub struct KnownGoodRegistry {
    state: Mutex<RegistryState>,
    max_versions_per_provider: usize,
    max_builds: usize,
    auto_deprecate_days: i64,
    events: Arc<EventBus<RegistryEvent>>,
}

impl KnownGoodRegistry {
    pub fn new(max_versions_per_provider: usize, max_builds: usize, auto_deprecate_days: i64) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                versions: HashMap::new(),
                builds: HashMap::new(),
                entries: HashMap::new(),
                build_order: Vec::new(),
            }),
            max_versions_per_provider,
            max_builds,
            auto_deprecate_days,
            events: Arc::new(EventBus::default()),
        }
    }

    pub fn events(&self) -> Arc<EventBus<RegistryEvent>> {
        self.events.clone()
    }

    /// Insert or replace a version, then trim the oldest versions beyond
    /// `max_versions_per_provider` — except any version bundled by a
    /// `known_good` build, which is never evicted (spec §4.3, §8).
    pub fn register_version(&self, version: village_common::model::RuntimeVersion) {
        let provider_id = version.provider_id.clone();
        let version_string = version.version.clone();
        let mut state = self.state.lock().expect("registry state poisoned");
        state.versions.entry(provider_id.clone()).or_default().insert(version_string.clone(), version);
        self.trim_versions(&mut state, &provider_id);
        drop(state);
        self.events.emit(RegistryEvent::VersionRegistered { provider_id, version: version_string });
    }

    fn protected_versions(&self, state: &RegistryState, provider_id: &ProviderId) -> std::collections::HashSet<String> {
        state
            .entries
            .values()
            .filter(|e| e.status == EntryStatus::KnownGood)
            .filter_map(|e| state.builds.get(&e.build_id))
            .filter_map(|b| b.runtime_version_for(provider_id))
            .map(str::to_string)
            .collect()
    }

    fn trim_versions(&self, state: &mut RegistryState, provider_id: &ProviderId) {
        let protected = self.protected_versions(state, provider_id);
        let Some(versions) = state.versions.get_mut(provider_id) else { return };
        if versions.len() <= self.max_versions_per_provider {
            return;
        }
        let mut keys: Vec<String> = versions.keys().cloned().collect();
        semver_util::sort_versions_desc(&mut keys, |s| s.as_str());
        let evictable: Vec<String> = keys
            .into_iter()
            .filter(|k| !protected.contains(k))
            .collect();
        let excess = versions.len().saturating_sub(self.max_versions_per_provider);
        for key in evictable.iter().rev().take(excess) {
            versions.remove(key);
        }
    }

    pub fn mark_version_canary_passed(&self, provider_id: &ProviderId, version: &str, result: &CanaryTestResult) {
        if result.status != TestSuiteStatus::Passed {
            return;
        }
        let mut state = self.state.lock().expect("registry state poisoned");
        if let Some(v) = state.versions.get_mut(provider_id).and_then(|m| m.get_mut(version)) {
            v.mark_canary_passed(Utc::now());
        }
    }

    /// Rejects a duplicate `build_id`; trims oldest non-`known_good`
    /// builds when exceeding `max_builds`.
    pub fn register_build(&self, build: RunnerBuild) -> Result<()> {
        let mut state = self.state.lock().expect("registry state poisoned");
        if state.builds.contains_key(&build.build_id) {
            return Err(PipelineError::DuplicateBuild(build.build_id.clone()));
        }
        let build_id = build.build_id.clone();
        state.build_order.push(build_id.clone());
        state.builds.insert(build_id.clone(), build);
        state.entries.insert(build_id.clone(), KnownGoodEntry::new(build_id.clone()));
        self.trim_builds(&mut state);
        drop(state);
        self.events.emit(RegistryEvent::BuildRegistered { build_id });
        Ok(())
    }

    fn trim_builds(&self, state: &mut RegistryState) {
        if state.builds.len() <= self.max_builds {
            return;
        }
        let excess = state.builds.len() - self.max_builds;
        let mut removed = 0;
        let order = state.build_order.clone();
        for build_id in order {
            if removed >= excess {
                break;
            }
            let is_known_good = state.entries.get(&build_id).map(|e| e.status == EntryStatus::KnownGood).unwrap_or(false);
            if is_known_good {
                continue;
            }
            state.builds.remove(&build_id);
            state.entries.remove(&build_id);
            state.build_order.retain(|b| b != &build_id);
            removed += 1;
        }
    }

    /// Append a compatibility result and recompute the entry's
    /// recommendation from it (spec §4.3).
    pub fn add_compatibility_result(&self, build_id: &BuildId, result: CompatibilityResult) -> Result<()> {
        let mut state = self.state.lock().expect("registry state poisoned");
        let entry = state.entries.get_mut(build_id).ok_or_else(|| PipelineError::UnknownBuild(build_id.clone()))?;
        let result_id = result.result_id.clone();
        entry.recommendation = Recommendation::from_latest_compat_status(result.status);
        entry.compat_results.push(result);
        drop(state);
        self.events.emit(RegistryEvent::CompatResultAdded { build_id: build_id.clone(), result_id });
        Ok(())
    }

    /// Promote to `known_good`: requires at least one `compatible` result
    /// (spec §4.3, §8).
    pub fn promote_build(&self, build_id: &BuildId) -> Result<()> {
        let mut state = self.state.lock().expect("registry state poisoned");
        let entry = state.entries.get_mut(build_id).ok_or_else(|| PipelineError::UnknownBuild(build_id.clone()))?;
        if !entry.has_compatible_result() {
            return Err(PipelineError::PromotionRequiresCompatibleResult(build_id.clone()));
        }
        entry.status = EntryStatus::KnownGood;
        entry.promoted_at = Some(Utc::now());
        entry.recommendation = Recommendation::Recommended;
        drop(state);
        self.events.emit(RegistryEvent::BuildPromoted { build_id: build_id.clone() });
        Ok(())
    }

    pub fn deprecate_build(&self, build_id: &BuildId, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let mut state = self.state.lock().expect("registry state poisoned");
        let entry = state.entries.get_mut(build_id).ok_or_else(|| PipelineError::UnknownBuild(build_id.clone()))?;
        entry.status = EntryStatus::Deprecated;
        entry.deprecated_at = Some(Utc::now());
        entry.deprecation_reason = Some(reason.clone());
        drop(state);
        self.events.emit(RegistryEvent::BuildDeprecated { build_id: build_id.clone(), reason });
        Ok(())
    }

    pub fn mark_build_bad(&self, build_id: &BuildId, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let mut state = self.state.lock().expect("registry state poisoned");
        let entry = state.entries.get_mut(build_id).ok_or_else(|| PipelineError::UnknownBuild(build_id.clone()))?;
        entry.status = EntryStatus::KnownBad;
        entry.recommendation = Recommendation::Blocked;
        entry.deprecation_reason = Some(reason);
        Ok(())
    }

    /// `stable`: newest `known_good` + `recommended` build by `promoted_at`
    /// desc. `beta`: newest build in {`known_good`, `testing`} whose
    /// recommendation is not `blocked`/`not_recommended`, by `built_at`
    /// desc. `pinned` has no registry-wide recommendation — orgs pin an
    /// explicit build — so this returns `None` for it.
    pub fn get_recommended_build(&self, channel: ReleaseChannel) -> Option<RunnerBuild> {
        let state = self.state.lock().expect("registry state poisoned");
        match channel {
            ReleaseChannel::Stable => {
                let mut candidates: Vec<_> = state
                    .entries
                    .values()
                    .filter(|e| e.status == EntryStatus::KnownGood && e.recommendation == Recommendation::Recommended)
                    .collect();
                candidates.sort_by_key(|e| std::cmp::Reverse(e.promoted_at));
                candidates.first().and_then(|e| state.builds.get(&e.build_id).cloned())
            }
            ReleaseChannel::Beta => {
                let mut candidates: Vec<_> = state
                    .entries
                    .values()
                    .filter(|e| matches!(e.status, EntryStatus::KnownGood | EntryStatus::Testing))
                    .filter(|e| !matches!(e.recommendation, Recommendation::Blocked | Recommendation::NotRecommended))
                    .filter_map(|e| state.builds.get(&e.build_id).map(|b| (e, b)))
                    .collect();
                candidates.sort_by_key(|(_, b)| std::cmp::Reverse(b.built_at));
                candidates.first().map(|(_, b)| (*b).clone())
            }
            ReleaseChannel::Pinned => None,
        }
    }

    /// Every build whose bundled version for `provider_id` satisfies
    /// `^version` or equals it exactly (spec §4.3).
    pub fn find_compatible_builds(&self, provider_id: &ProviderId, version: &str) -> Vec<RunnerBuild> {
        let Ok(base) = semver_util::parse_lenient(version) else { return Vec::new() };
        let state = self.state.lock().expect("registry state poisoned");
        state
            .builds
            .values()
            .filter(|b| {
                b.runtime_version_for(provider_id)
                    .and_then(|v| semver_util::parse_lenient(v).ok())
                    .is_some_and(|candidate| semver_util::caret_compatible(&candidate, &base))
            })
            .cloned()
            .collect()
    }

    /// Deprecates every `known_good`/`testing` build whose `built_at` is
    /// older than `auto_deprecate_days` (spec §4.3). Returns the deprecated
    /// build ids.
    pub fn auto_deprecate(&self) -> Vec<BuildId> {
        let cutoff = Utc::now() - chrono::Duration::days(self.auto_deprecate_days);
        let stale: Vec<BuildId> = {
            let state = self.state.lock().expect("registry state poisoned");
            state
                .entries
                .values()
                .filter(|e| matches!(e.status, EntryStatus::KnownGood | EntryStatus::Testing))
                .filter_map(|e| state.builds.get(&e.build_id).map(|b| (e.build_id.clone(), b.built_at)))
                .filter(|(_, built_at)| *built_at < cutoff)
                .map(|(id, _)| id)
                .collect()
        };
        for build_id in &stale {
            let _ = self.deprecate_build(build_id, "Auto-deprecated due to age");
        }
        stale
    }

    pub fn get_build(&self, build_id: &BuildId) -> Option<RunnerBuild> {
        self.state.lock().expect("registry state poisoned").builds.get(build_id).cloned()
    }

    pub fn get_entry(&self, build_id: &BuildId) -> Option<KnownGoodEntry> {
        self.state.lock().expect("registry state poisoned").entries.get(build_id).cloned()
    }

    pub fn export_data(&self) -> RegistrySnapshot {
        let state = self.state.lock().expect("registry state poisoned");
        RegistrySnapshot {
            versions: state.versions.clone(),
            builds: state.builds.clone(),
            entries: state.entries.clone(),
        }
    }

    pub fn import_data(&self, snapshot: RegistrySnapshot) {
        let mut state = self.state.lock().expect("registry state poisoned");
        let mut order: Vec<BuildId> = snapshot.builds.values().map(|b| b.build_id.clone()).collect();
        order.sort_by_key(|id| snapshot.builds.get(id).map(|b| b.built_at).unwrap_or_else(Utc::now));
        state.versions = snapshot.versions;
        state.builds = snapshot.builds;
        state.entries = snapshot.entries;
        state.build_order = order;
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;
    use village_common::ids::SuiteId;
    use village_common::model::{CanaryMetrics, RuntimeVersion};

    fn make_build(runner_version: &str, provider_version: &str) -> RunnerBuild {
        let mut runtimes = Map::new();
        runtimes.insert(ProviderId::from("codex"), provider_version.to_string());
        RunnerBuild::new(runner_version, runtimes, Utc::now())
    }

    fn compatible_result(build_id: BuildId) -> CompatibilityResult {
        CompatibilityResult::new(build_id, SuiteId::new(), CompatStatus::Compatible, Utc::now())
    }

    fn passed_canary(build_id: BuildId) -> CanaryTestResult {
        CanaryTestResult {
            build_id,
            suite_id: SuiteId::new(),
            status: TestSuiteStatus::Passed,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            test_results: vec![],
            metrics: CanaryMetrics::compute(&[]),
        }
    }

    #[test]
    fn register_build_rejects_duplicate_id() {
        let registry = KnownGoodRegistry::new(20, 100, 90);
        let build = make_build("1.0.0", "1.0.0");
        registry.register_build(build.clone()).unwrap();
        let err = registry.register_build(build).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_BUILD");
    }

    #[test]
    fn promote_requires_a_compatible_result() {
        let registry = KnownGoodRegistry::new(20, 100, 90);
        let build = make_build("1.0.0", "1.0.0");
        let build_id = build.build_id.clone();
        registry.register_build(build).unwrap();

        let err = registry.promote_build(&build_id).unwrap_err();
        assert_eq!(err.code(), "PROMOTION_REQUIRES_COMPATIBLE_RESULT");

        registry.add_compatibility_result(&build_id, compatible_result(build_id.clone())).unwrap();
        registry.promote_build(&build_id).unwrap();
        let entry = registry.get_entry(&build_id).unwrap();
        assert_eq!(entry.status, EntryStatus::KnownGood);
        assert_eq!(entry.recommendation, Recommendation::Recommended);
    }

    #[test]
    fn trimming_never_evicts_a_version_used_by_a_known_good_build() {
        let registry = KnownGoodRegistry::new(1, 100, 90);
        let build = make_build("1.0.0", "1.0.0");
        let build_id = build.build_id.clone();
        registry.register_build(build).unwrap();
        registry.add_compatibility_result(&build_id, compatible_result(build_id.clone())).unwrap();
        registry.promote_build(&build_id).unwrap();

        registry.register_version(RuntimeVersion::new(ProviderId::from("codex"), "1.0.0", Utc::now()));
        registry.register_version(RuntimeVersion::new(ProviderId::from("codex"), "2.0.0", Utc::now()));

        let versions = registry.export_data().versions;
        let codex_versions = &versions[&ProviderId::from("codex")];
        assert!(codex_versions.contains_key("1.0.0"), "known_good build's version must survive trimming");
    }

    #[test]
    fn get_recommended_build_for_stable_picks_recommended_known_good() {
        let registry = KnownGoodRegistry::new(20, 100, 90);
        let build = make_build("1.0.0", "1.0.0");
        let build_id = build.build_id.clone();
        registry.register_build(build).unwrap();
        registry.add_compatibility_result(&build_id, compatible_result(build_id.clone())).unwrap();
        registry.promote_build(&build_id).unwrap();

        let recommended = registry.get_recommended_build(ReleaseChannel::Stable).unwrap();
        assert_eq!(recommended.build_id, build_id);
    }

    #[test]
    fn mark_version_canary_passed_only_on_passed_status() {
        let registry = KnownGoodRegistry::new(20, 100, 90);
        registry.register_version(RuntimeVersion::new(ProviderId::from("codex"), "1.0.0", Utc::now()));
        let build_id = BuildId::new();

        let mut failed = passed_canary(build_id.clone());
        failed.status = TestSuiteStatus::Failed;
        registry.mark_version_canary_passed(&ProviderId::from("codex"), "1.0.0", &failed);
        let snapshot = registry.export_data();
        assert!(!snapshot.versions[&ProviderId::from("codex")]["1.0.0"].canary_passed());

        registry.mark_version_canary_passed(&ProviderId::from("codex"), "1.0.0", &passed_canary(build_id));
        let snapshot = registry.export_data();
        assert!(snapshot.versions[&ProviderId::from("codex")]["1.0.0"].canary_passed());
    }

    #[test]
    fn export_then_import_round_trips() {
        let registry = KnownGoodRegistry::new(20, 100, 90);
        let build = make_build("1.0.0", "1.0.0");
        let build_id = build.build_id.clone();
        registry.register_build(build).unwrap();
        registry.register_version(RuntimeVersion::new(ProviderId::from("codex"), "1.0.0", Utc::now()));

        let snapshot = registry.export_data();
        let restored = KnownGoodRegistry::new(20, 100, 90);
        restored.import_data(snapshot.clone());
        assert_eq!(restored.export_data().builds.len(), snapshot.builds.len());
        assert!(restored.get_build(&build_id).is_some());
    }

    #[test]
    fn find_compatible_builds_matches_caret_range() {
        let registry = KnownGoodRegistry::new(20, 100, 90);
        registry.register_build(make_build("1.0.0", "1.2.0")).unwrap();
        registry.register_build(make_build("2.0.0", "2.0.0")).unwrap();

        let compatible = registry.find_compatible_builds(&ProviderId::from("codex"), "1.2.0");
        assert_eq!(compatible.len(), 1);
        assert_eq!(compatible[0].runner_version, "1.0.0");
    }
}
