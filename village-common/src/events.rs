//! Typed event payloads emitted by each pipeline component (spec §6 Event
//! bus). The source's untyped pub/sub becomes one sum type per emitter per
//! the Design Notes (§9 "Polymorphic event consumption"); subscribers match
//! on the enum instead of inspecting an "any-shape" payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BuildId, JobId, ProviderId, RolloutId, SweepId};
use crate::model::{ActiveRollout, CanaryTestResult, HouseActivity, SweepResult};

/// Events emitted by `VersionWatcher` (spec §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VersionWatcherEvent {
    VersionDiscovered {
        provider_id: ProviderId,
        version: String,
        previous_version: Option<String>,
        source_url: Option<String>,
        discovered_at: DateTime<Utc>,
    },
    CheckError {
        provider_id: ProviderId,
        message: String,
    },
}

/// Events emitted by `CanaryRunner` (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanaryEvent {
    SuiteStarted {
        build_id: BuildId,
        suite_id: crate::ids::SuiteId,
    },
    TestStarted {
        build_id: BuildId,
        test_id: crate::ids::TestId,
    },
    TestCompleted {
        build_id: BuildId,
        test_id: crate::ids::TestId,
        status: crate::model::TestCaseStatus,
    },
    TestRetried {
        build_id: BuildId,
        test_id: crate::ids::TestId,
        attempt: u32,
    },
    SuiteCompleted {
        result: CanaryTestResult,
    },
}

/// Events emitted by `KnownGoodRegistry` (spec §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    VersionRegistered { provider_id: ProviderId, version: String },
    BuildRegistered { build_id: BuildId },
    BuildPromoted { build_id: BuildId },
    BuildDeprecated { build_id: BuildId, reason: String },
    CompatResultAdded { build_id: BuildId, result_id: crate::ids::ResultId },
}

/// Events emitted by `RolloutController` (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RolloutEventPayload {
    RolloutStarted { rollout: ActiveRollout },
    StageAdvanced { rollout_id: RolloutId, percentage: u8 },
    RolloutCompleted { rollout_id: RolloutId },
    RolloutPaused { rollout_id: RolloutId, reason: Option<String> },
    RolloutResumed { rollout_id: RolloutId },
    RollbackInitiated { rollout_id: RolloutId, reason: String },
    RollbackCompleted { rollout_id: RolloutId },
}

/// Events emitted by `SweepManager` (spec §4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SweepEvent {
    RepoSwept { job_id: JobId, result: SweepResult },
    PrCreated { job_id: JobId, repo_url: String, pr_url: String },
    SweepCompleted { job_id: JobId, sweep_id: SweepId },
    SweepFailed { job_id: JobId, sweep_id: SweepId, error: String },
}

/// Pipeline-level events: re-emissions of subcomponent events plus the
/// orchestrator's own (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    NewVersionDetected { provider_id: ProviderId, version: String },
    CanaryStarted { build_id: BuildId },
    CanaryCompleted { build_id: BuildId, result: CanaryTestResult },
    RolloutInitiated { rollout_id: RolloutId },
    RolloutCompleted { rollout_id: RolloutId },
    RollbackCompleted { rollout_id: RolloutId, reason: String },
    SweepTriggered { job_id: JobId },
    SweepCompleted { job_id: JobId },
    PipelineError { message: String, code: &'static str },
}

/// Events emitted by the HouseActivity core (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HouseActivityEvent {
    HouseActivity { snapshot: HouseActivity },
}

/// A retained-last-value accessor replacing the source's "eavesdrop on the
/// last emitted payload" idiom (Design Notes §9). Each component keeps one
/// of these per event name it wants externally peekable without requiring
/// a live subscriber.
#[derive(Debug, Clone, Default)]
pub struct LastValue<T: Clone> {
    value: Option<T>,
}

impl<T: Clone> LastValue<T> {
    pub fn set(&mut self, value: T) {
        self.value = Some(value);
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_value_starts_empty_and_retains_most_recent() {
        let mut lv: LastValue<u32> = LastValue::default();
        assert!(lv.get().is_none());
        lv.set(1);
        lv.set(2);
        assert_eq!(lv.get(), Some(&2));
    }

    #[test]
    fn pipeline_event_serializes_with_tagged_type() {
        let event = PipelineEvent::PipelineError { message: "boom".into(), code: "INTERNAL" };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "pipeline_error");
        assert_eq!(json["code"], "INTERNAL");
    }
}
