//! Staged percentage rollout with org assignment, metrics-gated automatic
//! progression, and rollback (spec §4.4).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::json;
use village_common::config::RollbackThresholds;
use village_common::errors::{PipelineError, Result};
use village_common::events::RolloutEventPayload;
use village_common::ids::{BuildId, OrgId, RolloutId};
use village_common::model::{
    ActiveRollout, Actor, CanaryTestResult, ChannelConfig, OrgAssignment, OrgRuntimeConfig, ReleaseChannel,
    RolloutEvent, RolloutState, TestSuiteStatus,
};

use crate::event_bus::EventBus;
use crate::scheduler::IntervalTimer;

const AUDIT_LOG_CAPACITY: usize = 10_000;

/// Per-rollout metrics collected during an automatic-progression tick.
/// Spec §9 flags the source's `collectRolloutMetrics` as a hard-coded
/// placeholder and asks implementers to define how real metrics are
/// sourced; here that's an injected trait so `villaged` can wire real
/// session telemetry while tests supply canned numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RolloutMetrics {
    pub sessions_started: u64,
    pub failure_rate: f64,
    pub disconnect_rate: f64,
}

pub trait MetricsSource: Send + Sync {
    fn collect(&self, rollout: &ActiveRollout) -> RolloutMetrics;
}

/// Default source returning all-zero metrics, matching the source's
/// documented placeholder behavior exactly (§9 Open Question) until a real
/// collaborator is wired in.
pub struct ZeroMetricsSource;

impl MetricsSource for ZeroMetricsSource {
    fn collect(&self, _rollout: &ActiveRollout) -> RolloutMetrics {
        RolloutMetrics::default()
    }
}

struct ControllerState {
    rollouts: std::collections::HashMap<RolloutId, ActiveRollout>,
    assignments: std::collections::HashMap<OrgId, OrgAssignment>,
    orgs: std::collections::HashMap<OrgId, OrgRuntimeConfig>,
    audit_log: VecDeque<RolloutEvent>,
    tick_timer: Option<IntervalTimer>,
}

pub struct RolloutController {
    state: Mutex<ControllerState>,
    max_concurrent_rollouts: usize,
    thresholds: RollbackThresholds,
    metrics_source: Arc<dyn MetricsSource>,
    events: Arc<EventBus<RolloutEventPayload>>,
}

impl RolloutController {
    pub fn new(max_concurrent_rollouts: usize, thresholds: RollbackThresholds, metrics_source: Arc<dyn MetricsSource>) -> Self {
        Self {
            state: Mutex::new(ControllerState {
                rollouts: std::collections::HashMap::new(),
                assignments: std::collections::HashMap::new(),
                orgs: std::collections::HashMap::new(),
                audit_log: VecDeque::new(),
                tick_timer: None,
            }),
            max_concurrent_rollouts,
            thresholds,
            metrics_source,
            events: Arc::new(EventBus::default()),
        }
    }

    pub fn events(&self) -> Arc<EventBus<RolloutEventPayload>> {
        self.events.clone()
    }

    pub fn register_org(&self, org: OrgRuntimeConfig) {
        self.state.lock().expect("controller state poisoned").orgs.insert(org.org_id.clone(), org);
    }

    fn push_audit(state: &mut ControllerState, event: RolloutEvent) {
        if state.audit_log.len() >= AUDIT_LOG_CAPACITY {
            state.audit_log.pop_front();
        }
        state.audit_log.push_back(event);
    }

    /// Initiate a staged rollout of `build_id` over `channel` (spec §4.4).
    pub fn initiate_rollout(
        &self,
        build_id: BuildId,
        channel: ReleaseChannel,
        channel_config: &ChannelConfig,
        canary_result: Option<&CanaryTestResult>,
    ) -> Result<ActiveRollout> {
        if channel_config.requires_canary {
            let result = canary_result.ok_or_else(|| PipelineError::CanaryMissing { build: build_id.clone() })?;
            if result.status != TestSuiteStatus::Passed {
                return Err(PipelineError::CanaryDidNotPass {
                    build: build_id.clone(),
                    status: format!("{:?}", result.status),
                });
            }
            if result.metrics.pass_rate < channel_config.canary_threshold {
                return Err(PipelineError::CanaryBelowThreshold {
                    build: build_id.clone(),
                    pass_rate: result.metrics.pass_rate,
                    threshold: channel_config.canary_threshold,
                    channel,
                });
            }
        }

        let mut state = self.state.lock().expect("controller state poisoned");
        let concurrent = state.rollouts.values().filter(|r| r.state == RolloutState::RollingOut).count();
        if concurrent >= self.max_concurrent_rollouts {
            return Err(PipelineError::TooManyConcurrentRollouts { max: self.max_concurrent_rollouts });
        }

        let now = Utc::now();
        let mut rollout = ActiveRollout::new(build_id.clone(), channel, channel_config.first_stage(), now);
        self.assign_orgs(&mut state, &mut rollout);

        let event = RolloutEvent::new(
            rollout.rollout_id.clone(),
            None,
            channel,
            "rollout_started",
            rollout.current_percentage,
            now,
            Actor::system(),
        )
        .with_builds(None, Some(build_id));
        Self::push_audit(&mut state, event);

        state.rollouts.insert(rollout.rollout_id.clone(), rollout.clone());
        drop(state);

        self.events.emit(RolloutEventPayload::RolloutStarted { rollout: rollout.clone() });
        Ok(rollout)
    }

    /// Assignment algorithm (spec §4.4): population is every org on
    /// `channel` that (at <100%) doesn't require enterprise approval;
    /// `target_count = ceil(population * percentage / 100)`; newly assigned
    /// orgs are taken from the unassigned population in deterministic
    /// (org id) order.
    fn assign_orgs(&self, state: &mut ControllerState, rollout: &mut ActiveRollout) {
        let percentage = rollout.current_percentage;
        let mut population: Vec<OrgId> = state
            .orgs
            .values()
            .filter(|o| o.channel == rollout.channel)
            .filter(|o| percentage >= 100 || !o.requires_approval())
            .map(|o| o.org_id.clone())
            .collect();
        population.sort();

        let target_count = ((population.len() as u64 * percentage as u64).div_ceil(100)) as usize;
        let already = rollout.affected_orgs.len();
        let to_assign = target_count.saturating_sub(already);

        let now = Utc::now();
        let mut assigned = 0usize;
        for org_id in population {
            if assigned >= to_assign {
                break;
            }
            if rollout.affected_orgs.contains(&org_id) {
                continue;
            }
            let current_build_id = state.assignments.get(&org_id).map(|a| a.target_build_id.clone());
            state.assignments.insert(
                org_id.clone(),
                OrgAssignment {
                    org_id: org_id.clone(),
                    current_build_id,
                    target_build_id: rollout.target_build_id.clone(),
                    percentage,
                    assigned_at: now,
                    channel: rollout.channel,
                },
            );
            rollout.affected_orgs.insert(org_id);
            assigned += 1;
        }
    }

    pub fn advance_rollout(&self, rollout_id: &RolloutId, channel_config: &ChannelConfig) -> Result<ActiveRollout> {
        let mut state = self.state.lock().expect("controller state poisoned");
        let rollout = state.rollouts.get(rollout_id).cloned().ok_or_else(|| PipelineError::UnknownRollout(rollout_id.clone()))?;
        if rollout.state != RolloutState::RollingOut {
            return Err(PipelineError::InvalidRolloutState {
                rollout: rollout_id.clone(),
                operation: "advance_rollout",
                state: rollout.state,
            });
        }

        let now = Utc::now();
        if channel_config.is_last_stage(rollout.current_percentage) {
            let rollout_mut = state.rollouts.get_mut(rollout_id).expect("checked above");
            rollout_mut.state = RolloutState::Completed;
            rollout_mut.last_updated_at = now;
            let final_state = rollout_mut.clone();

            let event = RolloutEvent::new(rollout_id.clone(), None, rollout.channel, "rollout_completed", rollout.current_percentage, now, Actor::system());
            Self::push_audit(&mut state, event);
            drop(state);
            self.events.emit(RolloutEventPayload::RolloutCompleted { rollout_id: rollout_id.clone() });
            return Ok(final_state);
        }

        let next = channel_config
            .next_stage(rollout.current_percentage)
            .expect("is_last_stage returned false so a next stage must exist");

        let rollout_mut = state.rollouts.get_mut(rollout_id).expect("checked above");
        rollout_mut.current_percentage = next;
        rollout_mut.last_updated_at = now;
        let mut rollout_for_assignment = rollout_mut.clone();
        self.assign_orgs(&mut state, &mut rollout_for_assignment);
        *state.rollouts.get_mut(rollout_id).expect("checked above") = rollout_for_assignment.clone();

        let event = RolloutEvent::new(rollout_id.clone(), None, rollout.channel, "stage_advanced", next, now, Actor::system());
        Self::push_audit(&mut state, event);
        drop(state);

        self.events.emit(RolloutEventPayload::StageAdvanced { rollout_id: rollout_id.clone(), percentage: next });
        Ok(rollout_for_assignment)
    }

    pub fn pause_rollout(&self, rollout_id: &RolloutId, reason: Option<String>) -> Result<()> {
        let mut state = self.state.lock().expect("controller state poisoned");
        let rollout = state.rollouts.get_mut(rollout_id).ok_or_else(|| PipelineError::UnknownRollout(rollout_id.clone()))?;
        if rollout.state != RolloutState::RollingOut {
            return Err(PipelineError::InvalidRolloutState {
                rollout: rollout_id.clone(),
                operation: "pause_rollout",
                state: rollout.state,
            });
        }
        rollout.state = RolloutState::Paused;
        rollout.last_updated_at = Utc::now();
        let channel = rollout.channel;
        let percentage = rollout.current_percentage;

        let mut event = RolloutEvent::new(rollout_id.clone(), None, channel, "rollout_paused", percentage, Utc::now(), Actor::system());
        if let Some(reason) = &reason {
            event = event.with_metadata(json!({ "reason": reason }));
        }
        Self::push_audit(&mut state, event);
        drop(state);
        self.events.emit(RolloutEventPayload::RolloutPaused { rollout_id: rollout_id.clone(), reason });
        Ok(())
    }

    pub fn resume_rollout(&self, rollout_id: &RolloutId) -> Result<()> {
        let mut state = self.state.lock().expect("controller state poisoned");
        let rollout = state.rollouts.get_mut(rollout_id).ok_or_else(|| PipelineError::UnknownRollout(rollout_id.clone()))?;
        if rollout.state != RolloutState::Paused {
            return Err(PipelineError::InvalidRolloutState {
                rollout: rollout_id.clone(),
                operation: "resume_rollout",
                state: rollout.state,
            });
        }
        rollout.state = RolloutState::RollingOut;
        rollout.last_updated_at = Utc::now();
        let channel = rollout.channel;
        let percentage = rollout.current_percentage;

        let event = RolloutEvent::new(rollout_id.clone(), None, channel, "rollout_resumed", percentage, Utc::now(), Actor::system());
        Self::push_audit(&mut state, event);
        drop(state);
        self.events.emit(RolloutEventPayload::RolloutResumed { rollout_id: rollout_id.clone() });
        Ok(())
    }

    /// Roll back a rollout: revert every affected org's assignment to its
    /// prior target build (deleting the assignment if it had none), clear
    /// `affected_orgs`, and append the two-event audit trail (spec §4.4,
    /// scenario 4 in §8).
    pub fn rollback(&self, rollout_id: &RolloutId, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        let mut state = self.state.lock().expect("controller state poisoned");
        let rollout = state.rollouts.get(rollout_id).cloned().ok_or_else(|| PipelineError::UnknownRollout(rollout_id.clone()))?;

        let now = Utc::now();
        let target_build_id = rollout.target_build_id.clone();
        for org_id in &rollout.affected_orgs {
            let revert_to = state.assignments.get(org_id).and_then(|a| {
                (a.target_build_id == target_build_id).then(|| a.current_build_id.clone()).flatten()
            });
            match revert_to {
                Some(prior_build) => {
                    if let Some(assignment) = state.assignments.get_mut(org_id) {
                        assignment.target_build_id = prior_build;
                        assignment.current_build_id = None;
                        assignment.assigned_at = now;
                    }
                }
                None => {
                    state.assignments.remove(org_id);
                }
            }
        }

        let rollout_mut = state.rollouts.get_mut(rollout_id).expect("checked above");
        rollout_mut.state = RolloutState::RolledBack;
        rollout_mut.error = Some(reason.clone());
        rollout_mut.affected_orgs.clear();
        rollout_mut.last_updated_at = now;
        let channel = rollout_mut.channel;
        let percentage = rollout_mut.current_percentage;

        let initiated = RolloutEvent::new(rollout_id.clone(), None, channel, "rollback_initiated", percentage, now, Actor::system())
            .with_metadata(json!({ "reason": reason }));
        Self::push_audit(&mut state, initiated);
        let completed = RolloutEvent::new(rollout_id.clone(), None, channel, "rollback_completed", percentage, now, Actor::system());
        Self::push_audit(&mut state, completed);
        drop(state);

        self.events.emit(RolloutEventPayload::RollbackInitiated { rollout_id: rollout_id.clone(), reason });
        self.events.emit(RolloutEventPayload::RollbackCompleted { rollout_id: rollout_id.clone() });
        Ok(())
    }

    pub fn get_rollout(&self, rollout_id: &RolloutId) -> Option<ActiveRollout> {
        self.state.lock().expect("controller state poisoned").rollouts.get(rollout_id).cloned()
    }

    pub fn get_org_assignment(&self, org_id: &OrgId) -> Option<OrgAssignment> {
        self.state.lock().expect("controller state poisoned").assignments.get(org_id).cloned()
    }

    /// Filtered view over the audit log (spec §4.4): a wildcard (`org_id ==
    /// None`) record is included for any org filter.
    pub fn get_event_log(&self, org_id: Option<&OrgId>, channel: Option<ReleaseChannel>, since: Option<chrono::DateTime<Utc>>) -> Vec<RolloutEvent> {
        self.state
            .lock()
            .expect("controller state poisoned")
            .audit_log
            .iter()
            .filter(|e| channel.is_none_or(|c| e.channel == c))
            .filter(|e| since.is_none_or(|s| e.timestamp >= s))
            .filter(|e| match org_id {
                None => true,
                Some(org) => e.org_id.is_none() || e.org_id.as_ref() == Some(org),
            })
            .cloned()
            .collect()
    }

    /// One periodic tick: for every `rolling_out` rollout whose delay has
    /// elapsed, collect metrics and either roll back (bad metrics) or
    /// advance (spec §4.4 "Automatic progression").
    pub fn tick(&self, channel_configs: &std::collections::HashMap<ReleaseChannel, ChannelConfig>) {
        let rollouts: Vec<ActiveRollout> = {
            let state = self.state.lock().expect("controller state poisoned");
            state.rollouts.values().filter(|r| r.state == RolloutState::RollingOut).cloned().collect()
        };
        let now = Utc::now();
        for rollout in rollouts {
            let Some(config) = channel_configs.get(&rollout.channel) else { continue };
            let hours_elapsed = rollout.hours_since_last_update(now);
            if hours_elapsed < config.rollout_delay_hours as f64 {
                continue;
            }
            let metrics = self.metrics_source.collect(&rollout);
            if metrics.sessions_started < self.thresholds.min_session_count {
                continue;
            }
            if metrics.failure_rate > self.thresholds.max_failure_rate || metrics.disconnect_rate > self.thresholds.max_disconnect_rate {
                let reason = format!(
                    "auto-rollback: failure_rate={:.3} disconnect_rate={:.3} sessions={}",
                    metrics.failure_rate, metrics.disconnect_rate, metrics.sessions_started
                );
                let _ = self.rollback(&rollout.rollout_id, reason);
            } else {
                let _ = self.advance_rollout(&rollout.rollout_id, config);
            }
        }
    }

    pub fn start_auto_progression(self: &Arc<Self>, interval: std::time::Duration, channel_configs: Arc<std::collections::HashMap<ReleaseChannel, ChannelConfig>>) {
        let mut state = self.state.lock().expect("controller state poisoned");
        if state.tick_timer.is_some() {
            return;
        }
        let controller = self.clone();
        let timer = IntervalTimer::start(interval, move || {
            let controller = controller.clone();
            let channel_configs = channel_configs.clone();
            async move {
                controller.tick(&channel_configs);
            }
        });
        state.tick_timer = Some(timer);
    }

    pub fn stop(&self) {
        let mut state = self.state.lock().expect("controller state poisoned");
        if let Some(mut timer) = state.tick_timer.take() {
            timer.stop();
        }
    }

    pub fn concurrent_rollout_count(&self) -> usize {
        self.state
            .lock()
            .expect("controller state poisoned")
            .rollouts
            .values()
            .filter(|r| r.state == RolloutState::RollingOut)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use village_common::model::{CanaryMetrics, NotificationPrefs};
    use village_common::ids::SuiteId;

    fn org(id: &str, channel: ReleaseChannel) -> OrgRuntimeConfig {
        OrgRuntimeConfig {
            org_id: OrgId::from_str(id),
            channel,
            pinned_build_id: None,
            beta_opt_in: false,
            auto_upgrade: true,
            notifications: NotificationPrefs::default(),
            enterprise: None,
            updated_at: Utc::now(),
            updated_by: "test".into(),
        }
    }

    fn passing_canary(build_id: BuildId, pass_rate: f64) -> CanaryTestResult {
        let mut metrics = CanaryMetrics::compute(&[]);
        metrics.pass_rate = pass_rate;
        metrics.total_tests = 10;
        CanaryTestResult {
            build_id,
            suite_id: SuiteId::new(),
            status: TestSuiteStatus::Passed,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            test_results: vec![],
            metrics,
        }
    }

    fn controller_with_orgs(n: usize, channel: ReleaseChannel) -> RolloutController {
        let controller = RolloutController::new(3, RollbackThresholds::default(), Arc::new(ZeroMetricsSource));
        for i in 0..n {
            controller.register_org(org(&format!("org-{i:02}"), channel));
        }
        controller
    }

    #[test]
    fn happy_path_stable_rollout_reaches_completed_with_expected_audit_log() {
        let controller = controller_with_orgs(10, ReleaseChannel::Stable);
        let stable = ChannelConfig::for_channel(ReleaseChannel::Stable);
        let build_id = BuildId::new();
        let canary = passing_canary(build_id.clone(), 1.0);

        let rollout = controller.initiate_rollout(build_id, ReleaseChannel::Stable, &stable, Some(&canary)).unwrap();
        assert_eq!(rollout.current_percentage, 1);

        let r = controller.advance_rollout(&rollout.rollout_id, &stable).unwrap();
        assert_eq!(r.current_percentage, 10);
        let r = controller.advance_rollout(&rollout.rollout_id, &stable).unwrap();
        assert_eq!(r.current_percentage, 50);
        let r = controller.advance_rollout(&rollout.rollout_id, &stable).unwrap();
        assert_eq!(r.current_percentage, 100);
        let r = controller.advance_rollout(&rollout.rollout_id, &stable).unwrap();
        assert_eq!(r.state, RolloutState::Completed);

        let log = controller.get_event_log(None, None, None);
        let types: Vec<&str> = log.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["rollout_started", "stage_advanced", "stage_advanced", "stage_advanced", "rollout_completed"]);
    }

    #[test]
    fn canary_below_threshold_rejects_without_emitting_rollout_started() {
        let controller = controller_with_orgs(5, ReleaseChannel::Stable);
        let stable = ChannelConfig::for_channel(ReleaseChannel::Stable);
        let build_id = BuildId::new();
        let canary = passing_canary(build_id.clone(), 0.50);

        let err = controller.initiate_rollout(build_id, ReleaseChannel::Stable, &stable, Some(&canary)).unwrap_err();
        assert_eq!(err.code(), "CANARY_BELOW_THRESHOLD");
        assert!(controller.get_event_log(None, None, None).is_empty());
    }

    #[test]
    fn pinned_channel_bypasses_canary_and_goes_straight_to_100() {
        let controller = controller_with_orgs(5, ReleaseChannel::Pinned);
        let pinned = ChannelConfig::for_channel(ReleaseChannel::Pinned);
        let build_id = BuildId::new();

        let rollout = controller.initiate_rollout(build_id, ReleaseChannel::Pinned, &pinned, None).unwrap();
        assert_eq!(rollout.current_percentage, 100);

        let r = controller.advance_rollout(&rollout.rollout_id, &pinned).unwrap();
        assert_eq!(r.state, RolloutState::Completed);
    }

    #[test]
    fn rollback_reverts_org_assignments_and_clears_affected_orgs() {
        let controller = controller_with_orgs(4, ReleaseChannel::Beta);
        let beta = ChannelConfig::for_channel(ReleaseChannel::Beta);

        let build_1 = BuildId::new();
        let canary_1 = passing_canary(build_1.clone(), 1.0);
        let rollout_1 = controller.initiate_rollout(build_1.clone(), ReleaseChannel::Beta, &beta, Some(&canary_1)).unwrap();
        controller.advance_rollout(&rollout_1.rollout_id, &beta).unwrap();
        controller.advance_rollout(&rollout_1.rollout_id, &beta).unwrap();

        let build_2 = BuildId::new();
        let canary_2 = passing_canary(build_2.clone(), 1.0);
        let rollout_2 = controller.initiate_rollout(build_2, ReleaseChannel::Beta, &beta, Some(&canary_2)).unwrap();
        let affected: Vec<OrgId> = rollout_2.affected_orgs.iter().cloned().collect();
        assert!(!affected.is_empty());

        controller.rollback(&rollout_2.rollout_id, "regression").unwrap();
        let after = controller.get_rollout(&rollout_2.rollout_id).unwrap();
        assert_eq!(after.state, RolloutState::RolledBack);
        assert!(after.affected_orgs.is_empty());

        for org_id in &affected {
            if let Some(assignment) = controller.get_org_assignment(org_id) {
                assert_eq!(assignment.target_build_id, build_1);
                assert!(assignment.current_build_id.is_none());
            }
        }

        let log = controller.get_event_log(None, None, None);
        let last_two: Vec<&str> = log.iter().rev().take(2).map(|e| e.event_type.as_str()).rev().collect();
        assert_eq!(last_two, vec!["rollback_initiated", "rollback_completed"]);
        let initiated = log.iter().find(|e| e.event_type == "rollback_initiated").unwrap();
        assert_eq!(initiated.metadata.as_ref().unwrap()["reason"], "regression");
    }

    #[test]
    fn too_many_concurrent_rollouts_is_rejected() {
        let controller = RolloutController::new(1, RollbackThresholds::default(), Arc::new(ZeroMetricsSource));
        let stable = ChannelConfig::for_channel(ReleaseChannel::Stable);

        let build_a = BuildId::new();
        controller.initiate_rollout(build_a.clone(), ReleaseChannel::Stable, &stable, Some(&passing_canary(build_a, 1.0))).unwrap();

        let build_b = BuildId::new();
        let err = controller
            .initiate_rollout(build_b.clone(), ReleaseChannel::Stable, &stable, Some(&passing_canary(build_b, 1.0)))
            .unwrap_err();
        assert_eq!(err.code(), "TOO_MANY_CONCURRENT_ROLLOUTS");
    }

    #[test]
    fn pause_then_resume_round_trips_state() {
        let controller = controller_with_orgs(5, ReleaseChannel::Stable);
        let stable = ChannelConfig::for_channel(ReleaseChannel::Stable);
        let build_id = BuildId::new();
        let rollout = controller
            .initiate_rollout(build_id.clone(), ReleaseChannel::Stable, &stable, Some(&passing_canary(build_id, 1.0)))
            .unwrap();

        controller.pause_rollout(&rollout.rollout_id, Some("investigating".into())).unwrap();
        assert_eq!(controller.get_rollout(&rollout.rollout_id).unwrap().state, RolloutState::Paused);
        assert!(controller.advance_rollout(&rollout.rollout_id, &stable).is_err());

        controller.resume_rollout(&rollout.rollout_id).unwrap();
        assert_eq!(controller.get_rollout(&rollout.rollout_id).unwrap().state, RolloutState::RollingOut);
    }

    #[test]
    fn tick_advances_when_metrics_are_healthy_and_rolls_back_when_not() {
        struct FixedMetrics(RolloutMetrics);
        impl MetricsSource for FixedMetrics {
            fn collect(&self, _rollout: &ActiveRollout) -> RolloutMetrics {
                self.0
            }
        }

        let healthy = RolloutMetrics { sessions_started: 200, failure_rate: 0.01, disconnect_rate: 0.01 };
        let controller = RolloutController::new(3, RollbackThresholds::default(), Arc::new(FixedMetrics(healthy)));
        for i in 0..10 {
            controller.register_org(org(&format!("org-{i:02}"), ReleaseChannel::Pinned));
        }
        let pinned = ChannelConfig::for_channel(ReleaseChannel::Pinned);
        let build_id = BuildId::new();
        let rollout = controller.initiate_rollout(build_id, ReleaseChannel::Pinned, &pinned, None).unwrap();

        let mut configs = std::collections::HashMap::new();
        configs.insert(ReleaseChannel::Pinned, pinned.clone());
        controller.tick(&configs);
        assert_eq!(controller.get_rollout(&rollout.rollout_id).unwrap().state, RolloutState::Completed);
    }

    #[test]
    fn event_log_filter_includes_wildcard_org_events() {
        let controller = controller_with_orgs(5, ReleaseChannel::Stable);
        let stable = ChannelConfig::for_channel(ReleaseChannel::Stable);
        let build_id = BuildId::new();
        controller
            .initiate_rollout(build_id.clone(), ReleaseChannel::Stable, &stable, Some(&passing_canary(build_id, 1.0)))
            .unwrap();

        let filtered = controller.get_event_log(Some(&OrgId::from_str("org-00")), None, None);
        assert!(filtered.iter().any(|e| e.event_type == "rollout_started"));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use village_common::model::NotificationPrefs;

    fn org_for(idx: usize, channel: ReleaseChannel) -> OrgRuntimeConfig {
        OrgRuntimeConfig {
            org_id: OrgId::from_str(&format!("org-{idx:02}")),
            channel,
            pinned_build_id: None,
            beta_opt_in: false,
            auto_upgrade: true,
            notifications: NotificationPrefs::default(),
            enterprise: None,
            updated_at: Utc::now(),
            updated_by: "proptest".into(),
        }
    }

    /// The percentage-monotonicity invariant from spec §8: for any channel,
    /// `ActiveRollout.currentPercentage` is always a member of
    /// `channelConfig.rolloutStages` after any number of `advance_rollout`
    /// calls (further advances past `completed` are simply rejected and
    /// leave the percentage untouched).
    proptest! {
        #[test]
        fn current_percentage_always_a_channel_stage(
            channel_idx in 0usize..3,
            advances in 0usize..8,
        ) {
            let channel = [ReleaseChannel::Stable, ReleaseChannel::Beta, ReleaseChannel::Pinned][channel_idx];
            let config = ChannelConfig::for_channel(channel);
            let controller = RolloutController::new(3, RollbackThresholds::default(), Arc::new(ZeroMetricsSource));
            for i in 0..10 {
                controller.register_org(org_for(i, channel));
            }

            let build_id = BuildId::new();
            let canary = if config.requires_canary { Some(passing_canary(build_id.clone(), 1.0)) } else { None };
            let rollout = controller
                .initiate_rollout(build_id, channel, &config, canary.as_ref())
                .expect("a fresh build with a passing canary always initiates");
            prop_assert!(config.rollout_stages.contains(&rollout.current_percentage));

            let mut rollout_id = rollout.rollout_id;
            for _ in 0..advances {
                match controller.advance_rollout(&rollout_id, &config) {
                    Ok(advanced) => {
                        prop_assert!(config.rollout_stages.contains(&advanced.current_percentage));
                        rollout_id = advanced.rollout_id;
                    }
                    Err(_) => break,
                }
            }
        }
    }
}
