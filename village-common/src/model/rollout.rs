//! Active rollouts, org assignments, and the append-only audit log (spec
//! §3 ActiveRollout / OrgRuntimeConfig / OrgAssignment / RolloutEvent, §4.4
//! RolloutController).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{BuildId, OrgId, ResultId, RolloutId};
use super::channel::ReleaseChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutState {
    Pending,
    CanaryTesting,
    CanaryPassed,
    CanaryFailed,
    RollingOut,
    Paused,
    Completed,
    RolledBack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveRollout {
    pub rollout_id: RolloutId,
    pub target_build_id: BuildId,
    pub channel: ReleaseChannel,
    pub state: RolloutState,
    pub current_percentage: u8,
    pub target_percentage: u8,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub affected_orgs: HashSet<OrgId>,
    pub canary_result_id: Option<ResultId>,
    pub error: Option<String>,
}

impl ActiveRollout {
    pub fn new(target_build_id: BuildId, channel: ReleaseChannel, first_stage: u8, now: DateTime<Utc>) -> Self {
        Self {
            rollout_id: RolloutId::new(),
            target_build_id,
            channel,
            state: RolloutState::RollingOut,
            current_percentage: first_stage,
            target_percentage: 100,
            started_at: now,
            last_updated_at: now,
            affected_orgs: HashSet::new(),
            canary_result_id: None,
            error: None,
        }
    }

    pub fn hours_since_last_update(&self, now: DateTime<Utc>) -> f64 {
        (now - self.last_updated_at).num_milliseconds() as f64 / 3_600_000.0
    }
}

/// A named, organization-scoped set of runtime preferences. `pinned_build_id`
/// is required iff `channel == Pinned`, enforced by callers constructing
/// this type rather than at the type level (the invariant spans two
/// fields and is easier to check at the point of mutation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgRuntimeConfig {
    pub org_id: OrgId,
    pub channel: ReleaseChannel,
    pub pinned_build_id: Option<BuildId>,
    pub beta_opt_in: bool,
    pub auto_upgrade: bool,
    pub notifications: NotificationPrefs,
    pub enterprise: Option<EnterprisePolicy>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl OrgRuntimeConfig {
    /// `true` when this org's policy requires the rollout to have
    /// completed organizational approval before being offered the build at
    /// less than 100% (spec §4.4 assignment algorithm).
    pub fn requires_approval(&self) -> bool {
        self.enterprise.as_ref().is_some_and(|e| e.approval_required)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPrefs {
    pub on_new_version: bool,
    pub on_rollback: bool,
    pub slack_webhook: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnterprisePolicy {
    pub require_signed_builds: bool,
    pub min_canary_threshold: f64,
    pub approval_required: bool,
    pub audit_retention_days: u32,
}

/// Exactly one per org at a time: which build it's currently on and which
/// build it's being moved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgAssignment {
    pub org_id: OrgId,
    pub current_build_id: Option<BuildId>,
    pub target_build_id: BuildId,
    pub percentage: u8,
    pub assigned_at: DateTime<Utc>,
    pub channel: ReleaseChannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    System,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub actor_type: ActorType,
    pub id: String,
    pub name: Option<String>,
}

impl Actor {
    pub fn system() -> Self {
        Self {
            actor_type: ActorType::System,
            id: "pipeline".to_string(),
            name: Some("pipeline-system".to_string()),
        }
    }
}

/// An `org_id` of `None` represents the wildcard `'*'` audit record used
/// for rollout-wide events (started/completed/rollback).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutEvent {
    pub event_id: crate::ids::EventId,
    pub rollout_id: RolloutId,
    pub org_id: Option<OrgId>,
    pub from_build_id: Option<BuildId>,
    pub to_build_id: Option<BuildId>,
    pub channel: ReleaseChannel,
    pub event_type: String,
    pub current_percentage: u8,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub metadata: Option<Value>,
}

impl RolloutEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rollout_id: RolloutId,
        org_id: Option<OrgId>,
        channel: ReleaseChannel,
        event_type: impl Into<String>,
        current_percentage: u8,
        timestamp: DateTime<Utc>,
        actor: Actor,
    ) -> Self {
        Self {
            event_id: crate::ids::EventId::new(),
            rollout_id,
            org_id,
            from_build_id: None,
            to_build_id: None,
            channel,
            event_type: event_type.into(),
            current_percentage,
            timestamp,
            actor,
            metadata: None,
        }
    }

    pub fn with_builds(mut self, from: Option<BuildId>, to: Option<BuildId>) -> Self {
        self.from_build_id = from;
        self.to_build_id = to;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
