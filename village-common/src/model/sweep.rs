//! Post-update sweep configuration, per-repo results, and the runtime job
//! wrapper (spec §3 SweepConfig / SweepRepoTarget / SweepResult / SweepJob,
//! §4.5 SweepManager).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BuildId, OrgId, SweepId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepType {
    Maintenance,
    LintFix,
    DependencyUpdate,
    Custom,
}

/// Sweep run configuration. `auto_merge` is always `false`; the only
/// constructor that produces a `SweepConfig`, [`SweepConfig::new`], does
/// not even accept a value for it, so there is no code path that can set
/// it to `true` (spec §4.5 hard safety invariant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    pub sweep_id: SweepId,
    pub triggered_by_build_id: BuildId,
    pub target_repos: Vec<SweepRepoTarget>,
    pub sweep_type: SweepType,
    pub create_prs: bool,
    pub auto_merge: bool,
    pub priority: u8,
    pub max_repos_per_run: u32,
    /// Repos swept per minute.
    pub rate_limit: u32,
}

impl SweepConfig {
    pub fn new(
        triggered_by_build_id: BuildId,
        target_repos: Vec<SweepRepoTarget>,
        sweep_type: SweepType,
        create_prs: bool,
        priority: u8,
        max_repos_per_run: u32,
        rate_limit: u32,
    ) -> Self {
        Self {
            sweep_id: SweepId::new(),
            triggered_by_build_id,
            target_repos,
            sweep_type,
            create_prs,
            auto_merge: false,
            priority,
            max_repos_per_run,
            rate_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRepoTarget {
    pub repo_url: String,
    pub org_id: OrgId,
    pub opted_in: bool,
    pub last_swept_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepStatus {
    Success,
    Failed,
    Skipped,
    NoChanges,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub sweep_id: SweepId,
    pub repo_url: String,
    pub status: SweepStatus,
    pub pr_url: Option<String>,
    pub changes_summary: Option<String>,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepJobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepJob {
    pub job_id: crate::ids::JobId,
    pub config: SweepConfig,
    pub state: SweepJobState,
    pub repos_completed: u32,
    pub repos_remaining: u32,
    pub results: Vec<SweepResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SweepJob {
    pub fn new(config: SweepConfig) -> Self {
        let repos_remaining = (config.target_repos.len() as u32).min(config.max_repos_per_run);
        Self {
            job_id: crate::ids::JobId::new(),
            config,
            state: SweepJobState::Pending,
            repos_completed: 0,
            repos_remaining,
            results: Vec::new(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}
