//! Rate-limited post-update sweeps over opted-in repos (spec §4.5). Sweeps
//! produce PRs; they never merge — `SweepConfig::new` doesn't even accept
//! an `auto_merge` argument, so there is no path to set it `true`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use village_common::errors::{PipelineError, Result};
use village_common::ids::{BuildId, JobId, SweepId};
use village_common::model::{SweepConfig, SweepJob, SweepJobState, SweepRepoTarget, SweepResult, SweepStatus, SweepType};

use crate::event_bus::EventBus;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// External collaborator that actually performs one repo's sweep (applying
/// fixes, opening a PR). Out of scope to implement for real here — a build
/// wires a collaborator that shells out to the agent CLI or a codemod tool.
pub trait RepoSweeper: Send + Sync {
    fn sweep(&self, sweep_id: SweepId, target: SweepRepoTarget) -> BoxFuture<'static, SweepResult>;
}

/// Always reports `no_changes`, used as a default/test collaborator.
pub struct NoopSweeper;

impl RepoSweeper for NoopSweeper {
    fn sweep(&self, sweep_id: SweepId, target: SweepRepoTarget) -> BoxFuture<'static, SweepResult> {
        Box::pin(async move {
            SweepResult {
                sweep_id,
                repo_url: target.repo_url,
                status: SweepStatus::NoChanges,
                pr_url: None,
                changes_summary: None,
                duration_ms: 0,
                error: None,
                completed_at: Utc::now(),
            }
        })
    }
}

/// Running totals across every sweep this manager has completed (spec
/// §4.5 "update aggregate stats").
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct SweepStats {
    pub total_sweeps: u64,
    pub total_repos_swept: u64,
    pub total_prs_created: u64,
    pub avg_duration_ms: f64,
    pub success_rate: f64,
}

impl SweepStats {
    fn record(&mut self, job: &SweepJob) {
        self.total_sweeps += 1;
        let repos = job.results.len() as u64;
        self.total_repos_swept += repos;
        self.total_prs_created += job.results.iter().filter(|r| r.pr_url.is_some()).count() as u64;

        let total_duration: u64 = job.results.iter().map(|r| r.duration_ms).sum();
        let successes = job.results.iter().filter(|r| r.status == SweepStatus::Success).count() as u64;

        if repos > 0 {
            let prior_repos = self.total_repos_swept - repos;
            let prior_duration_total = self.avg_duration_ms * prior_repos as f64;
            self.avg_duration_ms = (prior_duration_total + total_duration as f64) / self.total_repos_swept as f64;

            let prior_successes = (self.success_rate * prior_repos as f64).round() as u64;
            self.success_rate = (prior_successes + successes) as f64 / self.total_repos_swept as f64;
        }
    }
}

struct ManagerState {
    jobs: HashMap<JobId, SweepJob>,
    cancelled: std::collections::HashSet<JobId>,
    stats: SweepStats,
}

pub struct SweepManager {
    state: Arc<Mutex<ManagerState>>,
    sweeper: Arc<dyn RepoSweeper>,
    max_concurrent_sweeps: usize,
    events: Arc<EventBus<village_common::events::SweepEvent>>,
}

impl SweepManager {
    pub fn new(sweeper: Arc<dyn RepoSweeper>, max_concurrent_sweeps: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManagerState {
                jobs: HashMap::new(),
                cancelled: std::collections::HashSet::new(),
                stats: SweepStats::default(),
            })),
            sweeper,
            max_concurrent_sweeps,
            events: Arc::new(EventBus::default()),
        }
    }

    pub fn events(&self) -> Arc<EventBus<village_common::events::SweepEvent>> {
        self.events.clone()
    }

    pub fn stats(&self) -> SweepStats {
        self.state.lock().expect("sweep manager state poisoned").stats
    }

    /// Build a `SweepConfig` from opted-in repos and kick off the sweep
    /// (spec §4.5 `triggerPostUpdateSweep`).
    pub fn trigger_post_update_sweep(
        &self,
        build_id: BuildId,
        repos: Vec<SweepRepoTarget>,
        sweep_type: SweepType,
        create_prs: bool,
        max_repos_per_run: Option<u32>,
        rate_limit: Option<u32>,
    ) -> Result<JobId> {
        let opted_in: Vec<SweepRepoTarget> = repos.into_iter().filter(|r| r.opted_in).collect();
        if opted_in.is_empty() {
            return Err(PipelineError::EmptyOptedInRepos);
        }

        let rate_limit = rate_limit.unwrap_or(10);
        if rate_limit == 0 {
            return Err(PipelineError::InvalidRateLimit(rate_limit));
        }

        let config = SweepConfig::new(
            build_id,
            opted_in,
            sweep_type,
            create_prs,
            1,
            max_repos_per_run.unwrap_or(100),
            rate_limit,
        );
        self.start_sweep(config)
    }

    /// Accept a pre-built config and launch the execution loop on a
    /// detached task (spec §4.5 `startSweep`): returns the job id
    /// immediately, the loop itself runs asynchronously.
    pub fn start_sweep(&self, config: SweepConfig) -> Result<JobId> {
        let mut state = self.state.lock().expect("sweep manager state poisoned");
        let active = state.jobs.values().filter(|j| j.state == SweepJobState::Running || j.state == SweepJobState::Pending).count();
        if active >= self.max_concurrent_sweeps {
            return Err(PipelineError::TooManyConcurrentSweeps { max: self.max_concurrent_sweeps });
        }

        let job = SweepJob::new(config);
        let job_id = job.job_id.clone();
        state.jobs.insert(job_id.clone(), job);
        drop(state);

        let state = self.state.clone();
        let sweeper = self.sweeper.clone();
        let events = self.events.clone();
        let job_id_for_task = job_id.clone();
        tokio::spawn(async move {
            run_sweep_loop(state, sweeper, events, job_id_for_task).await;
        });

        Ok(job_id)
    }

    /// Allowed from `pending` or `running` (spec §4.5 `cancelSweep`); the
    /// loop itself observes the cancellation flag between repos.
    pub fn cancel_sweep(&self, job_id: &JobId) -> Result<()> {
        let mut state = self.state.lock().expect("sweep manager state poisoned");
        let job = state.jobs.get(job_id).ok_or_else(|| PipelineError::UnknownSweepJob(job_id.clone()))?;
        if job.state != SweepJobState::Pending && job.state != SweepJobState::Running {
            return Err(PipelineError::Internal(format!("cannot cancel sweep job in state {:?}", job.state)));
        }
        state.cancelled.insert(job_id.clone());
        Ok(())
    }

    pub fn get_job(&self, job_id: &JobId) -> Option<SweepJob> {
        self.state.lock().expect("sweep manager state poisoned").jobs.get(job_id).cloned()
    }
}

async fn run_sweep_loop(
    state: Arc<Mutex<ManagerState>>,
    sweeper: Arc<dyn RepoSweeper>,
    events: Arc<EventBus<village_common::events::SweepEvent>>,
    job_id: JobId,
) {
    {
        let mut state = state.lock().expect("sweep manager state poisoned");
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.state = SweepJobState::Running;
            job.started_at = Some(Utc::now());
        }
    }

    let (targets, rate_limit, sweep_id) = {
        let state = state.lock().expect("sweep manager state poisoned");
        let job = state.jobs.get(&job_id).expect("job just inserted");
        let take = job.repos_remaining as usize;
        (
            job.config.target_repos.iter().take(take).cloned().collect::<Vec<_>>(),
            job.config.rate_limit,
            job.config.sweep_id.clone(),
        )
    };

    let delay = std::time::Duration::from_millis(if rate_limit > 0 { 60_000 / rate_limit as u64 } else { 0 });
    let mut cancelled = false;

    for (idx, target) in targets.into_iter().enumerate() {
        {
            let state_guard = state.lock().expect("sweep manager state poisoned");
            if state_guard.cancelled.contains(&job_id) {
                cancelled = true;
            }
        }
        if cancelled {
            break;
        }

        let result = sweeper.sweep(sweep_id.clone(), target).await;

        {
            let mut state_guard = state.lock().expect("sweep manager state poisoned");
            if let Some(job) = state_guard.jobs.get_mut(&job_id) {
                let pr_url = result.pr_url.clone();
                job.results.push(result.clone());
                job.repos_completed += 1;
                job.repos_remaining = job.repos_remaining.saturating_sub(1);
                events.emit(village_common::events::SweepEvent::RepoSwept { job_id: job_id.clone(), result: result.clone() });
                if let Some(pr_url) = pr_url {
                    events.emit(village_common::events::SweepEvent::PrCreated {
                        job_id: job_id.clone(),
                        repo_url: result.repo_url.clone(),
                        pr_url,
                    });
                }
            }
        }

        let is_last = {
            let state_guard = state.lock().expect("sweep manager state poisoned");
            state_guard.jobs.get(&job_id).is_none_or(|j| j.repos_remaining == 0)
        };
        let _ = idx;
        if !is_last && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    let mut state_guard = state.lock().expect("sweep manager state poisoned");
    if let Some(job) = state_guard.jobs.get_mut(&job_id) {
        job.state = if cancelled { SweepJobState::Cancelled } else { SweepJobState::Completed };
        job.completed_at = Some(Utc::now());
        let finished = job.clone();
        state_guard.stats.record(&finished);
    }
    state_guard.cancelled.remove(&job_id);
    let final_state = state_guard.jobs.get(&job_id).map(|j| j.state);
    drop(state_guard);

    if final_state == Some(SweepJobState::Completed) {
        events.emit(village_common::events::SweepEvent::SweepCompleted { job_id: job_id.clone(), sweep_id });
    }
}
