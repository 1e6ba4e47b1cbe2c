//! Orchestrator wiring the five components together (spec §4.6). Owns one
//! instance of each, re-emits their events as pipeline-level events, and
//! applies the `auto_canary`/`auto_rollout`/`auto_sweep` config toggles by
//! subscribing to the components it automates rather than being called
//! into by them directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use village_common::config::PipelineConfig;
use village_common::events::{
    CanaryEvent, PipelineEvent, RegistryEvent, RolloutEventPayload, SweepEvent, VersionWatcherEvent,
};
use village_common::ids::BuildId;
use village_common::model::{ChannelConfig, ReleaseChannel, RunnerBuild, RuntimeVersion, SweepRepoTarget, SweepType, TestSuiteStatus};

use crate::canary_runner::CanaryRunner;
use crate::event_bus::EventBus;
use crate::house_activity::HouseActivityCore;
use crate::registry::KnownGoodRegistry;
use crate::rollout_controller::RolloutController;
use crate::sweep_manager::SweepManager;
use crate::version_watcher::VersionWatcher;

/// Snapshot returned by [`Pipeline::get_status`] (spec §4.6 "summarizing
/// active counts and recommended builds per channel").
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub version_watcher_started: bool,
    pub canary_running: bool,
    pub concurrent_rollouts: usize,
    pub sweep_stats: crate::sweep_manager::SweepStats,
    pub recommended_builds: HashMap<ReleaseChannel, Option<RunnerBuild>>,
}

/// The five core components plus the config toggles that wire them
/// together. `channel_configs` is shared with `RolloutController::tick`.
pub struct Pipeline {
    pub version_watcher: Arc<VersionWatcher>,
    pub canary_runner: Arc<CanaryRunner>,
    pub registry: Arc<KnownGoodRegistry>,
    pub rollout_controller: Arc<RolloutController>,
    pub sweep_manager: Arc<SweepManager>,
    pub house_activity: Arc<HouseActivityCore>,
    config: PipelineConfig,
    channel_configs: Arc<HashMap<ReleaseChannel, ChannelConfig>>,
    sweep_repos: Mutex<Vec<SweepRepoTarget>>,
    events: Arc<EventBus<PipelineEvent>>,
}

fn default_channel_configs() -> HashMap<ReleaseChannel, ChannelConfig> {
    [ReleaseChannel::Stable, ReleaseChannel::Beta, ReleaseChannel::Pinned]
        .into_iter()
        .map(|c| (c, ChannelConfig::for_channel(c)))
        .collect()
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        version_watcher: Arc<VersionWatcher>,
        canary_runner: Arc<CanaryRunner>,
        registry: Arc<KnownGoodRegistry>,
        rollout_controller: Arc<RolloutController>,
        sweep_manager: Arc<SweepManager>,
        house_activity: Arc<HouseActivityCore>,
    ) -> Arc<Self> {
        let pipeline = Arc::new(Self {
            version_watcher,
            canary_runner,
            registry,
            rollout_controller,
            sweep_manager,
            house_activity,
            config,
            channel_configs: Arc::new(default_channel_configs()),
            sweep_repos: Mutex::new(Vec::new()),
            events: Arc::new(EventBus::default()),
        });
        pipeline.wire_events();
        pipeline
    }

    pub fn events(&self) -> Arc<EventBus<PipelineEvent>> {
        self.events.clone()
    }

    /// Repos eligible for `auto_sweep`'s post-rollout sweep. Call once at
    /// startup (or whenever opt-in state changes); the orchestrator never
    /// discovers this list on its own (spec §1, webhook/GitHub integration
    /// out of scope).
    pub fn set_sweep_repos(&self, repos: Vec<SweepRepoTarget>) {
        *self.sweep_repos.lock().expect("pipeline sweep repo list poisoned") = repos;
    }

    pub fn channel_config(&self, channel: ReleaseChannel) -> ChannelConfig {
        self.channel_configs.get(&channel).cloned().unwrap_or_else(|| ChannelConfig::for_channel(channel))
    }

    /// Re-emit every component event as a pipeline-level event and apply
    /// the `auto_*` toggles (spec §4.6). Each subscription runs on its own
    /// detached task; a lagging or dropped receiver on one never blocks
    /// another (spec §6 "a failed subscriber is logged, never fatal").
    fn wire_events(self: &Arc<Self>) {
        self.wire_version_watcher();
        self.wire_canary_runner();
        self.wire_registry();
        self.wire_rollout_controller();
        self.wire_sweep_manager();
    }

    fn wire_version_watcher(self: &Arc<Self>) {
        let pipeline = self.clone();
        let mut rx = self.version_watcher.events().subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let VersionWatcherEvent::VersionDiscovered { provider_id, version, source_url, .. } = &event {
                    pipeline.events.emit(PipelineEvent::NewVersionDetected {
                        provider_id: provider_id.clone(),
                        version: version.clone(),
                    });
                    if pipeline.config.auto_canary {
                        let mut runtime_version = RuntimeVersion::new(provider_id.clone(), version.clone(), chrono::Utc::now());
                        if let Some(url) = source_url {
                            runtime_version = runtime_version.with_source_url(url.clone());
                        }
                        pipeline.registry.register_version(runtime_version);
                    }
                }
            }
        });
    }

    fn wire_canary_runner(self: &Arc<Self>) {
        let pipeline = self.clone();
        let mut rx = self.canary_runner.events().subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                match event {
                    CanaryEvent::SuiteStarted { build_id, .. } => {
                        pipeline.events.emit(PipelineEvent::CanaryStarted { build_id });
                    }
                    CanaryEvent::SuiteCompleted { result } => {
                        let build_id = result.build_id.clone();
                        pipeline.events.emit(PipelineEvent::CanaryCompleted { build_id: build_id.clone(), result: result.clone() });
                        if pipeline.config.auto_rollout && result.status == TestSuiteStatus::Passed {
                            pipeline.auto_initiate_rollout(build_id, result);
                        }
                    }
                    _ => {}
                }
            }
        });
    }

    /// `auto_rollout` (spec §4.6): on a passing canary, roll the build out
    /// on the `stable` channel. There is no signal in a canary result that
    /// names a target channel, so `stable` — the most conservative option
    /// — is the one this toggle automates; `beta`/`pinned` rollouts still
    /// go through `initiate_rollout` directly.
    fn auto_initiate_rollout(self: &Arc<Self>, build_id: BuildId, result: village_common::model::CanaryTestResult) {
        let pipeline = self.clone();
        tokio::spawn(async move {
            let channel_config = pipeline.channel_config(ReleaseChannel::Stable);
            match pipeline.rollout_controller.initiate_rollout(build_id, ReleaseChannel::Stable, &channel_config, Some(&result)) {
                Ok(rollout) => {
                    pipeline.events.emit(PipelineEvent::RolloutInitiated { rollout_id: rollout.rollout_id });
                }
                Err(err) => pipeline.emit_pipeline_error(err),
            }
        });
    }

    fn wire_registry(self: &Arc<Self>) {
        let pipeline = self.clone();
        let mut rx = self.registry.events().subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let RegistryEvent::BuildDeprecated { build_id, reason } = event {
                    tracing::info!(%build_id, reason, "build deprecated");
                }
            }
        });
    }

    fn wire_rollout_controller(self: &Arc<Self>) {
        let pipeline = self.clone();
        let mut rx = self.rollout_controller.events().subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                match event {
                    RolloutEventPayload::RolloutCompleted { rollout_id } => {
                        pipeline.events.emit(PipelineEvent::RolloutCompleted { rollout_id: rollout_id.clone() });
                        if pipeline.config.auto_sweep {
                            pipeline.auto_trigger_sweep(rollout_id);
                        }
                    }
                    RolloutEventPayload::RollbackCompleted { rollout_id } => {
                        let reason = pipeline
                            .rollout_controller
                            .get_rollout(&rollout_id)
                            .and_then(|r| r.error)
                            .unwrap_or_default();
                        pipeline.events.emit(PipelineEvent::RollbackCompleted { rollout_id, reason });
                    }
                    _ => {}
                }
            }
        });
    }

    /// `auto_sweep` (spec §4.6): on rollout completion, sweep every
    /// registered opted-in repo against the rollout's target build. A
    /// rollout with no registered repos (the default, empty list) simply
    /// produces no sweep — `trigger_post_update_sweep` would reject an
    /// empty opted-in set anyway.
    fn auto_trigger_sweep(self: &Arc<Self>, rollout_id: village_common::ids::RolloutId) {
        let Some(rollout) = self.rollout_controller.get_rollout(&rollout_id) else { return };
        let repos = self.sweep_repos.lock().expect("pipeline sweep repo list poisoned").clone();
        if repos.is_empty() {
            return;
        }
        match self.sweep_manager.trigger_post_update_sweep(rollout.target_build_id, repos, SweepType::Maintenance, true, None, None) {
            Ok(job_id) => self.events.emit(PipelineEvent::SweepTriggered { job_id }),
            Err(err) => self.emit_pipeline_error(err),
        }
    }

    fn wire_sweep_manager(self: &Arc<Self>) {
        let pipeline = self.clone();
        let mut rx = self.sweep_manager.events().subscribe();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                if let SweepEvent::SweepCompleted { job_id, .. } = event {
                    pipeline.events.emit(PipelineEvent::SweepCompleted { job_id });
                }
            }
        });
    }

    fn emit_pipeline_error(self: &Arc<Self>, err: village_common::errors::PipelineError) {
        if err.is_internal() {
            tracing::error!(code = err.code(), "pipeline internal error: {err}");
        }
        self.events.emit(PipelineEvent::PipelineError { message: err.to_string(), code: err.code() });
    }

    /// Start every component's background work: the version watcher's
    /// per-source polling and the rollout controller's automatic
    /// progression tick (spec §4.6 `start()`).
    pub async fn start(self: &Arc<Self>) {
        self.version_watcher.start().await;
        self.rollout_controller.start_auto_progression(self.config.rollout_tick_interval(), self.channel_configs.clone());
    }

    /// Cancel every timer owned by a component (spec §4.6 `stop()`;
    /// §5 "on shutdown every timer is released").
    pub fn stop(&self) {
        self.version_watcher.stop();
        self.rollout_controller.stop();
    }

    pub fn get_status(&self) -> PipelineStatus {
        let mut recommended_builds = HashMap::new();
        for channel in [ReleaseChannel::Stable, ReleaseChannel::Beta, ReleaseChannel::Pinned] {
            recommended_builds.insert(channel, self.registry.get_recommended_build(channel));
        }
        PipelineStatus {
            version_watcher_started: self.version_watcher.is_started(),
            canary_running: self.canary_runner.is_running(),
            concurrent_rollouts: self.rollout_controller.concurrent_rollout_count(),
            sweep_stats: self.sweep_manager.stats(),
            recommended_builds,
        }
    }
}
