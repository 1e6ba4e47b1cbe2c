//! AI Agent Village Update Pipeline daemon.
//!
//! Watches runner/adapter release sources, runs canary suites against new
//! builds, maintains the known-good registry, progresses staged rollouts,
//! and triggers post-update repo sweeps — the five components wired
//! together by [`pipeline::Pipeline`].

#![forbid(unsafe_code)]

mod broadcast;
mod canary_runner;
mod event_bus;
mod house_activity;
mod http_api;
mod metrics;
mod pipeline;
mod registry;
mod rollout_controller;
mod scheduler;
mod sweep_manager;
mod version_watcher;
#[cfg(feature = "ws-relay")]
mod ws_relay;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use broadcast::LoggingBroadcastSink;
use canary_runner::{AlwaysPassExecutor, CanaryRunner};
use house_activity::HouseActivityCore;
use registry::KnownGoodRegistry;
use rollout_controller::{RolloutController, ZeroMetricsSource};
use sweep_manager::{NoopSweeper, SweepManager};
use version_watcher::{ReqwestFetcher, VersionWatcher};
use village_common::config::PipelineConfig;

#[derive(Parser)]
#[command(name = "villaged")]
#[command(author, version, about = "AI Agent Village update pipeline daemon")]
struct Cli {
    /// Path to TOML config file. Absent file falls back to defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for the observability HTTP server (/health, /ready, /metrics, /status).
    #[arg(long, default_value = "9090")]
    http_port: u16,

    /// Path to a JSON registry snapshot, loaded on startup if present and
    /// written back out on shutdown.
    #[arg(long)]
    snapshot_path: Option<PathBuf>,

    /// Enable verbose (debug) logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("info") };
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    info!("Starting villaged...");

    let config = PipelineConfig::load(cli.config.as_deref()).context("failed to load pipeline config")?;
    info!(
        auto_canary = config.auto_canary,
        auto_rollout = config.auto_rollout,
        auto_sweep = config.auto_sweep,
        "loaded pipeline config"
    );

    let version_watcher = Arc::new(VersionWatcher::new(Arc::new(ReqwestFetcher::new(Duration::from_secs(10)))));
    let canary_runner =
        Arc::new(CanaryRunner::new(Arc::new(AlwaysPassExecutor), config.canary.default_timeout_ms, config.canary.retry_count));
    let registry = Arc::new(KnownGoodRegistry::new(
        config.registry.max_versions_per_provider,
        config.registry.max_builds,
        config.registry.auto_deprecate_days,
    ));
    let rollout_controller = Arc::new(RolloutController::new(
        config.max_concurrent_rollouts,
        config.rollback_thresholds,
        Arc::new(ZeroMetricsSource),
    ));
    let sweep_manager = Arc::new(SweepManager::new(Arc::new(NoopSweeper), config.sweep.max_concurrent_sweeps));

    #[cfg(feature = "ws-relay")]
    let (broadcast_sink, ws_router) = {
        let sink = Arc::new(ws_relay::WsRelaySink::new());
        let router = ws_relay::router(sink.clone());
        (sink as Arc<dyn broadcast::BroadcastSink>, Some(router))
    };
    #[cfg(not(feature = "ws-relay"))]
    let (broadcast_sink, ws_router): (Arc<dyn broadcast::BroadcastSink>, Option<axum::Router>) =
        (Arc::new(LoggingBroadcastSink::default()), None);

    let house_activity = HouseActivityCore::new(broadcast_sink, config.house_activity.broadcast_coalesce_ms);

    if let Some(ref path) = cli.snapshot_path {
        if path.exists() {
            match load_snapshot(path) {
                Ok(snapshot) => {
                    registry.import_data(snapshot);
                    info!("Loaded registry snapshot from {:?}", path);
                }
                Err(e) => warn!("Failed to load registry snapshot from {:?}: {}", path, e),
            }
        } else {
            info!("No registry snapshot at {:?}; starting with an empty registry", path);
        }
    }

    let pipeline = Arc::new(pipeline::Pipeline::new(
        config,
        version_watcher,
        canary_runner,
        registry,
        rollout_controller,
        sweep_manager,
        house_activity,
    ));

    pipeline.start().await;
    info!("Pipeline started");

    let http_state = http_api::HttpState {
        pipeline: pipeline.clone(),
        version: env!("CARGO_PKG_VERSION"),
        started_at: Instant::now(),
        pid: std::process::id(),
    };
    let mut router = http_api::create_router(http_state);
    if let Some(ws_router) = ws_router {
        router = router.merge(ws_router);
    }
    let _http_handle = http_api::start_server(cli.http_port, router).await;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl_c")?;
    info!("Shutdown signal received, stopping pipeline...");
    pipeline.stop();

    if let Some(ref path) = cli.snapshot_path {
        if let Err(e) = save_snapshot(path, &pipeline.registry.export_data()) {
            warn!("Failed to write registry snapshot to {:?}: {}", path, e);
        } else {
            info!("Wrote registry snapshot to {:?}", path);
        }
    }

    Ok(())
}

fn load_snapshot(path: &std::path::Path) -> Result<registry::RegistrySnapshot> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn save_snapshot(path: &std::path::Path, snapshot: &registry::RegistrySnapshot) -> Result<()> {
    let raw = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(path, raw)?;
    Ok(())
}
