//! HTTP API for observability endpoints.
//!
//! Provides:
//! - `/metrics` - Prometheus metrics export
//! - `/health` - Basic daemon health check
//! - `/ready` - Readiness probe (version watcher running)
//! - `/status` - Pipeline-level JSON summary

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde_json::json;

use crate::metrics;
use crate::pipeline::Pipeline;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    /// Pipeline orchestrator, queried for status and metrics snapshots.
    pub pipeline: Arc<Pipeline>,
    /// Daemon version.
    pub version: &'static str,
    /// Daemon start time.
    pub started_at: Instant,
    /// Daemon PID.
    pub pid: u32,
}

/// Create the HTTP router for observability endpoints.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .with_state(Arc::new(state))
}

/// Handler for `/metrics` - Prometheus metrics export.
async fn metrics_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    metrics::observe(&state.pipeline.get_status());
    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            output,
        )
            .into_response(),
        Err(e) => {
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode metrics: {}", e)).into_response()
        }
    }
}

/// Handler for `/health` - Basic daemon health check.
///
/// Returns 200 OK if the daemon is running.
async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let uptime_secs = state.started_at.elapsed().as_secs();

    Json(json!({
        "status": "healthy",
        "version": state.version,
        "pid": state.pid,
        "uptime_seconds": uptime_secs,
    }))
}

/// Handler for `/ready` - Readiness probe.
///
/// Returns 200 OK once the version watcher has started polling its
/// sources, 503 otherwise (matches `Pipeline::start` being the point
/// where the daemon begins doing useful work).
async fn ready_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let status = state.pipeline.get_status();

    if status.version_watcher_started {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "version_watcher_started": true,
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "reason": "version_watcher_not_started",
                "version_watcher_started": false,
            })),
        )
    }
}

/// Handler for `/status` - pipeline-level JSON summary (spec §4.6
/// `get_status`): active counts and the recommended build per channel.
async fn status_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let status = state.pipeline.get_status();

    let recommended_builds: serde_json::Map<String, serde_json::Value> = status
        .recommended_builds
        .iter()
        .map(|(channel, build)| {
            let key = match channel {
                village_common::model::ReleaseChannel::Stable => "stable",
                village_common::model::ReleaseChannel::Beta => "beta",
                village_common::model::ReleaseChannel::Pinned => "pinned",
            };
            (key.to_string(), serde_json::to_value(build).unwrap_or(serde_json::Value::Null))
        })
        .collect();

    Json(json!({
        "version_watcher_started": status.version_watcher_started,
        "canary_running": status.canary_running,
        "concurrent_rollouts": status.concurrent_rollouts,
        "sweep_stats": {
            "total_sweeps": status.sweep_stats.total_sweeps,
            "total_repos_swept": status.sweep_stats.total_repos_swept,
            "total_prs_created": status.sweep_stats.total_prs_created,
            "avg_duration_ms": status.sweep_stats.avg_duration_ms,
            "success_rate": status.sweep_stats.success_rate,
        },
        "recommended_builds": recommended_builds,
    }))
}

/// Start the HTTP server for observability endpoints.
///
/// `router` is the fully assembled router (already merged with any optional
/// `ws-relay` routes by the caller); this just binds and serves it.
///
/// # Arguments
/// * `port` - The port to listen on.
/// * `router` - The router to serve.
///
/// # Returns
/// A handle to the spawned server task.
pub async fn start_server(port: u16, router: Router) -> tokio::task::JoinHandle<Result<(), std::io::Error>> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!("Starting HTTP server for observability on port {}", port);

    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await
    })
}
