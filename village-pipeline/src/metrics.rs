//! Prometheus metrics export for `villaged`'s `/metrics` endpoint: a
//! small gauge registry encoded through `prometheus::TextEncoder`,
//! refreshed from a `PipelineStatus` snapshot just before each scrape.

use lazy_static::lazy_static;
use prometheus::{Encoder, GaugeVec, IntGauge, Opts, Registry, TextEncoder};

use crate::pipeline::PipelineStatus;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
    static ref CONCURRENT_ROLLOUTS: IntGauge = IntGauge::new(
        "village_concurrent_rollouts",
        "Number of rollouts currently in the rolling_out state"
    )
    .expect("metric name and help are static and well-formed");
    static ref CANARY_RUNNING: IntGauge = IntGauge::new(
        "village_canary_running",
        "1 if a canary suite is currently executing, else 0"
    )
    .expect("metric name and help are static and well-formed");
    static ref SWEEP_TOTAL_SWEEPS: IntGauge = IntGauge::new(
        "village_sweep_total_sweeps",
        "Total number of completed sweep jobs since startup"
    )
    .expect("metric name and help are static and well-formed");
    static ref SWEEP_TOTAL_REPOS: IntGauge = IntGauge::new(
        "village_sweep_total_repos_swept",
        "Total number of repos swept across all completed jobs since startup"
    )
    .expect("metric name and help are static and well-formed");
    static ref SWEEP_TOTAL_PRS: IntGauge = IntGauge::new(
        "village_sweep_total_prs_created",
        "Total number of PRs created across all completed sweep jobs since startup"
    )
    .expect("metric name and help are static and well-formed");
    static ref SWEEP_SUCCESS_RATE: prometheus::Gauge = prometheus::Gauge::new(
        "village_sweep_success_rate",
        "Running success rate across all completed sweep jobs, in [0, 1]"
    )
    .expect("metric name and help are static and well-formed");
    static ref RECOMMENDED_BUILD_PRESENT: GaugeVec = GaugeVec::new(
        Opts::new(
            "village_recommended_build_present",
            "1 if the registry has a recommended build for this channel, else 0"
        ),
        &["channel"],
    )
    .expect("metric name, help, and label names are static and well-formed");
}

/// Register every gauge with the process-wide registry. Idempotent:
/// `prometheus::Registry::register` errors on a duplicate, which this
/// swallows so `register_metrics` can safely be called more than once
/// (tests and a restarted HTTP server both do this).
pub fn register_metrics() {
    let _ = REGISTRY.register(Box::new(CONCURRENT_ROLLOUTS.clone()));
    let _ = REGISTRY.register(Box::new(CANARY_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(SWEEP_TOTAL_SWEEPS.clone()));
    let _ = REGISTRY.register(Box::new(SWEEP_TOTAL_REPOS.clone()));
    let _ = REGISTRY.register(Box::new(SWEEP_TOTAL_PRS.clone()));
    let _ = REGISTRY.register(Box::new(SWEEP_SUCCESS_RATE.clone()));
    let _ = REGISTRY.register(Box::new(RECOMMENDED_BUILD_PRESENT.clone()));
}

/// Refresh every gauge from a freshly taken [`PipelineStatus`] snapshot.
/// Called just before encoding so `/metrics` always reflects current
/// state rather than whatever the last background tick happened to set.
pub fn observe(status: &PipelineStatus) {
    CONCURRENT_ROLLOUTS.set(status.concurrent_rollouts as i64);
    CANARY_RUNNING.set(status.canary_running as i64);
    SWEEP_TOTAL_SWEEPS.set(status.sweep_stats.total_sweeps as i64);
    SWEEP_TOTAL_REPOS.set(status.sweep_stats.total_repos_swept as i64);
    SWEEP_TOTAL_PRS.set(status.sweep_stats.total_prs_created as i64);
    SWEEP_SUCCESS_RATE.set(status.sweep_stats.success_rate);

    for (channel, build) in &status.recommended_builds {
        let label = match channel {
            village_common::model::ReleaseChannel::Stable => "stable",
            village_common::model::ReleaseChannel::Beta => "beta",
            village_common::model::ReleaseChannel::Pinned => "pinned",
        };
        RECOMMENDED_BUILD_PRESENT.with_label_values(&[label]).set(if build.is_some() { 1.0 } else { 0.0 });
    }
}

/// Encode the current registry state as Prometheus text format.
pub fn encode_metrics() -> Result<Vec<u8>, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_status() -> PipelineStatus {
        PipelineStatus {
            version_watcher_started: true,
            canary_running: false,
            concurrent_rollouts: 2,
            sweep_stats: crate::sweep_manager::SweepStats {
                total_sweeps: 5,
                total_repos_swept: 40,
                total_prs_created: 12,
                avg_duration_ms: 120.0,
                success_rate: 0.9,
            },
            recommended_builds: HashMap::new(),
        }
    }

    #[test]
    fn observe_then_encode_contains_expected_gauge_names() {
        register_metrics();
        observe(&sample_status());
        let output = String::from_utf8(encode_metrics().unwrap()).unwrap();
        assert!(output.contains("village_concurrent_rollouts 2"));
        assert!(output.contains("village_sweep_total_sweeps 5"));
        assert!(output.contains("village_sweep_success_rate 0.9"));
    }
}
