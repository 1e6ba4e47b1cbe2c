//! Error catalog for the update pipeline.
//!
//! Mirrors the taxonomy in spec §7: validation, capacity, and policy errors
//! are surfaced directly to callers; I/O errors come from delegated
//! collaborators (HTTP fetches, canary execution); internal errors cover
//! invariant violations that should never happen in a correctly wired
//! pipeline. Every variant has a short machine-readable `code()` so callers
//! that need a structured error (the 409-style layout mentioned in §7) don't
//! have to pattern-match on Display text.

use thiserror::Error;

use crate::ids::{BuildId, JobId, OrgId, RolloutId};

/// Top-level error type returned by fallible pipeline operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineError {
    // -- Validation --
    #[error("unknown build: {0}")]
    UnknownBuild(BuildId),

    #[error("duplicate build id: {0}")]
    DuplicateBuild(BuildId),

    #[error("unknown rollout: {0}")]
    UnknownRollout(RolloutId),

    #[error("unknown sweep job: {0}")]
    UnknownSweepJob(JobId),

    #[error("unknown org: {0}")]
    UnknownOrg(OrgId),

    #[error("channel mismatch: rollout {rollout} is on {actual:?}, expected {expected:?}")]
    ChannelMismatch {
        rollout: RolloutId,
        expected: crate::model::channel::ReleaseChannel,
        actual: crate::model::channel::ReleaseChannel,
    },

    #[error("invalid state for {operation}: rollout {rollout} is {state:?}")]
    InvalidRolloutState {
        rollout: RolloutId,
        operation: &'static str,
        state: crate::model::rollout::RolloutState,
    },

    #[error("no opted-in repos supplied for sweep")]
    EmptyOptedInRepos,

    #[error("invalid rate limit: {0} repos/minute")]
    InvalidRateLimit(u32),

    // -- Capacity --
    #[error("maximum concurrent rollouts reached ({max})")]
    TooManyConcurrentRollouts { max: usize },

    #[error("maximum concurrent sweeps reached ({max})")]
    TooManyConcurrentSweeps { max: usize },

    // -- Policy --
    #[error("build {build} has no canary result for channel requiring one")]
    CanaryMissing { build: BuildId },

    #[error("build {build}'s canary result did not pass (status: {status})")]
    CanaryDidNotPass { build: BuildId, status: String },

    #[error(
        "build {build}'s canary pass rate {pass_rate:.3} is below the {channel:?} threshold {threshold:.3}"
    )]
    CanaryBelowThreshold {
        build: BuildId,
        pass_rate: f64,
        threshold: f64,
        channel: crate::model::channel::ReleaseChannel,
    },

    #[error("promotion requires at least one compatible result for build {0}")]
    PromotionRequiresCompatibleResult(BuildId),

    // -- Internal --
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Short machine-readable code, stable across releases, matching the
    /// `SCREAMING_SNAKE_CASE` convention used by structured-error consumers.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::UnknownBuild(_) => "UNKNOWN_BUILD",
            PipelineError::DuplicateBuild(_) => "DUPLICATE_BUILD",
            PipelineError::UnknownRollout(_) => "UNKNOWN_ROLLOUT",
            PipelineError::UnknownSweepJob(_) => "UNKNOWN_SWEEP_JOB",
            PipelineError::UnknownOrg(_) => "UNKNOWN_ORG",
            PipelineError::ChannelMismatch { .. } => "CHANNEL_MISMATCH",
            PipelineError::InvalidRolloutState { .. } => "INVALID_ROLLOUT_STATE",
            PipelineError::EmptyOptedInRepos => "EMPTY_OPTED_IN_REPOS",
            PipelineError::InvalidRateLimit(_) => "INVALID_RATE_LIMIT",
            PipelineError::TooManyConcurrentRollouts { .. } => "TOO_MANY_CONCURRENT_ROLLOUTS",
            PipelineError::TooManyConcurrentSweeps { .. } => "TOO_MANY_CONCURRENT_SWEEPS",
            PipelineError::CanaryMissing { .. } => "CANARY_MISSING",
            PipelineError::CanaryDidNotPass { .. } => "CANARY_DID_NOT_PASS",
            PipelineError::CanaryBelowThreshold { .. } => "CANARY_BELOW_THRESHOLD",
            PipelineError::PromotionRequiresCompatibleResult(_) => "PROMOTION_REQUIRES_COMPATIBLE_RESULT",
            PipelineError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether this class of error should be logged as a pipeline-level
    /// `pipeline_error` event (spec §7: validation/capacity/policy errors
    /// are surfaced to the caller, not logged as pipeline errors).
    pub fn is_internal(&self) -> bool {
        matches!(self, PipelineError::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_stable_and_screaming_snake_case() {
        let err = PipelineError::UnknownBuild(BuildId::from_str("b1"));
        assert_eq!(err.code(), "UNKNOWN_BUILD");
        assert!(err.code().chars().all(|c| c.is_ascii_uppercase() || c == '_'));
    }

    #[test]
    fn internal_errors_are_flagged_for_pipeline_error_events() {
        assert!(PipelineError::Internal("oops".into()).is_internal());
        assert!(!PipelineError::EmptyOptedInRepos.is_internal());
    }
}
