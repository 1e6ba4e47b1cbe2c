//! Domain entities shared by every pipeline component.
//!
//! Each submodule owns one or two closely related entities from spec §3; the
//! split mirrors how `rch-common::types` groups worker/job/history types by
//! the subsystem that owns their lifecycle.

pub mod build;
pub mod canary;
pub mod channel;
pub mod house;
pub mod registry;
pub mod rollout;
pub mod sweep;
pub mod version;

pub use build::{BuildMetadata, RunnerBuild};
pub use canary::{
    CanaryMetrics, CanaryTestCase, CanaryTestResult, CanaryTestSuite, TestCaseConfig,
    TestCaseResult, TestCaseStatus, TestCaseType, TestSuiteStatus,
};
pub use channel::{ChannelConfig, ReleaseChannel};
pub use house::{HouseActivity, Indicator, IndicatorKind};
pub use registry::{CompatStatus, CompatibilityResult, EntryStatus, KnownGoodEntry, Recommendation};
pub use rollout::{
    Actor, ActorType, ActiveRollout, EnterprisePolicy, NotificationPrefs, OrgAssignment, OrgRuntimeConfig,
    RolloutEvent, RolloutState,
};
pub use sweep::{SweepConfig, SweepJob, SweepJobState, SweepRepoTarget, SweepResult, SweepStatus, SweepType};
pub use version::{AdapterVersion, RuntimeVersion};
