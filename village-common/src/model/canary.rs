//! Canary test suites, cases, and the results/metrics produced by running
//! them (spec §4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BuildId, ProviderId, SuiteId, TestId};

/// The kind of behavior a test case exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCaseType {
    AdapterContract,
    GoldenPath,
    ApprovalGate,
    Metering,
}

/// Inputs a test case needs to run; all optional since different case
/// types use different subsets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestCaseConfig {
    pub repo_url: Option<String>,
    pub prompt: Option<String>,
    pub expected_outcome: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// One test case within a suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryTestCase {
    pub test_id: TestId,
    pub description: String,
    pub providers: Vec<ProviderId>,
    pub case_type: TestCaseType,
    pub config: TestCaseConfig,
}

impl CanaryTestCase {
    pub fn new(description: impl Into<String>, case_type: TestCaseType, providers: Vec<ProviderId>) -> Self {
        Self {
            test_id: TestId::new(),
            description: description.into(),
            providers,
            case_type,
            config: TestCaseConfig::default(),
        }
    }

    pub fn with_config(mut self, config: TestCaseConfig) -> Self {
        self.config = config;
        self
    }

    /// Effective per-case timeout: the case's own override, or `default_ms`.
    pub fn timeout_ms(&self, default_ms: u64) -> u64 {
        self.config.timeout_ms.unwrap_or(default_ms)
    }
}

/// An ordered collection of test cases run together as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryTestSuite {
    pub suite_id: SuiteId,
    pub name: String,
    pub test_cases: Vec<CanaryTestCase>,
    pub timeout_ms: u64,
    /// If false, a non-passed case aborts the remainder of the suite
    /// (spec §4.2 step 4).
    pub continue_on_failure: bool,
}

impl CanaryTestSuite {
    pub fn new(name: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            suite_id: SuiteId::new(),
            name: name.into(),
            test_cases: Vec::new(),
            timeout_ms,
            continue_on_failure: true,
        }
    }

    pub fn with_cases(mut self, cases: Vec<CanaryTestCase>) -> Self {
        self.test_cases = cases;
        self
    }

    pub fn continue_on_failure(mut self, value: bool) -> Self {
        self.continue_on_failure = value;
        self
    }
}

/// Outcome of a single test case run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestCaseStatus {
    Passed,
    Failed,
    Error,
    Skipped,
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub test_id: TestId,
    pub status: TestCaseStatus,
    pub duration_ms: u64,
    pub error_message: Option<String>,
    pub output: Option<String>,
}

/// Overall status of a completed suite run (spec §4.2 step 6: timeout >
/// error > failed > passed, in that precedence order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestSuiteStatus {
    Passed,
    Failed,
    Error,
    Timeout,
}

impl TestSuiteStatus {
    /// Fold per-case statuses into the overall suite status per the
    /// precedence rule in spec §4.2 step 6.
    pub fn from_case_statuses<'a>(statuses: impl IntoIterator<Item = &'a TestCaseStatus>) -> Self {
        let mut any_timeout = false;
        let mut any_error = false;
        let mut any_failed = false;
        for status in statuses {
            match status {
                TestCaseStatus::Timeout => any_timeout = true,
                TestCaseStatus::Error => any_error = true,
                TestCaseStatus::Failed => any_failed = true,
                TestCaseStatus::Passed | TestCaseStatus::Skipped => {}
            }
        }
        if any_timeout {
            TestSuiteStatus::Timeout
        } else if any_error {
            TestSuiteStatus::Error
        } else if any_failed {
            TestSuiteStatus::Failed
        } else {
            TestSuiteStatus::Passed
        }
    }
}

/// Aggregate pass/fail counters for a suite run. Invariant enforced by
/// [`CanaryMetrics::compute`]: `passed + failed + errored + skipped ==
/// total_tests`, and `pass_rate == 0.0` whenever `total_tests == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanaryMetrics {
    pub total_tests: u32,
    pub passed: u32,
    pub failed: u32,
    pub errored: u32,
    pub skipped: u32,
    pub pass_rate: f64,
    pub avg_session_start_ms: f64,
    pub avg_time_to_first_output_ms: f64,
    pub disconnect_rate: f64,
}

impl CanaryMetrics {
    /// Compute metrics from the per-case results of a single suite run.
    /// Timed-out cases fold into `failed` per spec §4.2 step 5.
    pub fn compute(results: &[TestCaseResult]) -> Self {
        let total_tests = results.len() as u32;
        let mut passed = 0u32;
        let mut failed = 0u32;
        let mut errored = 0u32;
        let mut skipped = 0u32;
        let mut duration_sum = 0u64;

        for r in results {
            duration_sum += r.duration_ms;
            match r.status {
                TestCaseStatus::Passed => passed += 1,
                TestCaseStatus::Failed | TestCaseStatus::Timeout => failed += 1,
                TestCaseStatus::Error => errored += 1,
                TestCaseStatus::Skipped => skipped += 1,
            }
        }

        let pass_rate = if total_tests > 0 {
            passed as f64 / total_tests as f64
        } else {
            0.0
        };
        let avg_duration = if total_tests > 0 {
            duration_sum as f64 / total_tests as f64
        } else {
            0.0
        };

        Self {
            total_tests,
            passed,
            failed,
            errored,
            skipped,
            pass_rate,
            // Placeholder latency signals derived from per-case durations;
            // a real collaborator would source these from session telemetry.
            avg_session_start_ms: avg_duration,
            avg_time_to_first_output_ms: avg_duration,
            disconnect_rate: if total_tests > 0 {
                errored as f64 / total_tests as f64
            } else {
                0.0
            },
        }
    }
}

/// The full result of running one suite against one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryTestResult {
    pub build_id: BuildId,
    pub suite_id: SuiteId,
    pub status: TestSuiteStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub test_results: Vec<TestCaseResult>,
    pub metrics: CanaryMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: TestCaseStatus) -> TestCaseResult {
        TestCaseResult {
            test_id: TestId::new(),
            status,
            duration_ms: 10,
            error_message: None,
            output: None,
        }
    }

    #[test]
    fn metrics_compute_zero_tests_has_zero_pass_rate() {
        let metrics = CanaryMetrics::compute(&[]);
        assert_eq!(metrics.total_tests, 0);
        assert_eq!(metrics.pass_rate, 0.0);
    }

    #[test]
    fn metrics_compute_counters_sum_to_total() {
        let results = vec![
            result(TestCaseStatus::Passed),
            result(TestCaseStatus::Failed),
            result(TestCaseStatus::Error),
            result(TestCaseStatus::Skipped),
            result(TestCaseStatus::Timeout),
        ];
        let metrics = CanaryMetrics::compute(&results);
        assert_eq!(metrics.total_tests, 5);
        assert_eq!(metrics.passed + metrics.failed + metrics.errored + metrics.skipped, 5);
        // Timeout folds into failed.
        assert_eq!(metrics.failed, 2);
        assert_eq!(metrics.pass_rate, 1.0 / 5.0);
    }

    #[test]
    fn suite_status_precedence_timeout_beats_error_beats_failed() {
        let statuses = vec![TestCaseStatus::Failed, TestCaseStatus::Error, TestCaseStatus::Timeout];
        assert_eq!(TestSuiteStatus::from_case_statuses(&statuses), TestSuiteStatus::Timeout);

        let statuses = vec![TestCaseStatus::Failed, TestCaseStatus::Error];
        assert_eq!(TestSuiteStatus::from_case_statuses(&statuses), TestSuiteStatus::Error);

        let statuses = vec![TestCaseStatus::Failed, TestCaseStatus::Passed];
        assert_eq!(TestSuiteStatus::from_case_statuses(&statuses), TestSuiteStatus::Failed);

        let statuses = vec![TestCaseStatus::Passed, TestCaseStatus::Skipped];
        assert_eq!(TestSuiteStatus::from_case_statuses(&statuses), TestSuiteStatus::Passed);
    }
}
