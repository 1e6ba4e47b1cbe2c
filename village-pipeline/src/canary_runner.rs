//! Canary test execution (spec §4.2).

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use regex::RegexSet;
use village_common::events::CanaryEvent;
use village_common::ids::{BuildId, ProviderId, SuiteId, TestId};
use village_common::model::{
    CanaryMetrics, CanaryTestCase, CanaryTestResult, CanaryTestSuite, TestCaseConfig, TestCaseResult, TestCaseStatus,
    TestCaseType, TestSuiteStatus,
};

use crate::event_bus::EventBus;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of one case execution attempt, before timeout/retry logic is
/// applied by the runner.
pub enum CaseOutcome {
    Passed(Option<String>),
    Failed(String),
    Error(String),
}

/// Executes a single test case against a candidate build. Agent CLI
/// session execution itself is out of scope (spec §1 Non-goals); this is
/// the seam a real harness plugs into.
pub trait CaseExecutor: Send + Sync {
    fn execute(&self, build_id: BuildId, case: CanaryTestCase) -> BoxFuture<'static, CaseOutcome>;
}

/// Test executor that always passes immediately; useful as a default for
/// wiring tests that don't exercise canary behavior directly.
pub struct AlwaysPassExecutor;

impl CaseExecutor for AlwaysPassExecutor {
    fn execute(&self, _build_id: BuildId, _case: CanaryTestCase) -> BoxFuture<'static, CaseOutcome> {
        Box::pin(async { CaseOutcome::Passed(None) })
    }
}

/// Regex patterns that classify an error message as transient/retriable
/// (spec §4.2 step 3).
fn transient_patterns() -> RegexSet {
    RegexSet::new([
        r"(?i)connection[\s_-]?reset",
        r"(?i)timed[\s_-]?out",
        r"(?i)econnreset",
        r"(?i)etimedout",
        r"(?i)connection refused",
    ])
    .expect("transient pattern set is a fixed, valid set of regexes")
}

struct SuiteLock {
    locks: Mutex<HashMap<SuiteId, Arc<tokio::sync::Mutex<()>>>>,
    running: Mutex<HashSet<SuiteId>>,
}

impl SuiteLock {
    fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()), running: Mutex::new(HashSet::new()) }
    }

    fn lock_for(&self, suite_id: &SuiteId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .expect("suite lock map poisoned")
            .entry(suite_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn mark_running(&self, suite_id: SuiteId) {
        self.running.lock().expect("running set poisoned").insert(suite_id);
    }

    fn mark_done(&self, suite_id: &SuiteId) {
        self.running.lock().expect("running set poisoned").remove(suite_id);
    }

    fn any_running(&self) -> bool {
        !self.running.lock().expect("running set poisoned").is_empty()
    }
}

/// Runs ordered test suites against a candidate build and summarizes
/// results. Single-flighted per suite: a second concurrent call for the
/// same `suite_id` waits for the first to finish rather than racing it.
pub struct CanaryRunner {
    executor: Arc<dyn CaseExecutor>,
    default_timeout_ms: u64,
    retry_count: u32,
    retry_patterns: RegexSet,
    suite_lock: SuiteLock,
    events: Arc<EventBus<CanaryEvent>>,
}

impl CanaryRunner {
    pub fn new(executor: Arc<dyn CaseExecutor>, default_timeout_ms: u64, retry_count: u32) -> Self {
        Self {
            executor,
            default_timeout_ms,
            retry_count,
            retry_patterns: transient_patterns(),
            suite_lock: SuiteLock::new(),
            events: Arc::new(EventBus::default()),
        }
    }

    pub fn events(&self) -> Arc<EventBus<CanaryEvent>> {
        self.events.clone()
    }

    pub fn is_running(&self) -> bool {
        self.suite_lock.any_running()
    }

    /// Run every suite in order. If `continue_on_failure` is false, stop
    /// dispatching further suites once one does not finish `Passed`.
    pub async fn run_all_suites(
        &self,
        build_id: BuildId,
        suites: &[CanaryTestSuite],
        continue_on_failure: bool,
    ) -> Vec<CanaryTestResult> {
        let mut results = Vec::with_capacity(suites.len());
        for suite in suites {
            let result = self.run_suite(build_id.clone(), suite).await;
            let passed = result.status == TestSuiteStatus::Passed;
            results.push(result);
            if !passed && !continue_on_failure {
                break;
            }
        }
        results
    }

    pub async fn run_suite(&self, build_id: BuildId, suite: &CanaryTestSuite) -> CanaryTestResult {
        let suite_mutex = self.suite_lock.lock_for(&suite.suite_id);
        let _guard = suite_mutex.lock().await;
        self.suite_lock.mark_running(suite.suite_id.clone());

        let started_at = Utc::now();
        self.events.emit(CanaryEvent::SuiteStarted { build_id: build_id.clone(), suite_id: suite.suite_id.clone() });

        let mut results: Vec<TestCaseResult> = Vec::with_capacity(suite.test_cases.len());
        let suite_timeout = Duration::from_millis(suite.timeout_ms);
        let timed_out = tokio::time::timeout(suite_timeout, self.run_cases(&build_id, suite, &mut results))
            .await
            .is_err();
        if timed_out {
            for case in suite.test_cases.iter().skip(results.len()) {
                results.push(abort_result(case, "Suite timeout"));
            }
        }

        let status = if timed_out {
            TestSuiteStatus::Timeout
        } else {
            TestSuiteStatus::from_case_statuses(results.iter().map(|r| &r.status))
        };
        let metrics = CanaryMetrics::compute(&results);
        let result = CanaryTestResult {
            build_id,
            suite_id: suite.suite_id.clone(),
            status,
            started_at,
            completed_at: Utc::now(),
            test_results: results,
            metrics,
        };

        self.suite_lock.mark_done(&suite.suite_id);
        self.events.emit(CanaryEvent::SuiteCompleted { result: result.clone() });
        result
    }

    async fn run_cases(&self, build_id: &BuildId, suite: &CanaryTestSuite, results: &mut Vec<TestCaseResult>) {
        for (idx, case) in suite.test_cases.iter().enumerate() {
            let result = self.run_case_with_retry(build_id, case).await;
            let non_passed = result.status != TestCaseStatus::Passed;
            results.push(result);
            if non_passed && !suite.continue_on_failure {
                for remaining in suite.test_cases.iter().skip(idx + 1) {
                    results.push(abort_result(remaining, "Aborted"));
                }
                break;
            }
        }
    }

    async fn run_case_with_retry(&self, build_id: &BuildId, case: &CanaryTestCase) -> TestCaseResult {
        let mut attempt: u32 = 1;
        loop {
            self.events.emit(CanaryEvent::TestStarted { build_id: build_id.clone(), test_id: case.test_id.clone() });
            let timeout = Duration::from_millis(case.timeout_ms(self.default_timeout_ms));
            let start = Instant::now();
            let outcome = tokio::time::timeout(timeout, self.executor.execute(build_id.clone(), case.clone())).await;
            let duration_ms = start.elapsed().as_millis() as u64;

            let result = match outcome {
                Err(_) => TestCaseResult {
                    test_id: case.test_id.clone(),
                    status: TestCaseStatus::Timeout,
                    duration_ms,
                    error_message: Some("test case timed out".to_string()),
                    output: None,
                },
                Ok(CaseOutcome::Passed(output)) => TestCaseResult {
                    test_id: case.test_id.clone(),
                    status: TestCaseStatus::Passed,
                    duration_ms,
                    error_message: None,
                    output,
                },
                Ok(CaseOutcome::Failed(message)) => TestCaseResult {
                    test_id: case.test_id.clone(),
                    status: TestCaseStatus::Failed,
                    duration_ms,
                    error_message: Some(message),
                    output: None,
                },
                Ok(CaseOutcome::Error(message)) => TestCaseResult {
                    test_id: case.test_id.clone(),
                    status: TestCaseStatus::Error,
                    duration_ms,
                    error_message: Some(message),
                    output: None,
                },
            };

            self.events.emit(CanaryEvent::TestCompleted {
                build_id: build_id.clone(),
                test_id: case.test_id.clone(),
                status: result.status,
            });

            if result.status == TestCaseStatus::Passed {
                return result;
            }

            let retriable = result.status == TestCaseStatus::Timeout
                || result.error_message.as_deref().is_some_and(|m| self.retry_patterns.is_match(m));

            if retriable && attempt <= self.retry_count {
                self.events.emit(CanaryEvent::TestRetried {
                    build_id: build_id.clone(),
                    test_id: case.test_id.clone(),
                    attempt,
                });
                attempt += 1;
                continue;
            }
            return result;
        }
    }
}

fn abort_result(case: &CanaryTestCase, message: &str) -> TestCaseResult {
    TestCaseResult {
        test_id: case.test_id.clone(),
        status: TestCaseStatus::Error,
        duration_ms: 0,
        error_message: Some(message.to_string()),
        output: None,
    }
}

/// The built-in suites run against every candidate build by default (spec
/// §4.2): one suite per test-case type, each covering the three default
/// providers.
pub fn default_suites(default_timeout_ms: u64) -> Vec<CanaryTestSuite> {
    let providers: Vec<ProviderId> = vec!["codex", "claude_code", "gemini_cli"].into_iter().map(ProviderId::from).collect();

    [
        ("adapter_contract", TestCaseType::AdapterContract),
        ("golden_path", TestCaseType::GoldenPath),
        ("approval_gate", TestCaseType::ApprovalGate),
        ("metering", TestCaseType::Metering),
    ]
    .into_iter()
    .map(|(name, case_type)| {
        let cases: Vec<CanaryTestCase> = providers
            .iter()
            .map(|provider| {
                CanaryTestCase::new(format!("{name} / {provider}"), case_type, vec![provider.clone()])
                    .with_config(TestCaseConfig::default())
            })
            .collect();
        CanaryTestSuite::new(name, default_timeout_ms).with_cases(cases)
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedExecutor {
        outcomes: Mutex<HashMap<TestId, std::collections::VecDeque<CaseOutcome>>>,
        calls: AtomicU32,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            Self { outcomes: Mutex::new(HashMap::new()), calls: AtomicU32::new(0) }
        }

        fn script(&self, test_id: TestId, outcomes: Vec<CaseOutcome>) {
            self.outcomes.lock().unwrap().insert(test_id, outcomes.into());
        }
    }

    impl CaseExecutor for ScriptedExecutor {
        fn execute(&self, _build_id: BuildId, case: CanaryTestCase) -> BoxFuture<'static, CaseOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .get_mut(&case.test_id)
                .and_then(|q| q.pop_front())
                .unwrap_or(CaseOutcome::Passed(None));
            Box::pin(async move { outcome })
        }
    }

    fn case(providers: Vec<ProviderId>) -> CanaryTestCase {
        CanaryTestCase::new("case", TestCaseType::GoldenPath, providers)
    }

    #[tokio::test]
    async fn all_passing_suite_reports_passed_with_full_metrics() {
        let executor = Arc::new(AlwaysPassExecutor);
        let runner = CanaryRunner::new(executor, 5_000, 1);
        let suite = CanaryTestSuite::new("golden_path", 5_000).with_cases(vec![case(vec![]), case(vec![])]);

        let result = runner.run_suite(BuildId::new(), &suite).await;
        assert_eq!(result.status, TestSuiteStatus::Passed);
        assert_eq!(result.metrics.total_tests, 2);
        assert_eq!(result.metrics.passed, 2);
        assert_eq!(result.metrics.pass_rate, 1.0);
    }

    #[tokio::test]
    async fn retriable_failure_retries_and_eventually_passes() {
        let executor = Arc::new(ScriptedExecutor::new());
        let failing_case = case(vec![]);
        executor.script(failing_case.test_id.clone(), vec![CaseOutcome::Error("connection reset by peer".into())]);
        let runner = CanaryRunner::new(executor.clone(), 5_000, 1);
        let suite = CanaryTestSuite::new("flaky", 5_000).with_cases(vec![failing_case]);

        let result = runner.run_suite(BuildId::new(), &suite).await;
        assert_eq!(result.status, TestSuiteStatus::Passed);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2, "expected one retry after the transient failure");
    }

    #[tokio::test]
    async fn non_retriable_failure_exhausts_without_retry() {
        let executor = Arc::new(ScriptedExecutor::new());
        let failing_case = case(vec![]);
        executor.script(failing_case.test_id.clone(), vec![CaseOutcome::Failed("assertion mismatch".into())]);
        let runner = CanaryRunner::new(executor.clone(), 5_000, 3);
        let suite = CanaryTestSuite::new("assert_fail", 5_000).with_cases(vec![failing_case]);

        let result = runner.run_suite(BuildId::new(), &suite).await;
        assert_eq!(result.status, TestSuiteStatus::Failed);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1, "non-retriable failure should not retry");
    }

    #[tokio::test]
    async fn continue_on_failure_false_aborts_remaining_cases() {
        let executor = Arc::new(ScriptedExecutor::new());
        let first = case(vec![]);
        let second = case(vec![]);
        let third = case(vec![]);
        executor.script(first.test_id.clone(), vec![CaseOutcome::Failed("boom".into())]);
        let runner = CanaryRunner::new(executor, 5_000, 0);
        let suite = CanaryTestSuite::new("abort_suite", 5_000)
            .with_cases(vec![first, second, third])
            .continue_on_failure(false);

        let result = runner.run_suite(BuildId::new(), &suite).await;
        assert_eq!(result.test_results.len(), 3);
        assert_eq!(result.test_results[0].status, TestCaseStatus::Failed);
        assert_eq!(result.test_results[1].status, TestCaseStatus::Error);
        assert_eq!(result.test_results[1].error_message.as_deref(), Some("Aborted"));
        assert_eq!(result.test_results[2].error_message.as_deref(), Some("Aborted"));
    }

    #[tokio::test]
    async fn suite_timeout_marks_untouched_cases_with_suite_timeout_message() {
        struct SlowExecutor;
        impl CaseExecutor for SlowExecutor {
            fn execute(&self, _build_id: BuildId, _case: CanaryTestCase) -> BoxFuture<'static, CaseOutcome> {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    CaseOutcome::Passed(None)
                })
            }
        }
        let runner = CanaryRunner::new(Arc::new(SlowExecutor), 5_000, 0);
        let suite = CanaryTestSuite::new("slow", 20).with_cases(vec![case(vec![]), case(vec![])]);

        let result = runner.run_suite(BuildId::new(), &suite).await;
        assert_eq!(result.status, TestSuiteStatus::Timeout);
        assert!(result.test_results.iter().any(|r| r.error_message.as_deref() == Some("Suite timeout")));
    }

    #[tokio::test]
    async fn run_all_suites_stops_after_first_non_passing_when_continue_on_failure_is_false() {
        let executor = Arc::new(ScriptedExecutor::new());
        let bad_case = case(vec![]);
        executor.script(bad_case.test_id.clone(), vec![CaseOutcome::Failed("x".into())]);
        let runner = CanaryRunner::new(executor, 5_000, 0);

        let suite_a = CanaryTestSuite::new("a", 5_000).with_cases(vec![bad_case]);
        let suite_b = CanaryTestSuite::new("b", 5_000).with_cases(vec![case(vec![])]);

        let results = runner.run_all_suites(BuildId::new(), &[suite_a, suite_b], false).await;
        assert_eq!(results.len(), 1, "second suite should not have run");
    }

    #[tokio::test]
    async fn default_suites_cover_four_types_across_three_providers() {
        let suites = default_suites(60_000);
        assert_eq!(suites.len(), 4);
        for suite in &suites {
            assert_eq!(suite.test_cases.len(), 3);
        }
    }
}
