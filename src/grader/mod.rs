//! Grader module - turns one submission into one persisted verdict
//!
//! Grading a submission goes through these phases:
//! `Init -> FetchingProblem -> (NoTestCases | Grading -> Aggregated) -> Persisted | Failed`
//!
//! Exactly one submission record is written per graded submission, whatever
//! happened along the way.
//!
//! The grader module does NOT:
//! - Run code itself (see `executor`)
//! - Parse requests or shape responses (see `jobs`)

pub mod case;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::GraderConfig;
use crate::core::utils::{truncate_chars, truncate_with_ellipsis};
use crate::core::verdict::aggregate;
use crate::core::VerdictStatus;
use crate::executor::Executor;
use crate::store::{GradingStore, StoreError};

pub use case::CaseResult;

/// Characters of case stderr quoted in the submission error message
const ERROR_DETAIL_CHARS: usize = 100;

const GENERIC_FAILURE_MESSAGE: &str = "An internal error occurred during grading.";

/// A submission to grade
#[derive(Debug, Clone)]
pub struct Submission {
    pub submission_id: Uuid,
    pub problem_id: String,
    pub language: String,
    pub user_code: String,
}

/// Persisted outcome of grading one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub submission_id: Uuid,
    pub problem_id: String,
    pub language: String,
    pub status: VerdictStatus,
    pub max_execution_time_seconds: f64,
    pub results: Vec<CaseResult>,
    pub created_at: DateTime<Utc>,
    /// User code, capped for storage
    pub user_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SubmissionRecord {
    /// Pessimistic starting record, so that any early exit is an internal error
    fn new(submission: &Submission, max_user_code_chars: usize) -> Self {
        Self {
            submission_id: submission.submission_id,
            problem_id: submission.problem_id.clone(),
            language: submission.language.clone(),
            status: VerdictStatus::InternalError,
            max_execution_time_seconds: 0.0,
            results: Vec::new(),
            created_at: Utc::now(),
            user_code: truncate_chars(&submission.user_code, max_user_code_chars),
            error_message: None,
        }
    }

    fn append_error(&mut self, note: &str) {
        self.error_message = Some(match self.error_message.take() {
            Some(message) => format!("{} {}", message, note),
            None => note.to_string(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct GradingOptions {
    /// Stop at the first non-accepted case instead of running all of them
    pub fail_fast: bool,
    pub max_user_code_chars: usize,
}

impl Default for GradingOptions {
    fn default() -> Self {
        Self {
            fail_fast: false,
            max_user_code_chars: 10_000,
        }
    }
}

impl GradingOptions {
    pub fn from_config(config: &GraderConfig) -> Self {
        Self {
            fail_fast: config.fail_fast,
            max_user_code_chars: config.max_user_code_chars,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    FetchingProblem,
    NoTestCases,
    Grading,
    Aggregated,
    Persisted,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "INIT",
            Phase::FetchingProblem => "FETCHING_PROBLEM",
            Phase::NoTestCases => "NO_TEST_CASES",
            Phase::Grading => "GRADING",
            Phase::Aggregated => "AGGREGATED",
            Phase::Persisted => "PERSISTED",
            Phase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Tracks the phase of one grading run for logging
struct Progress {
    submission_id: Uuid,
    phase: Phase,
}

impl Progress {
    fn new(submission_id: Uuid) -> Self {
        Self {
            submission_id,
            phase: Phase::Init,
        }
    }

    fn enter(&mut self, next: Phase) {
        debug!(
            "Submission {}: {} -> {}",
            self.submission_id, self.phase, next
        );
        self.phase = next;
    }
}

/// Why a submission could not be graded
#[derive(Debug, Error)]
enum GradingFailure {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("grading task failed: {0}")]
    Aborted(#[from] tokio::task::JoinError),
}

impl GradingFailure {
    /// Message stored on the record; only store errors meant for the
    /// submitter keep their text
    fn user_message(&self) -> String {
        match self {
            GradingFailure::Store(e) if e.is_user_facing() => e.to_string(),
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// Grades whole submissions against the problems in a store
#[derive(Clone)]
pub struct SubmissionGrader {
    store: Arc<dyn GradingStore>,
    executor: Arc<dyn Executor>,
    options: GradingOptions,
}

impl SubmissionGrader {
    pub fn new(
        store: Arc<dyn GradingStore>,
        executor: Arc<dyn Executor>,
        options: GradingOptions,
    ) -> Self {
        Self {
            store,
            executor,
            options,
        }
    }

    /// Grade a submission and persist the record.
    ///
    /// Never fails: problems that prevent grading become an `INTERNAL_ERROR`
    /// record, and a failed write is noted in the returned record's
    /// `error_message`.
    pub async fn grade(&self, submission: &Submission) -> SubmissionRecord {
        info!(
            "Grading submission {} for problem '{}'",
            submission.submission_id, submission.problem_id
        );
        let initial = SubmissionRecord::new(submission, self.options.max_user_code_chars);

        // A panic while grading must still leave exactly one record behind
        let grader = self.clone();
        let owned = submission.clone();
        let mut working = initial.clone();
        let task = tokio::spawn(async move {
            let mut progress = Progress::new(owned.submission_id);
            let graded = grader.grade_into(&owned, &mut working, &mut progress).await;
            (working, progress, graded)
        });
        let (mut record, mut progress, graded) = match task.await {
            Ok((record, progress, graded)) => {
                (record, progress, graded.map_err(GradingFailure::from))
            }
            Err(e) => (
                initial,
                Progress::new(submission.submission_id),
                Err(GradingFailure::from(e)),
            ),
        };

        if let Err(e) = graded {
            progress.enter(Phase::Failed);
            error!(
                "Grading failed for submission {}: {}",
                submission.submission_id, e
            );
            record.status = VerdictStatus::InternalError;
            record.error_message = Some(e.user_message());
            // The grading failure is what gets reported, not the write error
            if let Err(write_err) = self.store.put_submission(&record).await {
                error!(
                    "Failed to save failed submission {}: {}",
                    submission.submission_id, write_err
                );
            }
            return record;
        }

        match self.store.put_submission(&record).await {
            Ok(()) => {
                progress.enter(Phase::Persisted);
                info!(
                    "Submission {} graded: {} ({} cases, max {:.3}s)",
                    submission.submission_id,
                    record.status,
                    record.results.len(),
                    record.max_execution_time_seconds
                );
            }
            Err(e) => {
                error!(
                    "Failed to save submission {}: {}",
                    submission.submission_id, e
                );
                record.append_error(&format!("(Failed to save submission result: {})", e));
            }
        }
        record
    }

    async fn grade_into(
        &self,
        submission: &Submission,
        record: &mut SubmissionRecord,
        progress: &mut Progress,
    ) -> Result<(), StoreError> {
        progress.enter(Phase::FetchingProblem);
        let problem = self.store.get_problem(&submission.problem_id).await?;

        if problem.test_cases.is_empty() {
            progress.enter(Phase::NoTestCases);
            warn!("Problem '{}' has no test cases", submission.problem_id);
            record.status = VerdictStatus::NoTestCases;
            return Ok(());
        }

        progress.enter(Phase::Grading);
        info!(
            "Running {} cases (limit {}s, judge {:?})",
            problem.test_cases.len(),
            problem.time_limit_seconds,
            problem.judge_type
        );

        for (idx, test_case) in problem.test_cases.iter().enumerate() {
            let result = case::grade_case(
                self.executor.as_ref(),
                &submission.user_code,
                idx + 1,
                test_case,
                &problem,
            )
            .await;

            record.max_execution_time_seconds = record
                .max_execution_time_seconds
                .max(result.execution_time_seconds);
            if result.status != VerdictStatus::Accepted && record.error_message.is_none() {
                record.error_message = Some(case_failure_message(&result));
            }

            let stop = self.options.fail_fast && result.status != VerdictStatus::Accepted;
            record.results.push(result);
            if stop {
                info!("Stopping at case {} (fail fast)", idx + 1);
                break;
            }
        }

        record.status = aggregate(record.results.iter().map(|r| r.status));
        progress.enter(Phase::Aggregated);
        Ok(())
    }
}

/// Message for the first non-accepted case
fn case_failure_message(result: &CaseResult) -> String {
    let details = result.stderr.as_deref().unwrap_or("");
    if result.status == VerdictStatus::InternalError {
        return format!(
            "Error executing test case {}: {}",
            result.case_number,
            truncate_with_ellipsis(details, ERROR_DETAIL_CHARS)
        );
    }
    let mut message = format!(
        "Failed at test case {}: {}",
        result.case_number, result.status
    );
    if !details.is_empty() {
        message.push_str(". Details: ");
        message.push_str(&truncate_chars(details, ERROR_DETAIL_CHARS));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutionRequest, ExecutionResult, SubprocessExecutor};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Executor replaying scripted results in order
    #[derive(Default)]
    struct Scripted {
        results: Mutex<VecDeque<ExecutionResult>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(results: Vec<ExecutionResult>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Executor for Scripted {
        async fn execute(&self, _request: &ExecutionRequest) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected executor call")
        }
    }

    fn returned(value: Value, time_ms: u64) -> ExecutionResult {
        ExecutionResult {
            stdout: String::new(),
            stderr: String::new(),
            return_value: Some(value),
            exit_code: Some(0),
            execution_time_ms: time_ms,
            timed_out: false,
            is_successful: true,
            error: None,
            failure: None,
        }
    }

    fn timed_out(timeout_ms: u64) -> ExecutionResult {
        ExecutionResult {
            stdout: String::new(),
            stderr: "Execution timed out.".into(),
            return_value: None,
            exit_code: Some(-1),
            execution_time_ms: timeout_ms,
            timed_out: true,
            is_successful: false,
            error: None,
            failure: None,
        }
    }

    fn crashed(stderr: &str) -> ExecutionResult {
        ExecutionResult {
            stdout: String::new(),
            stderr: stderr.into(),
            return_value: None,
            exit_code: Some(1),
            execution_time_ms: 5,
            timed_out: false,
            is_successful: false,
            error: None,
            failure: None,
        }
    }

    fn four_case_problem() -> Value {
        json!({
            "finalTestCases": [
                {"input": 1, "expected_output": 1},
                {"input": 2, "expected_output": 4},
                {"input": 3, "expected_output": 9},
                {"input": 4, "expected_output": 16}
            ],
            "timeLimitSeconds": 1
        })
    }

    fn submission(problem_id: &str, code: &str) -> Submission {
        Submission {
            submission_id: Uuid::new_v4(),
            problem_id: problem_id.into(),
            language: "python3.12".into(),
            user_code: code.into(),
        }
    }

    fn grader(
        store: Arc<MemoryStore>,
        executor: Arc<dyn Executor>,
        options: GradingOptions,
    ) -> SubmissionGrader {
        SubmissionGrader::new(store, executor, options)
    }

    #[tokio::test]
    async fn test_aggregates_most_severe_verdict() {
        let store = Arc::new(MemoryStore::new().with_problem("sq", four_case_problem()));
        let executor = Arc::new(Scripted::new(vec![
            returned(json!(1), 10),
            returned(json!(5), 20),
            timed_out(1000),
            returned(json!(16), 30),
        ]));
        let grader = grader(store.clone(), executor.clone(), GradingOptions::default());

        let sub = submission("sq", "def solution(n): ...");
        let record = grader.grade(&sub).await;

        let statuses: Vec<_> = record.results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                VerdictStatus::Accepted,
                VerdictStatus::WrongAnswer,
                VerdictStatus::TimeLimitExceeded,
                VerdictStatus::Accepted,
            ]
        );
        assert_eq!(record.status, VerdictStatus::TimeLimitExceeded);
        assert_eq!(record.max_execution_time_seconds, 1.0);
        assert_eq!(
            record.error_message.as_deref(),
            Some("Failed at test case 2: WRONG_ANSWER")
        );
        assert_eq!(executor.calls(), 4);

        assert_eq!(store.write_count(), 1);
        assert_eq!(store.submission(&sub.submission_id), Some(record));
    }

    #[tokio::test]
    async fn test_no_test_cases_skips_executor() {
        let store = Arc::new(MemoryStore::new().with_problem("empty", json!({"finalTestCases": []})));
        let executor = Arc::new(Scripted::default());
        let grader = grader(store.clone(), executor.clone(), GradingOptions::default());

        let record = grader.grade(&submission("empty", "pass")).await;
        assert_eq!(record.status, VerdictStatus::NoTestCases);
        assert!(record.results.is_empty());
        assert_eq!(executor.calls(), 0);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_test_case_field_means_no_cases() {
        let store = Arc::new(MemoryStore::new().with_problem("bare", json!({"title": "x"})));
        let executor = Arc::new(Scripted::default());
        let grader = grader(store, executor.clone(), GradingOptions::default());

        let record = grader.grade(&submission("bare", "pass")).await;
        assert_eq!(record.status, VerdictStatus::NoTestCases);
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_fail_fast_stops_at_first_failure() {
        let store = Arc::new(MemoryStore::new().with_problem("sq", four_case_problem()));
        let executor = Arc::new(Scripted::new(vec![
            returned(json!(1), 10),
            crashed("Traceback ...\nValueError: bad"),
        ]));
        let options = GradingOptions {
            fail_fast: true,
            ..GradingOptions::default()
        };
        let grader = grader(store, executor.clone(), options);

        let record = grader.grade(&submission("sq", "code")).await;
        assert_eq!(record.status, VerdictStatus::RuntimeError);
        assert_eq!(record.results.len(), 2);
        assert_eq!(executor.calls(), 2);
        let message = record.error_message.unwrap();
        assert!(message.starts_with("Failed at test case 2: RUNTIME_ERROR. Details: Traceback"));
    }

    #[tokio::test]
    async fn test_unknown_problem_is_internal_error() {
        let store = Arc::new(MemoryStore::new());
        let executor = Arc::new(Scripted::default());
        let grader = grader(store.clone(), executor.clone(), GradingOptions::default());

        let sub = submission("nope", "code");
        let record = grader.grade(&sub).await;
        assert_eq!(record.status, VerdictStatus::InternalError);
        assert_eq!(record.error_message.as_deref(), Some("Problem 'nope' not found."));
        assert!(record.results.is_empty());
        assert_eq!(executor.calls(), 0);
        assert_eq!(store.write_count(), 1);
        assert!(store.submission(&sub.submission_id).is_some());
    }

    #[tokio::test]
    async fn test_malformed_problem_is_internal_error() {
        let store = Arc::new(MemoryStore::new().with_problem("bad", json!({"finalTestCases": "{oops"})));
        let grader = grader(store, Arc::new(Scripted::default()), GradingOptions::default());

        let record = grader.grade(&submission("bad", "code")).await;
        assert_eq!(record.status, VerdictStatus::InternalError);
        assert!(record
            .error_message
            .unwrap()
            .starts_with("Problem 'bad' has a malformed configuration"));
    }

    #[tokio::test]
    async fn test_write_failure_keeps_verdict() {
        let store = MemoryStore::rejecting_writes();
        store.insert_problem("one", json!({"finalTestCases": [{"input": 2, "expectedOutput": 4}]}));
        let store = Arc::new(store);
        let executor = Arc::new(Scripted::new(vec![returned(json!(4), 10)]));
        let grader = grader(store.clone(), executor, GradingOptions::default());

        let record = grader.grade(&submission("one", "code")).await;
        assert_eq!(record.status, VerdictStatus::Accepted);
        assert!(record
            .error_message
            .unwrap()
            .contains("Failed to save submission result"));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_internal_case_error_message() {
        let store = Arc::new(MemoryStore::new().with_problem("sq", four_case_problem()));
        let executor = Arc::new(Scripted::new(vec![
            ExecutionResult::internal_error("Executor internal error: spawn failed", ""),
            returned(json!(4), 1),
            returned(json!(9), 1),
            returned(json!(16), 1),
        ]));
        let grader = grader(store, executor, GradingOptions::default());

        let record = grader.grade(&submission("sq", "code")).await;
        assert_eq!(record.status, VerdictStatus::InternalError);
        assert_eq!(
            record.error_message.as_deref(),
            Some("Error executing test case 1: Executor internal error: spawn failed")
        );
    }

    /// Executor that panics on every call
    struct Exploding;

    #[async_trait]
    impl Executor for Exploding {
        async fn execute(&self, _request: &ExecutionRequest) -> ExecutionResult {
            panic!("executor exploded")
        }
    }

    #[tokio::test]
    async fn test_panic_while_grading_is_internal_error() {
        let store = Arc::new(MemoryStore::new().with_problem("sq", four_case_problem()));
        let grader = grader(store.clone(), Arc::new(Exploding), GradingOptions::default());

        let sub = submission("sq", "code");
        let record = grader.grade(&sub).await;
        assert_eq!(record.status, VerdictStatus::InternalError);
        assert_eq!(record.error_message.as_deref(), Some(GENERIC_FAILURE_MESSAGE));
        assert!(record.results.is_empty());
        assert_eq!(store.write_count(), 1);
        assert_eq!(
            store.submission(&sub.submission_id).map(|r| r.status),
            Some(VerdictStatus::InternalError)
        );
    }

    #[tokio::test]
    async fn test_unordered_answer_with_mixed_kinds() {
        let expected: Vec<Value> = (0..200)
            .map(|i| match i % 4 {
                0 => Value::Null,
                1 => json!({"k": i}),
                2 => json!(i),
                _ => json!([i, null]),
            })
            .collect();
        let answer: Vec<Value> = expected.iter().rev().cloned().collect();
        let store = Arc::new(MemoryStore::new().with_problem(
            "mixed",
            json!({
                "finalTestCases": [{"input": 0, "expected_output": expected}],
                "judgeType": "unordered_equal"
            }),
        ));
        let executor = Arc::new(Scripted::new(vec![returned(Value::Array(answer), 10)]));
        let grader = grader(store.clone(), executor, GradingOptions::default());

        let record = grader.grade(&submission("mixed", "code")).await;
        assert_eq!(record.status, VerdictStatus::Accepted);
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_user_code_is_capped_in_record() {
        let store = Arc::new(MemoryStore::new().with_problem("empty", json!({"finalTestCases": []})));
        let grader = grader(
            store,
            Arc::new(Scripted::default()),
            GradingOptions {
                max_user_code_chars: 8,
                ..GradingOptions::default()
            },
        );
        let record = grader.grade(&submission("empty", "0123456789")).await;
        assert_eq!(record.user_code, "01234567");
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = SubmissionRecord::new(&submission("p", "code"), 100);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["status"], "INTERNAL_ERROR");
        assert_eq!(value["problemId"], "p");
        assert!(value.get("maxExecutionTimeSeconds").is_some());
        assert!(value.get("createdAt").is_some());
        assert!(value.get("errorMessage").is_none());
    }

    fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn grade_with_python(problem: Value, code: &str) -> Option<SubmissionRecord> {
        if !python_available() {
            eprintln!("python3 not available, skipping");
            return None;
        }
        let store = Arc::new(MemoryStore::new().with_problem("e2e", problem));
        let grader = grader(
            store,
            Arc::new(SubprocessExecutor::new("python3")),
            GradingOptions::default(),
        );
        Some(grader.grade(&submission("e2e", code)).await)
    }

    #[tokio::test]
    async fn test_end_to_end_accepted() {
        let problem = json!({
            "finalTestCases": [{"input": 3, "expected_output": 9}],
            "judgeType": "equal"
        });
        let Some(record) = grade_with_python(problem, "def solution(n):\n    return n * n\n").await
        else {
            return;
        };
        assert_eq!(record.status, VerdictStatus::Accepted);
        assert_eq!(record.results[0].status, VerdictStatus::Accepted);
        assert_eq!(record.error_message, None);
    }

    #[tokio::test]
    async fn test_end_to_end_runtime_error() {
        let problem = json!({"finalTestCases": [{"input": 3, "expected_output": 9}]});
        let Some(record) = grade_with_python(problem, "def solution(n):\n    return 1 / 0\n").await
        else {
            return;
        };
        assert_eq!(record.results[0].status, VerdictStatus::RuntimeError);
        assert!(record.results[0]
            .stderr
            .as_deref()
            .unwrap_or("")
            .contains("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn test_end_to_end_time_limit() {
        let problem = json!({
            "finalTestCases": [{"input": 3, "expected_output": 9}],
            "timeLimitSeconds": 1
        });
        let code = "def solution(n):\n    while True:\n        pass\n";
        let Some(record) = grade_with_python(problem, code).await else {
            return;
        };
        assert_eq!(record.results[0].status, VerdictStatus::TimeLimitExceeded);
        assert!((record.results[0].execution_time_seconds - 1.0).abs() < 0.01);
        assert_eq!(record.status, VerdictStatus::TimeLimitExceeded);
    }
}
