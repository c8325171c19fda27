//! Case grader - one test case, one verdict

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::comparator::compare_outputs;
use crate::core::utils::{non_empty, truncate_chars, truncate_with_ellipsis};
use crate::core::VerdictStatus;
use crate::executor::{ExecutionRequest, ExecutionResult, Executor};
use crate::problem::{ProblemGradingConfig, TestCase};

/// Maximum stored stdout/stderr length per case, in characters
pub const MAX_CASE_OUTPUT_CHARS: usize = 500;

/// Verdict and diagnostics of one test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseResult {
    /// 1-based position in the problem's test-case list
    pub case_number: usize,
    pub status: VerdictStatus,
    pub execution_time_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
}

/// Timeout handed to the executor for a time limit in seconds
pub fn timeout_ms(time_limit_seconds: f64) -> u64 {
    ((time_limit_seconds * 1000.0).round() as u64).max(1)
}

/// Run `user_code` against one test case and classify the outcome
pub async fn grade_case(
    executor: &dyn Executor,
    user_code: &str,
    case_number: usize,
    test_case: &TestCase,
    problem: &ProblemGradingConfig,
) -> CaseResult {
    let request = ExecutionRequest::new(
        user_code,
        test_case.input.clone(),
        timeout_ms(problem.time_limit_seconds),
    );
    let result = executor.execute(&request).await;
    let status = classify(&result, test_case, problem);

    if status == VerdictStatus::WrongAnswer {
        let actual = result.return_value.as_ref().unwrap_or(&Value::Null);
        debug!(
            "Case {} wrong answer: actual={}, expected={}",
            case_number, actual, test_case.expected_output
        );
    }
    info!(
        "Case {}: {} ({}ms)",
        case_number, status, result.execution_time_ms
    );

    let stderr = match status {
        VerdictStatus::InternalError => result.error.clone(),
        VerdictStatus::RuntimeError => Some(runtime_error_details(&result)),
        _ => non_empty(&result.stderr).map(str::to_string),
    };

    CaseResult {
        case_number,
        status,
        execution_time_seconds: result.execution_time_ms as f64 / 1000.0,
        stdout: non_empty(&result.stdout).map(|s| truncate_chars(s, MAX_CASE_OUTPUT_CHARS)),
        stderr: stderr.map(|s| truncate_with_ellipsis(&s, MAX_CASE_OUTPUT_CHARS)),
    }
}

fn classify(
    result: &ExecutionResult,
    test_case: &TestCase,
    problem: &ProblemGradingConfig,
) -> VerdictStatus {
    if result.is_internal_error() {
        return VerdictStatus::InternalError;
    }
    if result.timed_out {
        return VerdictStatus::TimeLimitExceeded;
    }
    if !result.is_successful {
        return VerdictStatus::RuntimeError;
    }

    // A program that returned nothing is judged as having returned null
    let actual = result.return_value.as_ref().unwrap_or(&Value::Null);
    if compare_outputs(
        actual,
        &test_case.expected_output,
        problem.judge_type,
        &problem.epsilon,
    ) {
        VerdictStatus::Accepted
    } else {
        VerdictStatus::WrongAnswer
    }
}

fn runtime_error_details(result: &ExecutionResult) -> String {
    match non_empty(&result.stderr) {
        Some(stderr) => stderr.to_string(),
        None => match result.exit_code {
            Some(code) => format!("Execution failed with exit code {}.", code),
            None => "Execution failed.".to_string(),
        },
    }
}
