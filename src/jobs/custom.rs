//! Custom runs - user code against caller-supplied inputs, no verdicts

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::executor::{ExecutionRequest, ExecutionResult, Executor};
use crate::grader::case::timeout_ms;
use crate::store::GradingStore;

/// Raw execution outcome of one custom input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomCaseResult {
    /// "Custom Case N", 1-based
    pub case_identifier: String,
    pub input: Value,
    pub run_code_output: ExecutionResult,
}

/// Time limit of the problem if it can be loaded, the default otherwise
pub async fn resolve_time_limit(
    store: &dyn GradingStore,
    problem_id: Option<&str>,
    default_secs: f64,
) -> f64 {
    let Some(problem_id) = problem_id else {
        return default_secs;
    };
    match store.get_problem(problem_id).await {
        Ok(problem) => problem.time_limit_seconds,
        Err(e) => {
            warn!(
                "Could not fetch time limit for custom run (problem '{}'): {}",
                problem_id, e
            );
            default_secs
        }
    }
}

/// Run every input in order; one result per input
pub async fn run_custom_tests(
    executor: &dyn Executor,
    user_code: &str,
    inputs: Vec<Value>,
    time_limit_seconds: f64,
) -> Vec<CustomCaseResult> {
    let timeout = timeout_ms(time_limit_seconds);
    let mut results = Vec::with_capacity(inputs.len());

    for (idx, input) in inputs.into_iter().enumerate() {
        let case_identifier = format!("Custom Case {}", idx + 1);
        let output = executor
            .execute(&ExecutionRequest::new(user_code, input.clone(), timeout))
            .await;
        info!(
            "{}: exit_code={:?}, timed_out={}, {}ms",
            case_identifier, output.exit_code, output.timed_out, output.execution_time_ms
        );
        results.push(CustomCaseResult {
            case_identifier,
            input,
            run_code_output: output,
        });
    }
    results
}
