//! Executor module - isolated execution of one untrusted program
//!
//! An executor runs user code against a single JSON input under a wall-clock
//! timeout and reports everything as an `ExecutionResult`:
//! - `SubprocessExecutor`: runs a generated harness in a child interpreter
//!
//! The executor module does NOT:
//! - Compare outputs or determine verdicts
//! - Know about problems, test cases or submissions

pub mod harness;
pub mod subprocess;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use harness::HarnessFailure;
pub use subprocess::SubprocessExecutor;

/// Exit code reported when the process never ran to completion
pub const SENTINEL_EXIT_CODE: i32 = -1;

/// One execution request
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Full source text of the untrusted program
    pub code: String,
    /// Value handed to the entry point
    pub input: Value,
    /// Wall-clock timeout in milliseconds
    pub timeout_ms: u64,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, input: Value, timeout_ms: u64) -> Self {
        Self {
            code: code.into(),
            input,
            timeout_ms,
        }
    }
}

/// Outcome of one execution; all failure modes are encoded in the fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Captured stdout with the return-value payload stripped
    pub stdout: String,
    pub stderr: String,
    /// Value returned by the entry point, if the harness produced one
    pub return_value: Option<Value>,
    /// None if the process could not be started
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
    pub timed_out: bool,
    pub is_successful: bool,
    /// Failure of the executor itself (never of the user program)
    pub error: Option<String>,
    /// Structured failure reported by the harness
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<HarnessFailure>,
}

impl ExecutionResult {
    /// Result for a failure in the executor's own orchestration
    pub fn internal_error(error: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            return_value: None,
            exit_code: Some(SENTINEL_EXIT_CODE),
            execution_time_ms: 0,
            timed_out: false,
            is_successful: false,
            error: Some(error.into()),
            failure: None,
        }
    }

    /// Whether the executor itself failed
    pub fn is_internal_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Executor trait for running one program against one input
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run the request; never fails, errors are reported in the result
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult;
}
