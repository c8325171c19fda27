//! Jobs module - grading requests and their responses
//!
//! A request is either a full submission (`GRADE_SUBMISSION`) or a dry run of
//! user code against caller-supplied inputs (`RUN_CUSTOM_TESTS`). Every
//! request yields exactly one `GradeResponse`; invalid input is a 400.
//!
//! The jobs module does NOT:
//! - Talk to the queue (see `redis_manager`)
//! - Decide verdicts (see `grader`)

pub mod custom;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::GraderConfig;
use crate::executor::Executor;
use crate::grader::{GradingOptions, Submission, SubmissionGrader, SubmissionRecord};
use crate::store::GradingStore;

use self::custom::CustomCaseResult;

pub const DEFAULT_LANGUAGE: &str = "python3.12";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    #[default]
    GradeSubmission,
    RunCustomTests,
    #[serde(other)]
    Unknown,
}

/// Grading request as submitted by the caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRequest {
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub problem_id: Option<String>,
    #[serde(default)]
    pub user_code: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Inputs for a custom run; must be a list
    #[serde(default)]
    pub custom_test_cases: Option<Value>,
    /// Reused as the submission id when present
    #[serde(default)]
    pub submission_id: Option<String>,
}

/// Job popped from the grading queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingJob {
    /// Correlates the response with the caller
    pub request_id: String,
    #[serde(flatten)]
    pub request: GradeRequest,
}

/// Response to one grading request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResponse {
    pub status_code: u16,
    pub body: Value,
}

impl GradeResponse {
    fn ok(body: Value) -> Self {
        Self {
            status_code: 200,
            body,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status_code: 400,
            body: json!({ "error": message.into() }),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status_code: 500,
            body: json!({ "error": message.into() }),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GradeSubmissionBody<'a> {
    #[serde(flatten)]
    record: &'a SubmissionRecord,
    execution_mode: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CustomRunBody {
    execution_mode: &'static str,
    results: Vec<CustomCaseResult>,
}

/// Validated request, ready to run
enum Plan {
    Grade(Submission),
    Custom {
        problem_id: Option<String>,
        user_code: String,
        inputs: Vec<Value>,
    },
}

fn invalid(reason: &str) -> String {
    format!("Invalid input: {}", reason)
}

fn plan(request: GradeRequest) -> Result<Plan, String> {
    let user_code = match request.user_code {
        Some(code) if !code.is_empty() => code,
        _ => return Err(invalid("Missing userCode")),
    };
    let problem_id = request.problem_id.filter(|id| !id.is_empty());

    match request.execution_mode {
        ExecutionMode::GradeSubmission => {
            let problem_id =
                problem_id.ok_or_else(|| invalid("Missing problemId for GRADE_SUBMISSION"))?;
            let submission_id = match request.submission_id.as_deref() {
                None | Some("") => Uuid::new_v4(),
                Some(raw) => Uuid::parse_str(raw)
                    .map_err(|_| invalid(&format!("submissionId is not a UUID: {}", raw)))?,
            };
            Ok(Plan::Grade(Submission {
                submission_id,
                problem_id,
                language: request
                    .language
                    .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
                user_code,
            }))
        }
        ExecutionMode::RunCustomTests => {
            let inputs = match request.custom_test_cases {
                None => return Err(invalid("Missing customTestCases for RUN_CUSTOM_TESTS")),
                Some(Value::Array(inputs)) => inputs,
                Some(_) => return Err("customTestCases must be a list.".to_string()),
            };
            Ok(Plan::Custom {
                problem_id,
                user_code,
                inputs,
            })
        }
        ExecutionMode::Unknown => Err("Unknown executionMode".to_string()),
    }
}

/// Entry point for grading requests
pub struct RequestHandler {
    grader: SubmissionGrader,
    store: Arc<dyn GradingStore>,
    executor: Arc<dyn Executor>,
    default_time_limit_secs: f64,
}

impl RequestHandler {
    pub fn new(
        store: Arc<dyn GradingStore>,
        executor: Arc<dyn Executor>,
        config: &GraderConfig,
    ) -> Self {
        Self {
            grader: SubmissionGrader::new(
                store.clone(),
                executor.clone(),
                GradingOptions::from_config(config),
            ),
            store,
            executor,
            default_time_limit_secs: config.default_time_limit_secs,
        }
    }

    pub async fn handle(&self, request: GradeRequest) -> GradeResponse {
        let plan = match plan(request) {
            Ok(plan) => plan,
            Err(message) => {
                warn!("Rejected request: {}", message);
                return GradeResponse::bad_request(message);
            }
        };

        let body = match plan {
            Plan::Grade(submission) => {
                let record = self.grader.grade(&submission).await;
                serde_json::to_value(GradeSubmissionBody {
                    record: &record,
                    execution_mode: "GRADE_SUBMISSION_RESULTS",
                })
            }
            Plan::Custom {
                problem_id,
                user_code,
                inputs,
            } => {
                info!("Running {} custom cases", inputs.len());
                let time_limit = custom::resolve_time_limit(
                    self.store.as_ref(),
                    problem_id.as_deref(),
                    self.default_time_limit_secs,
                )
                .await;
                let results =
                    custom::run_custom_tests(self.executor.as_ref(), &user_code, inputs, time_limit)
                        .await;
                serde_json::to_value(CustomRunBody {
                    execution_mode: "RUN_CUSTOM_TESTS_RESULTS",
                    results,
                })
            }
        };

        match body {
            Ok(body) => GradeResponse::ok(body),
            Err(e) => {
                error!("Failed to encode response: {}", e);
                GradeResponse::internal(format!("Failed to encode response: {}", e))
            }
        }
    }
}
