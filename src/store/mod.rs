//! Store module - persistence seam of the grader
//!
//! Problems are read from and submission records written to a store:
//! - `RedisStore`: problem documents and submission records kept in Redis
//! - `MemoryStore`: in-process store used by tests
//!
//! The store module does NOT:
//! - Decide verdicts (see `grader`)
//! - Retry failed writes; the caller decides what a failure means

#[cfg(test)]
pub mod memory;
pub mod redis;

use async_trait::async_trait;
use thiserror::Error;

use crate::grader::SubmissionRecord;
use crate::problem::{ProblemFormatError, ProblemGradingConfig};

#[cfg(test)]
pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Problem '{0}' not found.")]
    NotFound(String),
    #[error("Problem '{problem_id}' has a malformed configuration: {source}")]
    Malformed {
        problem_id: String,
        #[source]
        source: ProblemFormatError,
    },
    #[error("invalid JSON in store: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store backend error: {0}")]
    Backend(#[from] ::redis::RedisError),
}

impl StoreError {
    /// Whether the message is safe to show to the submitter
    pub fn is_user_facing(&self) -> bool {
        matches!(self, StoreError::NotFound(_) | StoreError::Malformed { .. })
    }
}

/// Storage for problems and submission records
#[async_trait]
pub trait GradingStore: Send + Sync {
    /// Fetch and parse the grading configuration of a problem
    async fn get_problem(&self, problem_id: &str) -> Result<ProblemGradingConfig, StoreError>;

    /// Write one submission record; called once per submission
    async fn put_submission(&self, record: &SubmissionRecord) -> Result<(), StoreError>;
}
