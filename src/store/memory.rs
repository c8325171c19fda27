//! In-memory store

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{GradingStore, StoreError};
use crate::grader::SubmissionRecord;
use crate::problem::ProblemGradingConfig;

#[derive(Debug, Default)]
pub struct MemoryStore {
    problems: Mutex<HashMap<String, Value>>,
    submissions: Mutex<HashMap<Uuid, SubmissionRecord>>,
    /// Every write attempt, in order, including rejected ones
    writes: Mutex<Vec<Uuid>>,
    reject_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that fails every submission write
    pub fn rejecting_writes() -> Self {
        Self {
            reject_writes: true,
            ..Self::default()
        }
    }

    pub fn with_problem(self, problem_id: &str, doc: Value) -> Self {
        self.insert_problem(problem_id, doc);
        self
    }

    pub fn insert_problem(&self, problem_id: &str, doc: Value) {
        if let Ok(mut problems) = self.problems.lock() {
            problems.insert(problem_id.to_string(), doc);
        }
    }

    pub fn submission(&self, submission_id: &Uuid) -> Option<SubmissionRecord> {
        self.submissions
            .lock()
            .ok()
            .and_then(|s| s.get(submission_id).cloned())
    }

    pub fn write_count(&self) -> usize {
        self.writes.lock().map(|w| w.len()).unwrap_or(0)
    }
}

fn unavailable(reason: &'static str) -> StoreError {
    StoreError::Backend(redis::RedisError::from((redis::ErrorKind::IoError, reason)))
}

fn poisoned<T>(_: T) -> StoreError {
    unavailable("memory store lock poisoned")
}

#[async_trait]
impl GradingStore for MemoryStore {
    async fn get_problem(&self, problem_id: &str) -> Result<ProblemGradingConfig, StoreError> {
        let doc = {
            let problems = self.problems.lock().map_err(poisoned)?;
            problems
                .get(problem_id)
                .cloned()
                .ok_or_else(|| StoreError::NotFound(problem_id.to_string()))?
        };
        ProblemGradingConfig::from_document(problem_id, &doc).map_err(|source| {
            StoreError::Malformed {
                problem_id: problem_id.to_string(),
                source,
            }
        })
    }

    async fn put_submission(&self, record: &SubmissionRecord) -> Result<(), StoreError> {
        self.writes
            .lock()
            .map_err(poisoned)?
            .push(record.submission_id);
        if self.reject_writes {
            return Err(unavailable("writes are rejected"));
        }
        self.submissions
            .lock()
            .map_err(poisoned)?
            .insert(record.submission_id, record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_problem() {
        let store = MemoryStore::new().with_problem(
            "sq",
            json!({"finalTestCases": [{"input": 2, "expected_output": 4}]}),
        );
        let problem = tokio_test::assert_ok!(store.get_problem("sq").await);
        assert_eq!(problem.test_cases.len(), 1);

        assert!(matches!(
            store.get_problem("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_problem() {
        let store = MemoryStore::new().with_problem("bad", json!({"finalTestCases": 7}));
        let err = store.get_problem("bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
        assert!(err.is_user_facing());
    }
}
