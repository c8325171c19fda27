//! Redis-backed store
//!
//! Problem documents are JSON strings under `grader:problem:{problemId}`.
//! Submission records are written under `grader:submission:{submissionId}`
//! and published on `grader:submissions` for live subscribers.

use anyhow::Context;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value;
use tracing::{debug, info};

use super::{GradingStore, StoreError};
use crate::grader::SubmissionRecord;
use crate::problem::ProblemGradingConfig;

/// Redis key constants
pub mod keys {
    /// Problem document key prefix
    pub const PROBLEM_PREFIX: &str = "grader:problem:";

    /// Submission record key prefix
    pub const SUBMISSION_PREFIX: &str = "grader:submission:";

    /// Submission record channel (for pub/sub)
    pub const SUBMISSION_CHANNEL: &str = "grader:submissions";
}

pub fn problem_key(problem_id: &str) -> String {
    format!("{}{}", keys::PROBLEM_PREFIX, problem_id)
}

pub fn submission_key(submission_id: &uuid::Uuid) -> String {
    format!("{}{}", keys::SUBMISSION_PREFIX, submission_id)
}

/// Store over a self-reconnecting Redis connection
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(client: &redis::Client) -> anyhow::Result<Self> {
        let conn = ConnectionManager::new(client.clone())
            .await
            .context("Failed to open Redis store connection")?;
        info!("Redis store ready");
        Ok(Self { conn })
    }
}

#[async_trait]
impl GradingStore for RedisStore {
    async fn get_problem(&self, problem_id: &str) -> Result<ProblemGradingConfig, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(problem_key(problem_id)).await?;
        let raw = raw.ok_or_else(|| StoreError::NotFound(problem_id.to_string()))?;

        let doc: Value = serde_json::from_str(&raw)?;
        ProblemGradingConfig::from_document(problem_id, &doc).map_err(|source| {
            StoreError::Malformed {
                problem_id: problem_id.to_string(),
                source,
            }
        })
    }

    async fn put_submission(&self, record: &SubmissionRecord) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let json = serde_json::to_string(record)?;
        conn.set::<_, _, ()>(submission_key(&record.submission_id), &json)
            .await?;

        // Ignore errors as there may be no subscribers
        if let Err(e) = conn
            .publish::<_, _, ()>(keys::SUBMISSION_CHANNEL, &json)
            .await
        {
            debug!("Failed to publish submission {}: {}", record.submission_id, e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys() {
        assert_eq!(problem_key("two-sum"), "grader:problem:two-sum");
        let id = uuid::Uuid::nil();
        assert_eq!(
            submission_key(&id),
            "grader:submission:00000000-0000-0000-0000-000000000000"
        );
    }
}
