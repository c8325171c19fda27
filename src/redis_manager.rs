//! Redis Manager - grading queue connection and operations
//!
//! This module handles the worker side of the queue:
//! - Job queue operations (BLPOP)
//! - Response delivery (RPUSH for the waiting caller, publish for subscribers)

use std::time::Duration;

use anyhow::Result;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::jobs::{GradeResponse, GradingJob};

/// Redis key constants
pub mod keys {
    /// Grading job queue key
    pub const GRADER_QUEUE: &str = "grader:queue";

    /// Response list key prefix (the caller BLPOPs it)
    pub const RESPONSE_PREFIX: &str = "grader:response:";

    /// Response channel (for pub/sub)
    pub const RESPONSE_CHANNEL: &str = "grader:responses";
}

/// Responses the caller never picked up expire after 5 minutes
const RESPONSE_EXPIRY_SECS: i64 = 300;

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

pub fn response_key(request_id: &str) -> String {
    format!("{}{}", keys::RESPONSE_PREFIX, request_id)
}

/// Queue-side Redis connection of a worker
pub struct RedisManager {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisManager {
    pub async fn with_client(client: redis::Client) -> Result<Self> {
        let conn = get_connection_with_retry(&client).await?;
        info!("Connected to Redis queue");
        Ok(Self { client, conn })
    }

    /// Block and wait for the next job from the queue.
    ///
    /// Malformed payloads are logged and skipped. Automatically reconnects on
    /// connection failure.
    pub async fn pop_job(&mut self) -> Result<GradingJob> {
        loop {
            let result: Option<(String, String)> =
                match self.conn.blpop(keys::GRADER_QUEUE, 0.0).await {
                    Ok(res) => res,
                    Err(e) => {
                        warn!("Redis BLPOP failed: {}. Reconnecting...", e);
                        self.reconnect().await?;
                        continue;
                    }
                };

            if let Some((_, job_data)) = result {
                match serde_json::from_str::<GradingJob>(&job_data) {
                    Ok(job) => return Ok(job),
                    Err(e) => {
                        warn!("Failed to parse job data: {}. Data: {}", e, job_data);
                        continue;
                    }
                }
            }
        }
    }

    /// Deliver the response for a request.
    ///
    /// The response is pushed to the request's list so that a caller blocked
    /// on BLPOP picks it up, and also published for real-time subscribers.
    pub async fn push_response(&mut self, request_id: &str, response: &GradeResponse) -> Result<()> {
        let key = response_key(request_id);
        let json = serde_json::to_string(response)?;

        if let Err(e) = self.conn.rpush::<_, _, ()>(&key, &json).await {
            warn!("Failed to push response: {}. Reconnecting...", e);
            self.reconnect().await?;
            self.conn.rpush::<_, _, ()>(&key, &json).await?;
        }

        // Set expiry so the key doesn't linger if the caller went away
        if let Err(e) = self
            .conn
            .expire::<_, ()>(&key, RESPONSE_EXPIRY_SECS)
            .await
        {
            warn!("Failed to set expiry on {}: {}", key, e);
        }

        if let Err(e) = self
            .conn
            .publish::<_, _, ()>(keys::RESPONSE_CHANNEL, &json)
            .await
        {
            debug!("Failed to publish response for {}: {}", request_id, e);
        }

        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.conn = get_connection_with_retry(&self.client).await?;
        Ok(())
    }
}

/// Get a Redis connection with retry logic
async fn get_connection_with_retry(client: &redis::Client) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in {} seconds...",
                    e,
                    RECONNECT_DELAY.as_secs()
                );
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
