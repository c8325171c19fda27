mod comparator;
mod config;
mod core;
mod executor;
mod grader;
mod jobs;
mod problem;
mod redis_manager;
mod store;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use crate::config::GraderConfig;
use crate::executor::{Executor, SubprocessExecutor};
use crate::jobs::{GradeResponse, RequestHandler};
use crate::redis_manager::RedisManager;
use crate::store::{GradingStore, RedisStore};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("grader=info".parse()?),
        )
        .init();

    let config = GraderConfig::from_env()?;
    info!("Starting Grader Worker...");
    info!(
        "Executor config: interpreter={:?}, work_dir={:?}, memory_limit={}MB, fail_fast={}",
        config.interpreter, config.work_dir, config.memory_limit_mb, config.fail_fast
    );

    let subprocess = SubprocessExecutor::from_config(&config);
    // Fail fast if submissions cannot run at all
    let version = subprocess.ensure_interpreter_available().await?;
    info!("Using interpreter: {}", version);
    let executor: Arc<dyn Executor> = Arc::new(subprocess);

    let client = redis::Client::open(config.redis_url.as_str())
        .context("Failed to create Redis client")?;
    let store: Arc<dyn GradingStore> = Arc::new(RedisStore::connect(&client).await?);
    let mut redis = RedisManager::with_client(client).await?;
    info!("Connected to Redis at {}", config.redis_url);

    let handler = Arc::new(RequestHandler::new(store, executor, &config));

    info!("Waiting for jobs...");

    loop {
        let job = redis.pop_job().await?;
        info!(
            "Received job: request_id={}, mode={:?}, problem_id={:?}",
            job.request_id, job.request.execution_mode, job.request.problem_id
        );

        // A panic in one job must not take the worker down
        let request = job.request;
        let task = tokio::spawn({
            let handler = Arc::clone(&handler);
            async move { handler.handle(request).await }
        });
        let response = match task.await {
            Ok(response) => response,
            Err(e) => {
                error!("Job {} aborted: {}", job.request_id, e);
                GradeResponse::internal("An internal error occurred during grading.")
            }
        };

        if let Err(e) = redis.push_response(&job.request_id, &response).await {
            error!("Failed to deliver response for {}: {}", job.request_id, e);
        }
        info!(
            "Job completed: request_id={}, status_code={}",
            job.request_id, response.status_code
        );
    }
}
