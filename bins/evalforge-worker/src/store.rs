/// Redis-backed collaborators of the orchestrator
use async_trait::async_trait;
use chrono::Utc;
use evalforge_common::redis;
use evalforge_common::types::{EvaluationResult, JobProgress};
use ::redis::aio::ConnectionManager;

use crate::error::EvalError;
use crate::executor::{ProgressReporter, Stage, SubmissionStore};

/// Submissions and results in the shared Redis
#[derive(Clone)]
pub struct RedisSubmissionStore {
    conn: ConnectionManager,
}

impl RedisSubmissionStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SubmissionStore for RedisSubmissionStore {
    async fn submission_exists(&self, submission_id: &str) -> Result<bool, EvalError> {
        let mut conn = self.conn.clone();
        let record = redis::load_submission(&mut conn, submission_id)
            .await
            .map_err(|e| EvalError::transient("Failed to load submission", e))?;
        Ok(record.is_some())
    }

    async fn persist(&self, result: &EvaluationResult) -> Result<(), EvalError> {
        let mut conn = self.conn.clone();
        redis::store_result(&mut conn, result)
            .await
            .map_err(|e| EvalError::transient("Failed to store result", e))?;

        let record = redis::load_submission(&mut conn, &result.submission_id)
            .await
            .map_err(|e| EvalError::transient("Failed to load submission", e))?;
        if let Some(mut record) = record.filter(|_| result.status.is_terminal()) {
            record.status = result.status;
            redis::save_submission(&mut conn, &record)
                .await
                .map_err(|e| EvalError::transient("Failed to update submission status", e))?;
        }
        Ok(())
    }
}

/// Stage updates under `evalforge:status:{id}`, expiring after `ttl_secs`
#[derive(Clone)]
pub struct RedisProgressReporter {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisProgressReporter {
    pub fn new(conn: ConnectionManager, ttl_secs: u64) -> Self {
        Self { conn, ttl_secs }
    }
}

#[async_trait]
impl ProgressReporter for RedisProgressReporter {
    async fn report(&self, submission_id: &str, stage: Stage, message: &str) {
        let progress = JobProgress {
            submission_id: submission_id.to_string(),
            stage: Some(stage.name().to_string()),
            progress: stage.progress(),
            logs: message.to_string(),
            updated_at: Utc::now(),
        };

        let mut conn = self.conn.clone();
        if let Err(e) = redis::write_progress(&mut conn, &progress, self.ttl_secs).await {
            tracing::warn!(submission_id, stage = %stage, error = %e, "Failed to write progress");
        }
    }
}
