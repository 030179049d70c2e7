/// Worker pool
///
/// `concurrency` identical loops, each with its own Redis connection so a
/// blocking pop never stalls the others:
///
/// 1. promote retries whose delay has passed
/// 2. BLPOP across the priority lists (5 s timeout)
/// 3. run one attempt through the orchestrator
/// 4. apply the queue policy: history, or back into the retry set
///
/// Shutdown is checked between jobs; a job in flight always finishes.
use chrono::Utc;
use evalforge_common::policy::{next_disposition, AttemptOutcome, Disposition};
use evalforge_common::redis;
use evalforge_common::types::{JobProgress, QueuedJob};
use evalforge_common::Config;
use ::redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::executor::{AttemptReport, EvaluationOrchestrator};

const POP_TIMEOUT_SECS: f64 = 5.0;
const REDIS_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    pub max_attempts: u8,
    pub backoff_base_ms: u64,
    pub completed_history: usize,
    pub failed_history: usize,
    pub status_ttl_secs: u64,
}

impl From<&Config> for QueueSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base_ms: config.backoff_base_ms,
            completed_history: config.completed_history,
            failed_history: config.failed_history,
            status_ttl_secs: config.status_ttl_secs,
        }
    }
}

/// What the queue needs to know about an attempt
pub fn classify(report: &AttemptReport) -> AttemptOutcome {
    match &report.failure {
        None => AttemptOutcome::Finished,
        Some(e) if e.is_retryable() => AttemptOutcome::Transient(e.to_string()),
        Some(e) => AttemptOutcome::Fatal(e.to_string()),
    }
}

fn retry_message(delay: Duration, attempt: u8, max_attempts: u8) -> String {
    format!(
        "Retry scheduled in {}s (attempt {} of {} failed)",
        delay.as_secs(),
        attempt,
        max_attempts
    )
}

pub async fn run_pool(
    client: ::redis::Client,
    orchestrator: Arc<EvaluationOrchestrator>,
    settings: QueueSettings,
    concurrency: usize,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut workers = JoinSet::new();

    for worker_id in 0..concurrency {
        let conn = ConnectionManager::new(client.clone()).await?;
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown.clone();
        workers.spawn(async move {
            worker_loop(worker_id, conn, orchestrator, settings, shutdown).await;
        });
    }
    tracing::info!(concurrency, "Worker pool started");

    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }
    Ok(())
}

async fn worker_loop(
    worker_id: usize,
    mut conn: ConnectionManager,
    orchestrator: Arc<EvaluationOrchestrator>,
    settings: QueueSettings,
    shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        match redis::promote_due_retries(&mut conn, Utc::now().timestamp_millis()).await {
            Ok(0) => {}
            Ok(promoted) => tracing::info!(worker_id, promoted, "Re-queued due retries"),
            Err(e) => tracing::warn!(worker_id, error = %e, "Failed to promote retries"),
        }

        match redis::pop_job(&mut conn, POP_TIMEOUT_SECS).await {
            Ok(Some(job)) => process(worker_id, &mut conn, &orchestrator, settings, job).await,
            // Timeout, go round and look at the shutdown flag
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(worker_id, error = %e, "Redis error");
                tokio::time::sleep(REDIS_BACKOFF).await;
            }
        }
    }
    tracing::info!(worker_id, "Worker stopped");
}

async fn process(
    worker_id: usize,
    conn: &mut ConnectionManager,
    orchestrator: &EvaluationOrchestrator,
    settings: QueueSettings,
    mut job: QueuedJob,
) {
    let submission_id = job.job.submission_id.clone();
    job.metadata.attempts = job.metadata.attempts.saturating_add(1);
    let attempt = job.metadata.attempts;

    tracing::info!(
        worker_id,
        submission_id = %submission_id,
        priority = %job.priority,
        attempt,
        max_attempts = job.metadata.max_attempts,
        "Received job"
    );

    if let Err(e) = redis::mark_active(conn, &submission_id).await {
        tracing::warn!(submission_id = %submission_id, error = %e, "Failed to mark job active");
    }

    let report = orchestrator.evaluate(&job.job, attempt).await;
    tracing::info!(
        worker_id,
        submission_id = %submission_id,
        status = %report.result.status,
        score = report.result.score,
        duration_ms = report.result.metrics.duration_ms,
        "Attempt finished"
    );

    let outcome = classify(&report);
    let max_attempts = job.metadata.max_attempts.max(1);
    let disposition = next_disposition(&outcome, attempt, max_attempts, settings.backoff_base_ms);

    let applied = match disposition {
        Disposition::Completed => {
            redis::record_history(
                conn,
                redis::COMPLETED_HISTORY_KEY,
                &submission_id,
                settings.completed_history,
            )
            .await
        }
        Disposition::Retry { delay } => {
            if let AttemptOutcome::Transient(reason) = outcome {
                job.metadata.last_failure_reason = Some(reason);
            }
            let due_ms = Utc::now().timestamp_millis() + delay.as_millis() as i64;
            tracing::info!(
                submission_id = %submission_id,
                delay_ms = delay.as_millis() as u64,
                "Scheduling retry"
            );
            let scheduled = redis::schedule_retry(conn, &job, due_ms).await;
            if scheduled.is_ok() {
                let message = retry_message(delay, attempt, max_attempts);
                let waiting = JobProgress::queued(&submission_id, message);
                if let Err(e) =
                    redis::write_progress(conn, &waiting, settings.status_ttl_secs).await
                {
                    tracing::warn!(submission_id = %submission_id, error = %e, "Failed to write retry status");
                }
            }
            scheduled
        }
        Disposition::Failed { reason } => {
            tracing::warn!(submission_id = %submission_id, reason = %reason, "Job failed");
            redis::record_history(
                conn,
                redis::FAILED_HISTORY_KEY,
                &submission_id,
                settings.failed_history,
            )
            .await
        }
    };
    if let Err(e) = applied {
        tracing::error!(submission_id = %submission_id, error = %e, "Failed to apply queue policy");
    }

    if let Err(e) = redis::clear_active(conn, &submission_id).await {
        tracing::warn!(submission_id = %submission_id, error = %e, "Failed to clear active job");
    }
}
