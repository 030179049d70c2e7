use crate::types::{
    CompletionEvent, EvaluationResult, JobProgress, JobStatusView, Priority, QueueHealth,
    QueuedJob, SubmissionRecord,
};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, ErrorKind, RedisError, RedisResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Redis queue semantics
/// Keeps API and worker agreeing on key names. One list per priority,
/// a sorted set for delayed retries, a set of in-flight submissions and
/// two trimmed history lists.

pub const QUEUE_PREFIX: &str = "evalforge:queue";
pub const RETRY_KEY: &str = "evalforge:retry";
pub const ACTIVE_KEY: &str = "evalforge:active";
pub const STATUS_PREFIX: &str = "evalforge:status";
pub const RESULT_PREFIX: &str = "evalforge:result";
pub const SUBMISSION_PREFIX: &str = "evalforge:submission";
pub const COMPLETED_HISTORY_KEY: &str = "evalforge:history:completed";
pub const FAILED_HISTORY_KEY: &str = "evalforge:history:failed";
pub const COMPLETIONS_CHANNEL: &str = "evalforge:metrics:completions";

/// Generate deterministic queue name for a priority
pub fn queue_name(priority: &Priority) -> String {
    format!("{}:{}", QUEUE_PREFIX, priority)
}

/// Queue names in dequeue order
pub fn queue_names() -> Vec<String> {
    Priority::all_variants().iter().map(queue_name).collect()
}

pub fn status_key(submission_id: &str) -> String {
    format!("{}:{}", STATUS_PREFIX, submission_id)
}

pub fn result_key(submission_id: &str) -> String {
    format!("{}:{}", RESULT_PREFIX, submission_id)
}

pub fn submission_key(submission_id: &str) -> String {
    format!("{}:{}", SUBMISSION_PREFIX, submission_id)
}

fn encode<T: Serialize>(value: &T) -> RedisResult<String> {
    serde_json::to_string(value).map_err(|e| {
        RedisError::from((ErrorKind::TypeError, "serialization failed", e.to_string()))
    })
}

fn decode<T: DeserializeOwned>(raw: &str) -> RedisResult<T> {
    serde_json::from_str(raw).map_err(|e| {
        RedisError::from((ErrorKind::TypeError, "deserialization failed", e.to_string()))
    })
}

/// Append a job to the tail of its priority list
pub async fn push_job(conn: &mut ConnectionManager, job: &QueuedJob) -> RedisResult<()> {
    let payload = encode(job)?;
    conn.rpush::<_, _, ()>(queue_name(&job.priority), payload).await
}

/// Blocking pop across all priority lists
///
/// BLPOP checks keys in argument order, so a waiting Critical job is always
/// taken before any High job and so on down. Returns `None` on timeout and
/// when the popped entry is not a job; such entries are already off the list.
pub async fn pop_job(
    conn: &mut ConnectionManager,
    timeout_secs: f64,
) -> RedisResult<Option<QueuedJob>> {
    let popped: Option<(String, String)> = redis::cmd("BLPOP")
        .arg(queue_names())
        .arg(timeout_secs)
        .query_async(conn)
        .await?;

    match popped {
        Some((queue, payload)) => Ok(decode_popped(&queue, &payload)),
        None => Ok(None),
    }
}

fn decode_popped(queue: &str, payload: &str) -> Option<QueuedJob> {
    match decode::<QueuedJob>(payload) {
        Ok(job) => Some(job),
        Err(e) => {
            tracing::warn!(queue, error = %e, payload_len = payload.len(), "Dropping malformed job");
            None
        }
    }
}

/// Park a job in the retry set until `due_ms` (unix millis)
pub async fn schedule_retry(
    conn: &mut ConnectionManager,
    job: &QueuedJob,
    due_ms: i64,
) -> RedisResult<()> {
    let payload = encode(job)?;
    conn.zadd::<_, _, _, ()>(RETRY_KEY, payload, due_ms).await
}

/// Move every due retry back onto its priority list
///
/// ZREM acts as the claim: when several workers race on the same member
/// only the one that removed it re-queues it.
pub async fn promote_due_retries(conn: &mut ConnectionManager, now_ms: i64) -> RedisResult<usize> {
    let due: Vec<String> = conn.zrangebyscore(RETRY_KEY, "-inf", now_ms).await?;
    let mut promoted = 0;

    for payload in due {
        let removed: i64 = conn.zrem(RETRY_KEY, &payload).await?;
        if removed == 0 {
            continue;
        }
        match decode::<QueuedJob>(&payload) {
            Ok(job) => {
                conn.rpush::<_, _, ()>(queue_name(&job.priority), &payload)
                    .await?;
                promoted += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable retry entry");
            }
        }
    }

    Ok(promoted)
}

pub async fn mark_active(conn: &mut ConnectionManager, submission_id: &str) -> RedisResult<()> {
    conn.sadd::<_, _, ()>(ACTIVE_KEY, submission_id).await
}

pub async fn clear_active(conn: &mut ConnectionManager, submission_id: &str) -> RedisResult<()> {
    conn.srem::<_, _, ()>(ACTIVE_KEY, submission_id).await
}

/// Push a submission id onto a history list and trim it to `keep` entries
pub async fn record_history(
    conn: &mut ConnectionManager,
    key: &str,
    submission_id: &str,
    keep: usize,
) -> RedisResult<()> {
    if keep == 0 {
        return Ok(());
    }
    redis::pipe()
        .atomic()
        .lpush(key, submission_id)
        .ignore()
        .ltrim(key, 0, keep as isize - 1)
        .ignore()
        .query_async(conn)
        .await
}

pub async fn write_progress(
    conn: &mut ConnectionManager,
    progress: &JobProgress,
    ttl_secs: u64,
) -> RedisResult<()> {
    let payload = encode(progress)?;
    redis::cmd("SET")
        .arg(status_key(&progress.submission_id))
        .arg(payload)
        .arg("EX")
        .arg(ttl_secs.max(1))
        .query_async(conn)
        .await
}

pub async fn read_status(
    conn: &mut ConnectionManager,
    submission_id: &str,
) -> RedisResult<JobStatusView> {
    let raw: Option<String> = conn.get(status_key(submission_id)).await?;
    match raw {
        Some(raw) => Ok(decode::<JobProgress>(&raw)?.into()),
        None => Ok(JobStatusView::not_found()),
    }
}

pub async fn queue_health(conn: &mut ConnectionManager) -> RedisResult<QueueHealth> {
    let mut waiting = 0u64;
    for queue in queue_names() {
        let len: u64 = conn.llen(queue).await?;
        waiting += len;
    }
    let delayed: u64 = conn.zcard(RETRY_KEY).await?;

    Ok(QueueHealth {
        waiting: waiting + delayed,
        active: conn.scard(ACTIVE_KEY).await?,
        completed: conn.llen(COMPLETED_HISTORY_KEY).await?,
        failed: conn.llen(FAILED_HISTORY_KEY).await?,
    })
}

/// Overwrite the stored result for a submission and announce it
pub async fn store_result(
    conn: &mut ConnectionManager,
    result: &EvaluationResult,
) -> RedisResult<()> {
    let payload = encode(result)?;
    conn.set::<_, _, ()>(result_key(&result.submission_id), payload)
        .await?;

    let event = CompletionEvent {
        submission_id: result.submission_id.clone(),
        status: result.status,
        score: result.score,
        duration_ms: result.metrics.duration_ms,
    };
    conn.publish::<_, _, ()>(COMPLETIONS_CHANNEL, encode(&event)?)
        .await
}

pub async fn load_result(
    conn: &mut ConnectionManager,
    submission_id: &str,
) -> RedisResult<Option<EvaluationResult>> {
    let raw: Option<String> = conn.get(result_key(submission_id)).await?;
    raw.map(|r| decode(&r)).transpose()
}

pub async fn save_submission(
    conn: &mut ConnectionManager,
    record: &SubmissionRecord,
) -> RedisResult<()> {
    let payload = encode(record)?;
    conn.set::<_, _, ()>(submission_key(&record.submission_id), payload)
        .await
}

pub async fn load_submission(
    conn: &mut ConnectionManager,
    submission_id: &str,
) -> RedisResult<Option<SubmissionRecord>> {
    let raw: Option<String> = conn.get(submission_key(submission_id)).await?;
    raw.map(|r| decode(&r)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EvaluationJob;

    #[test]
    fn test_queue_naming() {
        assert_eq!(queue_name(&Priority::Critical), "evalforge:queue:critical");
        assert_eq!(queue_name(&Priority::Low), "evalforge:queue:low");
    }

    #[test]
    fn test_queue_names_follow_priority_order() {
        assert_eq!(
            queue_names(),
            vec![
                "evalforge:queue:critical",
                "evalforge:queue:high",
                "evalforge:queue:medium",
                "evalforge:queue:low",
            ]
        );
    }

    #[test]
    fn test_malformed_popped_job_is_dropped() {
        assert!(decode_popped("evalforge:queue:low", "{not json").is_none());
        assert!(decode_popped("evalforge:queue:low", r#"{"id":"x"}"#).is_none());

        let job = QueuedJob::new(
            EvaluationJob {
                submission_id: "sub-7".to_string(),
                challenge_id: "ch-1".to_string(),
                repo_url: "https://github.com/acme/app".to_string(),
                pitch_deck_url: String::new(),
                demo_video_url: String::new(),
                challenge_pack_url: None,
            },
            Priority::Low,
            3,
        );
        let payload = serde_json::to_string(&job).unwrap();
        let popped = decode_popped("evalforge:queue:low", &payload).unwrap();
        assert_eq!(popped.job.submission_id, "sub-7");
        assert_eq!(popped.id, job.id);
    }

    #[test]
    fn test_result_key_deterministic() {
        let key1 = result_key("sub-42");
        let key2 = result_key("sub-42");
        assert_eq!(key1, key2);
        assert_eq!(key1, "evalforge:result:sub-42");
    }

    #[test]
    fn test_status_and_submission_keys_differ() {
        assert_eq!(status_key("abc"), "evalforge:status:abc");
        assert_eq!(submission_key("abc"), "evalforge:submission:abc");
    }

    #[test]
    fn test_decode_error_is_type_error() {
        let err = decode::<QueuedJob>("not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeError);
    }
}
