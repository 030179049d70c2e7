// HTTP route handlers for the EvalForge API

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use evalforge_common::policy::{parse_deadline, priority_for_deadline, PolicyError};
use evalforge_common::redis;
use evalforge_common::scoring::is_http_url;
use evalforge_common::types::{
    EvaluationJob, JobProgress, Priority, QueuedJob, SubmissionRecord, SubmissionStatus,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{metrics, AppState};

/// Enqueue payload sent by the submission service
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub submission_id: String,
    pub challenge_id: String,
    pub repo_url: String,
    #[serde(default)]
    pub pitch_deck_url: String,
    #[serde(default)]
    pub demo_video_url: String,
    #[serde(default)]
    pub challenge_pack_url: Option<String>,
    #[serde(default)]
    pub challenge_deadline: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub job_id: String,
    pub submission_id: String,
    pub priority: Priority,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, PartialEq)]
pub enum RequestError {
    MissingField(&'static str),
    InvalidRepoUrl(String),
    InvalidDeadline(PolicyError),
}

impl RequestError {
    /// Label used on the rejected-requests counter
    pub fn reason(&self) -> &'static str {
        match self {
            RequestError::MissingField(_) => "missing_field",
            RequestError::InvalidRepoUrl(_) => "invalid_repo_url",
            RequestError::InvalidDeadline(_) => "invalid_deadline",
        }
    }

    pub fn message(&self) -> String {
        match self {
            RequestError::MissingField(field) => format!("{} is required", field),
            RequestError::InvalidRepoUrl(url) => format!("repoUrl '{}' is not a valid http(s) URL", url),
            RequestError::InvalidDeadline(e) => e.to_string(),
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Check an enqueue request and decide its priority
pub fn validate_request(
    req: EnqueueRequest,
    now: DateTime<Utc>,
) -> Result<(EvaluationJob, Priority), RequestError> {
    let required = [
        ("submissionId", &req.submission_id),
        ("challengeId", &req.challenge_id),
        ("repoUrl", &req.repo_url),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(RequestError::MissingField(field));
        }
    }
    if !is_http_url(&req.repo_url) {
        return Err(RequestError::InvalidRepoUrl(req.repo_url));
    }

    let deadline = match req.challenge_deadline.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => {
            Some(parse_deadline(raw).map_err(RequestError::InvalidDeadline)?)
        }
        _ => None,
    };
    let priority = priority_for_deadline(deadline, now);

    let job = EvaluationJob {
        submission_id: req.submission_id.trim().to_string(),
        challenge_id: req.challenge_id.trim().to_string(),
        repo_url: req.repo_url.trim().to_string(),
        pitch_deck_url: req.pitch_deck_url,
        demo_video_url: req.demo_video_url,
        challenge_pack_url: req.challenge_pack_url.filter(|u| !u.trim().is_empty()),
    };
    Ok((job, priority))
}

/// POST /evaluations - Register a submission and queue its evaluation
pub async fn enqueue_evaluation(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<EnqueueRequest>,
) -> Response {
    let now = Utc::now();
    let (job, priority) = match validate_request(payload, now) {
        Ok(accepted) => accepted,
        Err(e) => {
            metrics::record_request_rejected(e.reason());
            return error_response(StatusCode::BAD_REQUEST, e.message());
        }
    };

    let record = SubmissionRecord {
        submission_id: job.submission_id.clone(),
        challenge_id: job.challenge_id.clone(),
        status: SubmissionStatus::UnderReview,
        created_at: now,
    };
    let queued = QueuedJob::new(job, priority, state.max_attempts);

    let mut conn = state.redis.clone();
    if let Err(e) = redis::save_submission(&mut conn, &record).await {
        error!(submission_id = %record.submission_id, error = %e, "Failed to register submission");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to register submission");
    }
    // Written before the push so a fast worker's progress is never overwritten
    let waiting = JobProgress::queued(&record.submission_id, "Queued");
    if let Err(e) = redis::write_progress(&mut conn, &waiting, state.status_ttl_secs).await {
        warn!(submission_id = %record.submission_id, error = %e, "Failed to write queued status");
    }
    if let Err(e) = redis::push_job(&mut conn, &queued).await {
        error!(submission_id = %record.submission_id, error = %e, "Failed to queue evaluation");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to queue evaluation");
    }

    metrics::record_evaluation_enqueued(&priority);
    info!(
        submission_id = %record.submission_id,
        job_id = %queued.id,
        priority = %priority,
        "Evaluation queued"
    );

    (
        StatusCode::CREATED,
        Json(EnqueueResponse {
            job_id: queued.id.to_string(),
            submission_id: record.submission_id,
            priority,
        }),
    )
        .into_response()
}

/// GET /evaluations/:id/status - Progress of an in-flight or recent job
pub async fn evaluation_status(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Response {
    let mut conn = state.redis.clone();
    match redis::read_status(&mut conn, &submission_id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => {
            error!(submission_id = %submission_id, error = %e, "Failed to read job status");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read job status")
        }
    }
}

/// GET /evaluations/:id/result - Latest persisted result
pub async fn evaluation_result(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<String>,
) -> Response {
    let mut conn = state.redis.clone();
    match redis::load_result(&mut conn, &submission_id).await {
        Ok(Some(result)) => (StatusCode::OK, Json(result)).into_response(),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("no result for submission {}", submission_id),
        ),
        Err(e) => {
            error!(submission_id = %submission_id, error = %e, "Failed to load result");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to load result")
        }
    }
}

/// GET /queue/health - Waiting, active and historical job counts
pub async fn queue_health(State(state): State<Arc<AppState>>) -> Response {
    let mut conn = state.redis.clone();
    match redis::queue_health(&mut conn).await {
        Ok(health) => {
            metrics::record_queue_health(&health);
            (StatusCode::OK, Json(health)).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to read queue health");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read queue health")
        }
    }
}

/// GET /metrics - Prometheus exposition
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> Response {
    let mut conn = state.redis.clone();
    metrics::update_queue_depths(&mut conn).await;
    if let Ok(health) = redis::queue_health(&mut conn).await {
        metrics::record_queue_health(&health);
    }

    match metrics::render_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to render metrics")
        }
    }
}

/// GET /health - Liveness check with uptime
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "uptimeSecs": state.start_time.elapsed().as_secs(),
        })),
    )
}
