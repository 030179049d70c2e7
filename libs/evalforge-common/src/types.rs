use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Evaluation request (immutable)
/// Handed over by the submission service, consumed once per attempt.
/// Field names are camelCase on the wire to match the enqueue payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationJob {
    pub submission_id: String,
    pub challenge_id: String,
    pub repo_url: String,
    #[serde(default)]
    pub pitch_deck_url: String,
    #[serde(default)]
    pub demo_video_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_pack_url: Option<String>,
}

/// Queue priority, assigned once at enqueue time
/// Declaration order is dequeue order: Critical drains first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

impl Priority {
    /// All priorities, highest first
    /// This is the order in which workers poll the queues
    pub fn all_variants() -> &'static [Priority] {
        &[
            Priority::Critical,
            Priority::High,
            Priority::Medium,
            Priority::Low,
        ]
    }

    /// Parse a priority from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Priority> {
        match s.to_lowercase().as_str() {
            "critical" => Some(Priority::Critical),
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Critical => write!(f, "critical"),
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// Job Metadata for Retry and Failure Handling
/// Tracks retry attempts and failure information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub attempts: u8,
    pub max_attempts: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
}

impl Default for JobMetadata {
    fn default() -> Self {
        Self {
            attempts: 0,
            max_attempts: 3,
            last_failure_reason: None,
        }
    }
}

/// Queue envelope around an [`EvaluationJob`]
/// The job itself never changes between attempts, only the metadata does
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: Uuid,
    pub job: EvaluationJob,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: JobMetadata,
}

impl QueuedJob {
    pub fn new(job: EvaluationJob, priority: Priority, max_attempts: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            job,
            priority,
            enqueued_at: Utc::now(),
            metadata: JobMetadata {
                max_attempts,
                ..JobMetadata::default()
            },
        }
    }
}

/// Detected project flavour
/// Chosen once by the detector and threaded through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    Node,
    Python,
    Unknown,
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectType::Node => write!(f, "node"),
            ProjectType::Python => write!(f, "python"),
            ProjectType::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    pub has_dockerfile: bool,
    pub package_files: Vec<String>,
}

impl ProjectInfo {
    /// The degraded answer used whenever the repository cannot be inspected
    pub fn unknown() -> Self {
        Self {
            project_type: ProjectType::Unknown,
            has_dockerfile: false,
            package_files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResult {
    pub success: bool,
    pub logs: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BuildResult {
    pub fn succeeded(image_id: String, logs: String) -> Self {
        Self {
            success: true,
            logs,
            image_id: Some(image_id),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, logs: String) -> Self {
        Self {
            success: false,
            logs,
            image_id: None,
            error: Some(error.into()),
        }
    }
}

/// Outcome of one sandboxed run
///
/// ## Semantics:
/// - `success == false` always carries `score == 0` and empty `results`
/// - `results` is the whole parsed artifact when the run succeeded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub success: bool,
    pub score: f64,
    pub logs: String,
    pub results: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResult {
    pub fn failed(error: impl Into<String>, logs: String) -> Self {
        Self {
            success: false,
            score: 0.0,
            logs,
            results: Map::new(),
            error: Some(error.into()),
        }
    }

    pub fn passed(results: Map<String, Value>, logs: String) -> Self {
        let score = results
            .get("totalScore")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        Self {
            success: true,
            score,
            logs,
            results,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub technical: f64,
    pub presentation: f64,
    pub innovation: f64,
    pub usability: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.technical + self.presentation + self.innovation + self.usability
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringResult {
    pub total_score: f64,
    pub breakdown: ScoreBreakdown,
    pub feedback: String,
    pub recommendations: Vec<String>,
}

/// Submission lifecycle as seen by the submission service.
/// This core only ever writes the two terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    UnderReview,
    Scored,
    Rejected,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Scored | SubmissionStatus::Rejected)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionStatus::Pending => write!(f, "PENDING"),
            SubmissionStatus::UnderReview => write!(f, "UNDER_REVIEW"),
            SubmissionStatus::Scored => write!(f, "SCORED"),
            SubmissionStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<ScoreBreakdown>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_type: Option<ProjectType>,
    pub test_score: f64,
    pub duration_ms: u64,
    pub attempt: u8,
}

/// Terminal result of one evaluation attempt
/// Written by workers, read by the submission service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub submission_id: String,
    pub score: f64,
    pub status: SubmissionStatus,
    pub feedback: String,
    pub metrics: EvaluationMetrics,
    pub execution_logs: String,
    pub build_success: bool,
    pub test_results: Map<String, Value>,
}

impl EvaluationResult {
    /// Zero-score rejection used for every failure branch
    pub fn rejected(
        submission_id: impl Into<String>,
        feedback: impl Into<String>,
        execution_logs: impl Into<String>,
    ) -> Self {
        Self {
            submission_id: submission_id.into(),
            score: 0.0,
            status: SubmissionStatus::Rejected,
            feedback: feedback.into(),
            metrics: EvaluationMetrics::default(),
            execution_logs: execution_logs.into(),
            build_success: false,
            test_results: Map::new(),
        }
    }
}

/// Submission row as registered by the submission service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub submission_id: String,
    pub challenge_id: String,
    pub status: SubmissionStatus,
    pub created_at: DateTime<Utc>,
}

/// Event published once per persisted result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub submission_id: String,
    pub status: SubmissionStatus,
    pub score: f64,
    pub duration_ms: u64,
}

/// Progress record kept for in-flight and recently finished jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub submission_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    pub progress: u8,
    pub logs: String,
    pub updated_at: DateTime<Utc>,
}

impl JobProgress {
    /// Entry for a job sitting in a priority list or the retry set
    pub fn queued(submission_id: impl Into<String>, logs: impl Into<String>) -> Self {
        Self {
            submission_id: submission_id.into(),
            stage: Some("queued".to_string()),
            progress: 0,
            logs: logs.into(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobLookup {
    Processing,
    NotFound,
}

/// Answer to a job-status query by submission id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusView {
    pub status: JobLookup,
    pub progress: u8,
    pub logs: String,
}

impl JobStatusView {
    pub fn not_found() -> Self {
        Self {
            status: JobLookup::NotFound,
            progress: 0,
            logs: String::new(),
        }
    }
}

impl From<JobProgress> for JobStatusView {
    fn from(p: JobProgress) -> Self {
        Self {
            status: JobLookup::Processing,
            progress: p.progress.min(100),
            logs: p.logs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueueHealth {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_job() -> EvaluationJob {
        EvaluationJob {
            submission_id: "sub-1".to_string(),
            challenge_id: "ch-1".to_string(),
            repo_url: "https://github.com/acme/app".to_string(),
            pitch_deck_url: "https://slides.example.com/deck".to_string(),
            demo_video_url: String::new(),
            challenge_pack_url: None,
        }
    }

    #[test]
    fn test_job_uses_camel_case_on_the_wire() {
        let json = serde_json::to_value(sample_job()).unwrap();
        assert_eq!(json["submissionId"], "sub-1");
        assert_eq!(json["repoUrl"], "https://github.com/acme/app");
        assert!(json.get("challengePackUrl").is_none());
    }

    #[test]
    fn test_job_accepts_missing_optional_links() {
        let job: EvaluationJob = serde_json::from_value(json!({
            "submissionId": "s",
            "challengeId": "c",
            "repoUrl": "https://example.com/r.git",
            "challengePackUrl": "https://example.com/pack.tar.gz"
        }))
        .unwrap();
        assert_eq!(job.pitch_deck_url, "");
        assert_eq!(
            job.challenge_pack_url.as_deref(),
            Some("https://example.com/pack.tar.gz")
        );
    }

    #[test]
    fn test_priority_order_is_dequeue_order() {
        let variants = Priority::all_variants();
        assert_eq!(variants.first(), Some(&Priority::Critical));
        assert_eq!(variants.last(), Some(&Priority::Low));
        assert!(Priority::Critical < Priority::Low);
    }

    #[test]
    fn test_priority_from_str() {
        assert_eq!(Priority::from_str("HIGH"), Some(Priority::High));
        assert_eq!(Priority::from_str("urgent"), None);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SubmissionStatus::UnderReview).unwrap();
        assert_eq!(json, "\"UNDER_REVIEW\"");
        assert!(SubmissionStatus::Rejected.is_terminal());
        assert!(!SubmissionStatus::Pending.is_terminal());
    }

    #[test]
    fn test_project_info_serializes_type_field() {
        let info = ProjectInfo {
            project_type: ProjectType::Python,
            has_dockerfile: false,
            package_files: vec!["requirements.txt".to_string()],
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["type"], "python");
        assert_eq!(json["packageFiles"][0], "requirements.txt");
    }

    #[test]
    fn test_failed_test_result_is_zeroed() {
        let result = TestResult::failed("container exited with code 1", "boom".to_string());
        assert!(!result.success);
        assert_eq!(result.score, 0.0);
        assert!(result.results.is_empty());
    }

    #[test]
    fn test_passed_test_result_reads_total_score() {
        let artifact = json!({"totalScore": 72.5, "testsPass": true});
        let result = TestResult::passed(artifact.as_object().unwrap().clone(), String::new());
        assert!(result.success);
        assert_eq!(result.score, 72.5);

        let no_score = json!({"testsPass": false});
        let result = TestResult::passed(no_score.as_object().unwrap().clone(), String::new());
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_queued_job_roundtrip_keeps_metadata() {
        let mut queued = QueuedJob::new(sample_job(), Priority::High, 3);
        queued.metadata.attempts = 2;
        let json = serde_json::to_string(&queued).unwrap();
        let back: QueuedJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, queued.id);
        assert_eq!(back.metadata.attempts, 2);
        assert_eq!(back.priority, Priority::High);
    }

    #[test]
    fn test_status_view_from_progress() {
        let view: JobStatusView = JobProgress {
            submission_id: "s".to_string(),
            stage: Some("build".to_string()),
            progress: 40,
            logs: "building".to_string(),
            updated_at: Utc::now(),
        }
        .into();
        assert_eq!(view.status, JobLookup::Processing);
        assert_eq!(view.progress, 40);
        assert_eq!(JobStatusView::not_found().status, JobLookup::NotFound);
    }

    #[test]
    fn test_queued_job_reads_as_processing() {
        let view = JobStatusView::from(JobProgress::queued("sub-3", "Queued"));
        assert_eq!(view.status, JobLookup::Processing);
        assert_eq!(view.progress, 0);
        assert_eq!(view.logs, "Queued");

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "processing");
    }
}
