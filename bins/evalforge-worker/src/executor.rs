/// Evaluation Orchestrator
///
/// Drives one attempt of one job through a fixed sequence of stages:
///
/// | Stage   | Progress |
/// |---------|----------|
/// | Clone   | 10       |
/// | Pack    | 20       |
/// | Detect  | 30       |
/// | Build   | 40       |
/// | Test    | 60       |
/// | Score   | 80       |
/// | Persist | 100      |
///
/// Whatever happens, the attempt ends with exactly one persisted
/// [`EvaluationResult`] and one cleanup pass over the repo checkout, the
/// downloaded pack and the built image. Nothing is resumed between attempts.
use async_trait::async_trait;
use evalforge_common::detector::detect_project;
use evalforge_common::scoring::{score_submission, ScoringInput};
use evalforge_common::types::{
    EvaluationJob, EvaluationMetrics, EvaluationResult, SubmissionStatus,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::builder::{BuildRequest, ContainerBuildEngine};
use crate::error::EvalError;
use crate::fetch::{PackFetcher, RepoFetcher};
use crate::sandbox::SandboxedTestRunner;
use crate::workspace::{ensure_removed, unique_dir};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Clone,
    Pack,
    Detect,
    Build,
    Test,
    Score,
    Persist,
}

impl Stage {
    pub fn progress(&self) -> u8 {
        match self {
            Stage::Clone => 10,
            Stage::Pack => 20,
            Stage::Detect => 30,
            Stage::Build => 40,
            Stage::Test => 60,
            Stage::Score => 80,
            Stage::Persist => 100,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Clone => "clone",
            Stage::Pack => "pack",
            Stage::Detect => "detect",
            Stage::Build => "build",
            Stage::Test => "test",
            Stage::Score => "score",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Side channel for stage transitions; must never fail the job
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, submission_id: &str, stage: Stage, message: &str);
}

/// The submission service's view of submissions and results
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn submission_exists(&self, submission_id: &str) -> Result<bool, EvalError>;
    async fn persist(&self, result: &EvaluationResult) -> Result<(), EvalError>;
}

/// Outcome of one attempt
#[derive(Debug)]
pub struct AttemptReport {
    pub result: EvaluationResult,
    /// Set when the attempt was cut short; decides retry and history
    pub failure: Option<EvalError>,
}

pub struct EvaluationOrchestrator {
    repos: Arc<dyn RepoFetcher>,
    packs: Arc<dyn PackFetcher>,
    builder: ContainerBuildEngine,
    runner: SandboxedTestRunner,
    store: Arc<dyn SubmissionStore>,
    progress: Arc<dyn ProgressReporter>,
    work_dir: PathBuf,
    test_timeout: Duration,
}

/// Per-attempt paths and artifacts owned by the orchestrator
#[derive(Debug, Default)]
struct AttemptScratch {
    repo_dir: Option<PathBuf>,
    pack_dir: Option<PathBuf>,
    image: Option<String>,
}

impl EvaluationOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repos: Arc<dyn RepoFetcher>,
        packs: Arc<dyn PackFetcher>,
        builder: ContainerBuildEngine,
        runner: SandboxedTestRunner,
        store: Arc<dyn SubmissionStore>,
        progress: Arc<dyn ProgressReporter>,
        work_dir: PathBuf,
        test_timeout: Duration,
    ) -> Self {
        Self {
            repos,
            packs,
            builder,
            runner,
            store,
            progress,
            work_dir,
            test_timeout,
        }
    }

    pub async fn evaluate(&self, job: &EvaluationJob, attempt: u8) -> AttemptReport {
        let started = Instant::now();
        let mut scratch = AttemptScratch::default();

        let outcome = self.run_pipeline(job, &mut scratch).await;
        self.cleanup(&scratch).await;

        let (mut result, mut failure) = match outcome {
            Ok(result) => (result, None),
            Err(e) => {
                tracing::warn!(
                    submission_id = %job.submission_id,
                    attempt,
                    kind = e.kind(),
                    error = %e,
                    "Evaluation rejected"
                );
                (rejection(job, &e), Some(e))
            }
        };
        result.metrics.duration_ms = started.elapsed().as_millis() as u64;
        result.metrics.attempt = attempt;

        if let Err(e) = self.store.persist(&result).await {
            tracing::error!(submission_id = %job.submission_id, error = %e, "Failed to persist result");
            failure = Some(e);
        }
        self.report(job, Stage::Persist, &format!("Evaluation finished: {}", result.status))
            .await;

        AttemptReport { result, failure }
    }

    async fn report(&self, job: &EvaluationJob, stage: Stage, message: &str) {
        tracing::info!(submission_id = %job.submission_id, stage = %stage, "{}", message);
        self.progress
            .report(&job.submission_id, stage, message)
            .await;
    }

    async fn run_pipeline(
        &self,
        job: &EvaluationJob,
        scratch: &mut AttemptScratch,
    ) -> Result<EvaluationResult, EvalError> {
        if !self.store.submission_exists(&job.submission_id).await? {
            return Err(EvalError::DataIntegrity(format!(
                "Submission {} not found",
                job.submission_id
            )));
        }

        self.report(job, Stage::Clone, "Cloning repository").await;
        let repo_dir = unique_dir(&self.work_dir, "repo");
        scratch.repo_dir = Some(repo_dir.clone());
        self.repos.fetch_repo(&job.repo_url, &repo_dir).await?;

        self.report(job, Stage::Pack, "Preparing challenge pack").await;
        let pack_root = match job.challenge_pack_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => {
                let pack_dir = unique_dir(&self.work_dir, "pack");
                scratch.pack_dir = Some(pack_dir.clone());
                Some(self.packs.fetch_pack(url, &pack_dir).await?)
            }
            _ => None,
        };

        self.report(job, Stage::Detect, "Detecting project type").await;
        let project = detect_on_blocking_pool(&repo_dir).await;

        self.report(job, Stage::Build, &format!("Building {} project", project.project_type))
            .await;
        let build = self
            .builder
            .build(&BuildRequest {
                submission_id: &job.submission_id,
                code_dir: &repo_dir,
                pack_dir: pack_root.as_deref(),
                project: &project,
            })
            .await?;

        let image = match (build.success, build.image_id.clone()) {
            (true, Some(image)) => image,
            _ => {
                let reason = build
                    .error
                    .clone()
                    .unwrap_or_else(|| "unknown build error".to_string());
                let mut result = rejection(job, &EvalError::BuildFailure(reason));
                result.execution_logs = build.logs;
                result.metrics.project_type = Some(project.project_type);
                return Ok(result);
            }
        };
        scratch.image = Some(image.clone());

        self.report(job, Stage::Test, "Running tests in sandbox").await;
        let test = self.runner.run_tests(&image, self.test_timeout).await?;

        self.report(job, Stage::Score, "Scoring submission").await;
        let scoring = score_submission(&ScoringInput {
            build_success: true,
            test_results: &test.results,
            repo_url: &job.repo_url,
            pitch_deck_url: &job.pitch_deck_url,
            demo_video_url: &job.demo_video_url,
        });

        let mut execution_logs = build.logs;
        if !execution_logs.is_empty() && !execution_logs.ends_with('\n') {
            execution_logs.push('\n');
        }
        execution_logs.push_str(&test.logs);
        if let Some(error) = &test.error {
            execution_logs.push_str(&format!("\n{}\n", error));
        }

        Ok(EvaluationResult {
            submission_id: job.submission_id.clone(),
            score: scoring.total_score,
            status: SubmissionStatus::Scored,
            feedback: scoring.feedback,
            metrics: EvaluationMetrics {
                breakdown: Some(scoring.breakdown),
                recommendations: scoring.recommendations,
                project_type: Some(project.project_type),
                test_score: test.score,
                duration_ms: 0,
                attempt: 0,
            },
            execution_logs,
            build_success: true,
            test_results: test.results,
        })
    }

    async fn cleanup(&self, scratch: &AttemptScratch) {
        if let Some(dir) = &scratch.repo_dir {
            ensure_removed(dir).await;
        }
        if let Some(dir) = &scratch.pack_dir {
            ensure_removed(dir).await;
        }
        if let Some(image) = &scratch.image {
            self.builder.remove_image(image).await;
        }
    }
}

async fn detect_on_blocking_pool(repo_dir: &Path) -> evalforge_common::ProjectInfo {
    let dir = repo_dir.to_path_buf();
    tokio::task::spawn_blocking(move || detect_project(&dir))
        .await
        .unwrap_or_else(|_| evalforge_common::ProjectInfo::unknown())
}

/// Zero-score REJECTED result for an attempt cut short by `err`
fn rejection(job: &EvaluationJob, err: &EvalError) -> EvaluationResult {
    EvaluationResult::rejected(&job.submission_id, err.feedback(), err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::tests::{BuildBehaviour, FakeImageBackend};
    use crate::sandbox::tests::{FakeContainerBackend, RunBehaviour};
    use crate::sandbox::SandboxLimits;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeRepos {
        files: Vec<(&'static str, &'static str)>,
        fail: bool,
    }

    #[async_trait]
    impl RepoFetcher for FakeRepos {
        async fn fetch_repo(&self, repo_url: &str, dest: &Path) -> Result<(), EvalError> {
            if self.fail {
                return Err(EvalError::TransientInfra(format!(
                    "Failed to clone {}: repository not found",
                    repo_url
                )));
            }
            fs::create_dir_all(dest).unwrap();
            for (name, body) in &self.files {
                fs::write(dest.join(name), body).unwrap();
            }
            Ok(())
        }
    }

    struct FakePacks;

    #[async_trait]
    impl PackFetcher for FakePacks {
        async fn fetch_pack(&self, _url: &str, dest: &Path) -> Result<PathBuf, EvalError> {
            let root = dest.join("extracted");
            fs::create_dir_all(root.join("tests")).unwrap();
            fs::write(root.join("entrypoint.sh"), "#!/bin/bash\n").unwrap();
            Ok(root)
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        missing: bool,
        persisted: Mutex<Vec<EvaluationResult>>,
    }

    #[async_trait]
    impl SubmissionStore for MemoryStore {
        async fn submission_exists(&self, _id: &str) -> Result<bool, EvalError> {
            Ok(!self.missing)
        }

        async fn persist(&self, result: &EvaluationResult) -> Result<(), EvalError> {
            self.persisted.lock().unwrap().push(result.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        seen: Mutex<Vec<u8>>,
    }

    #[async_trait]
    impl ProgressReporter for RecordingProgress {
        async fn report(&self, _id: &str, stage: Stage, _message: &str) {
            self.seen.lock().unwrap().push(stage.progress());
        }
    }

    struct Harness {
        work: TempDir,
        images: Arc<FakeImageBackend>,
        containers: Arc<FakeContainerBackend>,
        store: Arc<MemoryStore>,
        progress: Arc<RecordingProgress>,
        orchestrator: EvaluationOrchestrator,
    }

    fn harness(
        repos: FakeRepos,
        build: BuildBehaviour,
        run: FakeContainerBackend,
        store: MemoryStore,
    ) -> Harness {
        let work = TempDir::new().unwrap();
        let images = Arc::new(FakeImageBackend::new(build));
        let containers = Arc::new(run);
        let store = Arc::new(store);
        let progress = Arc::new(RecordingProgress::default());

        let orchestrator = EvaluationOrchestrator::new(
            Arc::new(repos),
            Arc::new(FakePacks),
            ContainerBuildEngine::new(images.clone(), work.path().to_path_buf(), Duration::from_secs(10)),
            SandboxedTestRunner::new(
                containers.clone(),
                work.path().to_path_buf(),
                SandboxLimits::default(),
            ),
            store.clone(),
            progress.clone(),
            work.path().to_path_buf(),
            Duration::from_secs(10),
        );

        Harness {
            work,
            images,
            containers,
            store,
            progress,
            orchestrator,
        }
    }

    fn node_repo() -> FakeRepos {
        FakeRepos {
            files: vec![("package.json", r#"{"scripts":{"test":"jest"}}"#), ("README.md", "# app")],
            fail: false,
        }
    }

    fn job(pack: Option<&str>) -> EvaluationJob {
        EvaluationJob {
            submission_id: "sub-7".to_string(),
            challenge_id: "ch-1".to_string(),
            repo_url: "https://github.com/acme/app".to_string(),
            pitch_deck_url: "https://slides.example.com/deck".to_string(),
            demo_video_url: "https://video.example.com/demo".to_string(),
            challenge_pack_url: pack.map(str::to_string),
        }
    }

    fn work_is_empty(work: &Path) -> bool {
        fs::read_dir(work).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_full_pipeline_scores_submission() {
        let h = harness(
            node_repo(),
            BuildBehaviour::Succeed,
            FakeContainerBackend::scoring(
                r#"{"totalScore": 80, "testsPass": true, "testsCovered": 10, "codeQuality": {"score": 8}}"#,
            ),
            MemoryStore::default(),
        );

        let report = h.orchestrator.evaluate(&job(None), 1).await;

        assert!(report.failure.is_none());
        let result = &report.result;
        assert_eq!(result.status, SubmissionStatus::Scored);
        assert!(result.build_success);
        assert!(result.score > 80.0);
        assert_eq!(result.metrics.test_score, 80.0);
        assert_eq!(result.metrics.attempt, 1);
        assert_eq!(result.test_results["testsCovered"], 10);

        assert_eq!(*h.progress.seen.lock().unwrap(), vec![10, 20, 30, 40, 60, 80, 100]);
        assert_eq!(h.store.persisted.lock().unwrap().len(), 1);

        // image removed after the test stage, scratch dirs gone
        assert_eq!(h.images.removed.lock().unwrap().len(), 1);
        assert!(h.containers.called("remove"));
        assert!(work_is_empty(h.work.path()));
    }

    #[tokio::test]
    async fn test_supplied_pack_is_used_and_removed() {
        let h = harness(
            node_repo(),
            BuildBehaviour::Succeed,
            FakeContainerBackend::scoring(r#"{"totalScore": 10}"#),
            MemoryStore::default(),
        );

        let report = h
            .orchestrator
            .evaluate(&job(Some("https://cdn.example.com/pack.tar.gz")), 1)
            .await;

        assert_eq!(report.result.status, SubmissionStatus::Scored);
        assert!(work_is_empty(h.work.path()));
    }

    #[tokio::test]
    async fn test_missing_submission_is_rejected() {
        let h = harness(
            node_repo(),
            BuildBehaviour::Succeed,
            FakeContainerBackend::scoring("{}"),
            MemoryStore {
                missing: true,
                ..Default::default()
            },
        );

        let report = h.orchestrator.evaluate(&job(None), 1).await;

        assert_eq!(report.result.status, SubmissionStatus::Rejected);
        assert_eq!(report.result.score, 0.0);
        assert!(report.result.execution_logs.contains("sub-7"));
        assert!(matches!(report.failure, Some(EvalError::DataIntegrity(_))));
        assert!(h.images.built.lock().unwrap().is_empty());
        assert_eq!(h.store.persisted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clone_failure_is_rejected_and_retryable() {
        let h = harness(
            FakeRepos {
                files: vec![],
                fail: true,
            },
            BuildBehaviour::Succeed,
            FakeContainerBackend::scoring("{}"),
            MemoryStore::default(),
        );

        let report = h.orchestrator.evaluate(&job(None), 2).await;

        assert_eq!(report.result.status, SubmissionStatus::Rejected);
        assert!(report.result.feedback.starts_with("Evaluation error:"));
        assert!(report.failure.as_ref().unwrap().is_retryable());
        assert_eq!(report.result.metrics.attempt, 2);
        assert!(work_is_empty(h.work.path()));
    }

    #[tokio::test]
    async fn test_build_failure_skips_test_and_score() {
        let h = harness(
            node_repo(),
            BuildBehaviour::FailDockerfile,
            FakeContainerBackend::scoring("{}"),
            MemoryStore::default(),
        );

        let report = h.orchestrator.evaluate(&job(None), 1).await;

        let result = &report.result;
        assert!(report.failure.is_none());
        assert_eq!(result.status, SubmissionStatus::Rejected);
        assert_eq!(result.score, 0.0);
        assert!(!result.build_success);
        assert!(result.feedback.starts_with("Build failed:"));
        assert!(result.execution_logs.contains("Step 3/8"));
        assert!(h.containers.calls.lock().unwrap().is_empty());
        assert_eq!(*h.progress.seen.lock().unwrap(), vec![10, 20, 30, 40, 100]);
        assert!(work_is_empty(h.work.path()));
    }

    #[tokio::test]
    async fn test_failed_sandbox_run_is_still_scored() {
        let h = harness(
            node_repo(),
            BuildBehaviour::Succeed,
            FakeContainerBackend::new(RunBehaviour::Exit(0, None)),
            MemoryStore::default(),
        );

        let report = h.orchestrator.evaluate(&job(None), 1).await;

        let result = &report.result;
        assert_eq!(result.status, SubmissionStatus::Scored);
        assert!(result.test_results.is_empty());
        assert_eq!(result.metrics.test_score, 0.0);
        assert!(result.execution_logs.contains("Failed to read test results"));
        // technical falls back to 15 + default code quality
        assert_eq!(result.metrics.breakdown.unwrap().technical, 23.0);
    }

    #[tokio::test]
    async fn test_docker_trouble_during_run_is_rejected() {
        let h = harness(
            node_repo(),
            BuildBehaviour::Succeed,
            FakeContainerBackend::new(RunBehaviour::CreateFails),
            MemoryStore::default(),
        );

        let report = h.orchestrator.evaluate(&job(None), 1).await;

        assert_eq!(report.result.status, SubmissionStatus::Rejected);
        assert!(report.result.feedback.contains("No such image"));
        assert!(report.failure.unwrap().is_retryable());
        assert_eq!(h.images.removed.lock().unwrap().len(), 1);
        assert!(work_is_empty(h.work.path()));
    }

    #[test]
    fn test_stage_progress_is_monotonic() {
        let stages = [
            Stage::Clone,
            Stage::Pack,
            Stage::Detect,
            Stage::Build,
            Stage::Test,
            Stage::Score,
            Stage::Persist,
        ];
        let progress: Vec<u8> = stages.iter().map(Stage::progress).collect();
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(Stage::Persist.progress(), 100);
    }
}
