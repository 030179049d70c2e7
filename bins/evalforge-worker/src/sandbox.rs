/// Sandboxed Test Runner
///
/// Runs a built image once, with no network and fixed memory/CPU ceilings,
/// and reads back the artifact the entrypoint leaves in `/results`.
///
/// ## Outcomes
/// - exit 0 + readable `score.json` object: success, score = `totalScore`
/// - exit 0 + missing or malformed artifact: failure
/// - non-zero exit: failure, the artifact is not looked at
/// - deadline passed: graceful stop, then kill; reported as a failure
///
/// Every failure has score 0 and empty results. Only Docker API trouble is
/// an error. The container and the results directory never outlive a run.
use async_trait::async_trait;
use evalforge_common::pack::SCORE_FILE;
use evalforge_common::types::TestResult;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::bounded::{with_deadline, BoundedOutcome};
use crate::error::EvalError;
use crate::logs::LogBuffer;
use crate::workspace::{ensure_removed, unique_dir};

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Host directory bind-mounted at `/results`
    pub results_dir: PathBuf,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
}

#[async_trait]
pub trait ContainerBackend: Send + Sync {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EvalError>;
    async fn start_container(&self, id: &str) -> Result<(), EvalError>;
    /// Wait for the container to stop and return its exit code
    async fn wait_container(&self, id: &str) -> Result<i64, EvalError>;
    async fn container_logs(&self, id: &str, logs: &mut LogBuffer) -> Result<(), EvalError>;
    /// SIGTERM, then SIGKILL once `grace` has passed
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), EvalError>;
    async fn kill_container(&self, id: &str) -> Result<(), EvalError>;
    async fn remove_container(&self, id: &str) -> Result<(), EvalError>;
}

#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub kill_grace: Duration,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 2 * 1024 * 1024 * 1024,
            nano_cpus: 2_000_000_000,
            kill_grace: Duration::from_secs(5),
        }
    }
}

pub struct SandboxedTestRunner {
    backend: Arc<dyn ContainerBackend>,
    work_dir: PathBuf,
    limits: SandboxLimits,
}

impl SandboxedTestRunner {
    pub fn new(backend: Arc<dyn ContainerBackend>, work_dir: PathBuf, limits: SandboxLimits) -> Self {
        Self {
            backend,
            work_dir,
            limits,
        }
    }

    pub async fn run_tests(&self, image: &str, timeout: Duration) -> Result<TestResult, EvalError> {
        let results_dir = unique_dir(&self.work_dir, "results");
        if let Err(e) = create_results_dir(&results_dir).await {
            ensure_removed(&results_dir).await;
            return Err(EvalError::transient("Failed to create results directory", e));
        }

        let spec = ContainerSpec {
            name: format!("evalforge-run-{}", Uuid::new_v4()),
            image: image.to_string(),
            results_dir: results_dir.clone(),
            memory_bytes: self.limits.memory_bytes,
            nano_cpus: self.limits.nano_cpus,
        };

        let id = match self.backend.create_container(&spec).await {
            Ok(id) => id,
            Err(e) => {
                ensure_removed(&results_dir).await;
                return Err(e);
            }
        };

        tracing::info!(image, container = %id, timeout_secs = timeout.as_secs(), "Running tests");
        let outcome = self.supervise(&id, &results_dir, timeout).await;

        if let Err(e) = self.backend.remove_container(&id).await {
            tracing::warn!(container = %id, error = %e, "Failed to remove container");
        }
        ensure_removed(&results_dir).await;

        outcome
    }

    async fn supervise(
        &self,
        id: &str,
        results_dir: &Path,
        timeout: Duration,
    ) -> Result<TestResult, EvalError> {
        self.backend.start_container(id).await?;

        let verdict = match with_deadline(timeout, self.backend.wait_container(id)).await {
            BoundedOutcome::TimedOut => {
                tracing::warn!(container = %id, "Test run exceeded its deadline, stopping");
                self.halt(id).await;
                Err(EvalError::SandboxFailure(format!(
                    "Test execution timed out after {}s",
                    timeout.as_secs()
                )))
            }
            BoundedOutcome::Exited(Err(e)) => return Err(e),
            BoundedOutcome::Exited(Ok(0)) => read_results(results_dir).await,
            BoundedOutcome::Exited(Ok(code)) => Err(EvalError::SandboxFailure(format!(
                "Test container exited with code {}",
                code
            ))),
        };

        let mut logs = LogBuffer::default();
        if let Err(e) = self.backend.container_logs(id, &mut logs).await {
            tracing::warn!(container = %id, error = %e, "Failed to collect container logs");
        }
        let logs = logs.into_string();

        Ok(match verdict {
            Ok(results) => TestResult::passed(results, logs),
            Err(e) => TestResult::failed(e.to_string(), logs),
        })
    }

    async fn halt(&self, id: &str) {
        if let Err(e) = self.backend.stop_container(id, self.limits.kill_grace).await {
            tracing::warn!(container = %id, error = %e, "Graceful stop failed, killing");
            if let Err(e) = self.backend.kill_container(id).await {
                tracing::warn!(container = %id, error = %e, "Failed to kill container");
            }
        }
    }
}

async fn create_results_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    // The entrypoint may run as any user inside the image
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o777)).await?;
    }
    Ok(())
}

async fn read_results(results_dir: &Path) -> Result<Map<String, Value>, EvalError> {
    let fail = |detail: String| EvalError::SandboxFailure(format!("Failed to read test results: {}", detail));

    let raw = tokio::fs::read_to_string(results_dir.join(SCORE_FILE))
        .await
        .map_err(|e| fail(e.to_string()))?;
    match serde_json::from_str::<Value>(&raw).map_err(|e| fail(e.to_string()))? {
        Value::Object(results) => Ok(results),
        _ => Err(fail(format!("{} is not a JSON object", SCORE_FILE))),
    }
}
