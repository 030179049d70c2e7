/// Docker Engine - bollard backed image builds and sandboxed containers
///
/// **Core Responsibility:**
/// Talk to the Docker daemon on behalf of the build engine and the test
/// runner. It knows how to build, run and clean up; it does not know what a
/// build failure or a test failure means for the score.
///
/// **Sandbox guarantees applied to every container:**
/// - no network (`network_mode=none`, networking disabled)
/// - memory ceiling with swap equal to memory
/// - CPU ceiling via `nano_cpus`
/// - `no-new-privileges` and a pid limit
/// - only the per-run results directory is mounted
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::{BuildImageOptions, RemoveImageOptions};
use bollard::models::{BuildInfo, HostConfig};
use bollard::Docker;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use std::path::Path;
use std::time::Duration;

use crate::builder::ImageBackend;
use crate::error::EvalError;
use crate::logs::LogBuffer;
use crate::sandbox::{ContainerBackend, ContainerSpec};

const RESULTS_MOUNT: &str = "/results";
const PIDS_LIMIT: i64 = 512;

pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    pub fn connect() -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(DockerEngine { docker })
    }

    /// Fail fast at start-up when the daemon is unreachable
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.docker.ping().await?;
        Ok(())
    }
}

fn is_not_found(err: &DockerError) -> bool {
    matches!(
        err,
        DockerError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Pack a directory into an in-memory tar for the build API
async fn tar_context(context_dir: &Path) -> std::io::Result<Bytes> {
    let mut archive = tokio_tar::Builder::new(Vec::new());
    archive.follow_symlinks(false);
    archive.append_dir_all(".", context_dir).await?;
    let data = archive.into_inner().await?;
    Ok(Bytes::from(data))
}

/// Append one build stream message; an error message ends the build
fn record_build_output(info: BuildInfo, logs: &mut LogBuffer) -> Result<(), EvalError> {
    if let Some(line) = info.stream {
        logs.push_str(&line);
    }
    match info.error {
        Some(error) => Err(EvalError::BuildFailure(error)),
        None => Ok(()),
    }
}

#[async_trait]
impl ImageBackend for DockerEngine {
    async fn build_image(
        &self,
        context_dir: &Path,
        tag: &str,
        logs: &mut LogBuffer,
    ) -> Result<(), EvalError> {
        let context = tar_context(context_dir)
            .await
            .map_err(|e| EvalError::transient("Failed to archive build context", e))?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile",
            t: tag,
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(context));
        while let Some(item) = stream.next().await {
            match item {
                Ok(info) => record_build_output(info, logs)?,
                Err(DockerError::DockerStreamError { error }) => {
                    return Err(EvalError::BuildFailure(error))
                }
                Err(e) => return Err(EvalError::transient("Docker build request failed", e)),
            }
        }

        tracing::debug!(image = tag, "Image built");
        Ok(())
    }

    async fn remove_image(&self, tag: &str) -> Result<(), EvalError> {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_image(tag, Some(options), None).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(EvalError::transient("Failed to remove image", e)),
        }
    }
}

#[async_trait]
impl ContainerBackend for DockerEngine {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EvalError> {
        let config = Config {
            image: Some(spec.image.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                memory: Some(spec.memory_bytes),
                memory_swap: Some(spec.memory_bytes),
                nano_cpus: Some(spec.nano_cpus),
                network_mode: Some("none".to_string()),
                pids_limit: Some(PIDS_LIMIT),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                binds: Some(vec![format!(
                    "{}:{}",
                    spec.results_dir.display(),
                    RESULTS_MOUNT
                )]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| EvalError::transient("Failed to create container", e))?;
        Ok(container.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), EvalError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| EvalError::transient("Failed to start container", e))
    }

    async fn wait_container(&self, id: &str) -> Result<i64, EvalError> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = self.docker.wait_container(id, Some(options));

        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error carrying the code
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(EvalError::transient("Failed to wait for container", e)),
            None => Err(EvalError::TransientInfra(
                "Container wait stream ended without a status".to_string(),
            )),
        }
    }

    async fn container_logs(&self, id: &str, logs: &mut LogBuffer) -> Result<(), EvalError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };

        let mut stream = self.docker.logs(id, Some(options));
        while let Some(item) = stream.next().await {
            match item {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => logs.push_bytes(&message),
                Ok(_) => {}
                Err(e) => return Err(EvalError::transient("Failed to read container logs", e)),
            }
            if logs.is_truncated() {
                break;
            }
        }
        Ok(())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), EvalError> {
        let options = StopContainerOptions {
            t: grace.as_secs() as i64,
        };
        self.docker
            .stop_container(id, Some(options))
            .await
            .map_err(|e| EvalError::transient("Failed to stop container", e))
    }

    async fn kill_container(&self, id: &str) -> Result<(), EvalError> {
        self.docker
            .kill_container(id, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| EvalError::transient("Failed to kill container", e))
    }

    async fn remove_container(&self, id: &str) -> Result<(), EvalError> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(EvalError::transient("Failed to remove container", e)),
        }
    }
}
