/// Container Build Engine
///
/// **Build context layout** (exactly three top-level entries):
/// ```text
/// build-<uuid>/
///   code/        the submission checkout
///   pack/        tests/, eval_config.yaml, entrypoint.sh
///   Dockerfile   rendered from the template picked for the project
/// ```
///
/// The context lives only for the duration of one build. Failures caused by
/// the submission come back as an unsuccessful [`BuildResult`]; only daemon
/// trouble is an error.
use async_trait::async_trait;
use evalforge_common::dockerfile::{render_dockerfile, DockerfileTemplate};
use evalforge_common::pack::{ensure_pack_layout, write_default_pack, DefaultPackOptions, PackError};
use evalforge_common::types::{BuildResult, ProjectInfo};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::bounded::{with_deadline, BoundedOutcome};
use crate::error::EvalError;
use crate::logs::LogBuffer;
use crate::workspace::{copy_tree, ensure_removed, unique_dir};

pub const IMAGE_REPOSITORY: &str = "evalforge-submission";

/// Image build backend
///
/// Implementations report problems with the Dockerfile or the submission as
/// `BuildFailure` and problems talking to the daemon as `TransientInfra`.
/// Build output goes to `logs`; the failure message is only returned, the
/// engine appends it once.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Build the `Dockerfile` at the root of `context_dir` and tag it `tag`
    async fn build_image(
        &self,
        context_dir: &Path,
        tag: &str,
        logs: &mut LogBuffer,
    ) -> Result<(), EvalError>;

    /// Remove an image by tag; a missing image is not an error
    async fn remove_image(&self, tag: &str) -> Result<(), EvalError>;
}

pub struct BuildRequest<'a> {
    pub submission_id: &'a str,
    pub code_dir: &'a Path,
    /// Pack root of a supplied challenge pack, `None` for the default pack
    pub pack_dir: Option<&'a Path>,
    pub project: &'a ProjectInfo,
}

/// Unique tag per attempt: `evalforge-submission:<submission>-<uuid8>`
pub fn image_tag(submission_id: &str) -> String {
    let mut slug: String = submission_id
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '-' })
        .collect();
    slug = slug.trim_start_matches(['-', '.']).to_string();
    slug.truncate(64);
    if slug.is_empty() {
        slug.push_str("submission");
    }
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}:{}-{}", IMAGE_REPOSITORY, slug, &suffix[..8])
}

pub struct ContainerBuildEngine {
    backend: Arc<dyn ImageBackend>,
    work_dir: PathBuf,
    timeout: Duration,
    default_pack: DefaultPackOptions,
}

impl ContainerBuildEngine {
    pub fn new(backend: Arc<dyn ImageBackend>, work_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            backend,
            work_dir,
            timeout,
            default_pack: DefaultPackOptions::default(),
        }
    }

    pub async fn build(&self, req: &BuildRequest<'_>) -> Result<BuildResult, EvalError> {
        let context = unique_dir(&self.work_dir, "build");
        let tag = image_tag(req.submission_id);
        let mut logs = LogBuffer::default();

        tracing::info!(
            submission_id = req.submission_id,
            image = %tag,
            project_type = %req.project.project_type,
            "Building image"
        );

        let outcome = self.build_in(&context, req, &tag, &mut logs).await;
        ensure_removed(&context).await;

        match outcome {
            Ok(()) => Ok(BuildResult::succeeded(tag, logs.into_string())),
            Err(EvalError::BuildFailure(msg)) => {
                tracing::info!(submission_id = req.submission_id, error = %msg, "Build failed");
                self.remove_image(&tag).await;
                logs.push_line(&msg);
                Ok(BuildResult::failed(msg, logs.into_string()))
            }
            Err(e) => {
                self.remove_image(&tag).await;
                Err(e)
            }
        }
    }

    async fn build_in(
        &self,
        context: &Path,
        req: &BuildRequest<'_>,
        tag: &str,
        logs: &mut LogBuffer,
    ) -> Result<(), EvalError> {
        let submission_image = format!("{}-base", tag);
        let template = DockerfileTemplate::for_project(req.project, &submission_image);

        let dockerfile = render_dockerfile(&template)
            .map_err(|e| EvalError::BuildFailure(e.to_string()))?;
        self.prepare_context(context, req, dockerfile).await?;
        logs.push_line(&format!("Using {} Dockerfile template", template.name()));

        let backend = &self.backend;
        let steps = async {
            if template.needs_submission_image() {
                backend
                    .build_image(&context.join("code"), &submission_image, logs)
                    .await?;
            }
            backend.build_image(context, tag, logs).await
        };

        let result = match with_deadline(self.timeout, steps).await {
            BoundedOutcome::Exited(result) => result,
            BoundedOutcome::TimedOut => Err(EvalError::BuildFailure(format!(
                "Image build timed out after {}s",
                self.timeout.as_secs()
            ))),
        };

        if template.needs_submission_image() {
            self.remove_image(&submission_image).await;
        }
        result
    }

    async fn prepare_context(
        &self,
        context: &Path,
        req: &BuildRequest<'_>,
        dockerfile: String,
    ) -> Result<(), EvalError> {
        let context = context.to_path_buf();
        let code_dir = req.code_dir.to_path_buf();
        let pack_dir = req.pack_dir.map(Path::to_path_buf);
        let default_pack = self.default_pack;

        let prepared = tokio::task::spawn_blocking(move || -> Result<(), PackError> {
            copy_tree(&code_dir, &context.join("code"))?;
            let pack = context.join("pack");
            match pack_dir {
                Some(supplied) => {
                    copy_tree(&supplied, &pack)?;
                    ensure_pack_layout(&pack)?;
                }
                None => write_default_pack(&pack, &default_pack)?,
            }
            std::fs::write(context.join("Dockerfile"), dockerfile)?;
            Ok(())
        })
        .await
        .map_err(|e| EvalError::transient("Build context task failed", e))?;

        match prepared {
            Ok(()) => Ok(()),
            Err(e @ PackError::MissingEntrypoint(_)) => Err(EvalError::BuildFailure(e.to_string())),
            Err(PackError::Template(e)) => Err(EvalError::BuildFailure(e.to_string())),
            Err(PackError::Io(e)) => Err(EvalError::transient("Failed to assemble build context", e)),
        }
    }

    /// Remove a built image, logging instead of failing
    pub async fn remove_image(&self, tag: &str) {
        if let Err(e) = self.backend.remove_image(tag).await {
            tracing::warn!(image = tag, error = %e, "Failed to remove image");
        }
    }
}
