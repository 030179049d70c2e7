/// Dockerfile templates
///
/// Every image ends the same way: the challenge harness (tests, config,
/// entrypoint) lives in `/eval` and runs from the image's working directory.
/// Standard templates put the submission in `/app` and work there; an
/// extension keeps whatever `WORKDIR` the submission's own Dockerfile set.
use crate::types::{ProjectInfo, ProjectType};
use handlebars::Handlebars;
use serde_json::json;
use thiserror::Error;

pub const NODE_BASE_IMAGE: &str = "node:20-slim";
pub const PYTHON_BASE_IMAGE: &str = "python:3.11-slim";
pub const GENERIC_BASE_IMAGE: &str = "ubuntu:22.04";

pub const APP_DIR: &str = "/app";
pub const EVAL_DIR: &str = "/eval";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("invalid template: {0}")]
    Template(#[from] handlebars::TemplateError),
    #[error("failed to render Dockerfile: {0}")]
    Render(#[from] handlebars::RenderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PythonInstall {
    Requirements,
    Project,
}

/// Which Dockerfile a submission gets, decided once from [`ProjectInfo`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerfileTemplate {
    /// The submission ships a Dockerfile. It is built first on its own and
    /// the harness is layered on top of the resulting image.
    Extension { submission_image: String },
    Node,
    Python(PythonInstall),
    Generic,
}

impl DockerfileTemplate {
    /// `submission_image` is the tag the submission's own Dockerfile will be
    /// built under; it is only used by the extension template.
    pub fn for_project(info: &ProjectInfo, submission_image: &str) -> Self {
        if info.has_dockerfile {
            return DockerfileTemplate::Extension {
                submission_image: submission_image.to_string(),
            };
        }
        match info.project_type {
            ProjectType::Node => DockerfileTemplate::Node,
            ProjectType::Python => {
                if info.package_files.iter().any(|f| f == "requirements.txt") {
                    DockerfileTemplate::Python(PythonInstall::Requirements)
                } else {
                    DockerfileTemplate::Python(PythonInstall::Project)
                }
            }
            ProjectType::Unknown => DockerfileTemplate::Generic,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DockerfileTemplate::Extension { .. } => "extension",
            DockerfileTemplate::Node => "node",
            DockerfileTemplate::Python(_) => "python",
            DockerfileTemplate::Generic => "generic",
        }
    }

    /// Whether the submission's own Dockerfile must be built first
    pub fn needs_submission_image(&self) -> bool {
        matches!(self, DockerfileTemplate::Extension { .. })
    }
}

const HARNESS_PARTIAL: &str = r#"COPY pack/tests {{eval_dir}}/tests
COPY pack/eval_config.yaml {{eval_dir}}/eval_config.yaml
COPY pack/entrypoint.sh {{eval_dir}}/entrypoint.sh
RUN chmod +x {{eval_dir}}/entrypoint.sh && mkdir -p /results
ENV EVAL_DIR={{eval_dir}} RESULTS_DIR=/results
CMD ["/bin/bash", "{{eval_dir}}/entrypoint.sh"]
"#;

const EXTENSION_TEMPLATE: &str = r#"FROM {{submission_image}} AS submission
USER root
{{> harness}}"#;

const STANDARD_TEMPLATE: &str = r#"FROM {{base_image}}
WORKDIR {{app_dir}}
COPY code/ {{app_dir}}/
{{#each install}}
RUN {{this}}
{{/each}}
{{> harness}}"#;

fn install_steps(template: &DockerfileTemplate) -> Vec<&'static str> {
    match template {
        DockerfileTemplate::Node => vec!["npm install"],
        DockerfileTemplate::Python(PythonInstall::Requirements) => vec![
            "pip install --no-cache-dir -r requirements.txt",
            "pip install --no-cache-dir pytest",
        ],
        DockerfileTemplate::Python(PythonInstall::Project) => vec![
            "pip install --no-cache-dir .",
            "pip install --no-cache-dir pytest",
        ],
        DockerfileTemplate::Generic | DockerfileTemplate::Extension { .. } => Vec::new(),
    }
}

/// Render the Dockerfile text for a template
pub fn render_dockerfile(template: &DockerfileTemplate) -> Result<String, TemplateError> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars.register_partial("harness", HARNESS_PARTIAL)?;

    let rendered = match template {
        DockerfileTemplate::Extension { submission_image } => handlebars.render_template(
            EXTENSION_TEMPLATE,
            &json!({
                "submission_image": submission_image,
                "app_dir": APP_DIR,
                "eval_dir": EVAL_DIR,
            }),
        )?,
        standard => {
            let base_image = match standard {
                DockerfileTemplate::Node => NODE_BASE_IMAGE,
                DockerfileTemplate::Python(_) => PYTHON_BASE_IMAGE,
                _ => GENERIC_BASE_IMAGE,
            };
            handlebars.render_template(
                STANDARD_TEMPLATE,
                &json!({
                    "base_image": base_image,
                    "install": install_steps(standard),
                    "app_dir": APP_DIR,
                    "eval_dir": EVAL_DIR,
                }),
            )?
        }
    };

    Ok(rendered)
}
