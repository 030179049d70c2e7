use thiserror::Error;

/// Everything that can end an evaluation stage early
///
/// Only `TransientInfra` is worth retrying. The other kinds describe the
/// submission itself and would fail the same way again.
#[derive(Debug, Error)]
pub enum EvalError {
    /// Clone, spawn, network or Docker API trouble
    #[error("{0}")]
    TransientInfra(String),
    /// The image could not be built from the submission
    #[error("{0}")]
    BuildFailure(String),
    /// The sandboxed run did not produce a usable artifact
    #[error("{0}")]
    SandboxFailure(String),
    /// The job refers to state that does not exist
    #[error("{0}")]
    DataIntegrity(String),
}

impl EvalError {
    pub fn transient(context: &str, err: impl std::fmt::Display) -> Self {
        EvalError::TransientInfra(format!("{}: {}", context, err))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EvalError::TransientInfra(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::TransientInfra(_) => "transient_infra",
            EvalError::BuildFailure(_) => "build_failure",
            EvalError::SandboxFailure(_) => "sandbox_failure",
            EvalError::DataIntegrity(_) => "data_integrity",
        }
    }

    /// Feedback line shown to the submitter for a rejected attempt
    pub fn feedback(&self) -> String {
        match self {
            EvalError::BuildFailure(msg) => format!("Build failed: {}", msg),
            other => format!("Evaluation error: {}", other),
        }
    }
}
