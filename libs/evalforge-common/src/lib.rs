pub mod config;
pub mod detector;
pub mod dockerfile;
pub mod feedback;
pub mod pack;
pub mod policy;
pub mod redis;
pub mod scoring;
pub mod types;

// Re-export commonly used types for convenience
pub use config::Config;
pub use types::{
    BuildResult, EvaluationJob, EvaluationResult, Priority, ProjectInfo, ProjectType,
    QueuedJob, ScoringResult, SubmissionStatus, TestResult,
};
