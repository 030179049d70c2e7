/// Project type detection
///
/// Looks only at the repository root. The answer drives the Dockerfile
/// template, so it is computed once per job and never raised as an error:
/// an unreadable checkout degrades to `Unknown`.
use crate::types::{ProjectInfo, ProjectType};
use std::collections::HashSet;
use std::path::Path;

/// Manifests we recognise, in reporting order
pub const MANIFESTS: [&str; 3] = ["package.json", "requirements.txt", "pyproject.toml"];

pub fn detect_project(repo_root: &Path) -> ProjectInfo {
    let entries = match std::fs::read_dir(repo_root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = %repo_root.display(), error = %e, "Project detection failed");
            return ProjectInfo::unknown();
        }
    };

    let mut names = HashSet::new();
    for entry in entries {
        match entry {
            Ok(entry) => {
                names.insert(entry.file_name().to_string_lossy().into_owned());
            }
            Err(e) => {
                tracing::warn!(path = %repo_root.display(), error = %e, "Project detection failed");
                return ProjectInfo::unknown();
            }
        }
    }

    classify(&names)
}

fn classify(names: &HashSet<String>) -> ProjectInfo {
    let package_files: Vec<String> = MANIFESTS
        .iter()
        .filter(|m| names.contains(**m))
        .map(|m| m.to_string())
        .collect();

    let project_type = if names.contains("package.json") {
        ProjectType::Node
    } else if names.contains("requirements.txt") || names.contains("pyproject.toml") {
        ProjectType::Python
    } else {
        ProjectType::Unknown
    };

    ProjectInfo {
        project_type,
        has_dockerfile: names.contains("Dockerfile"),
        package_files,
    }
}
