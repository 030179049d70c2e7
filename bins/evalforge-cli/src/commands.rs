use anyhow::{bail, Context, Result};
use evalforge_common::detector::detect_project;
use evalforge_common::dockerfile::{self, DockerfileTemplate};
use evalforge_common::pack::{write_default_pack, DefaultPackOptions, ENTRYPOINT, SCORE_FILE};
use evalforge_common::scoring::{score_submission, ScoringInput};
use evalforge_common::types::ScoringResult;
use serde_json::{Map, Value};
use std::path::Path;

fn ensure_repo_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        bail!("{} is not a directory", path.display());
    }
    Ok(())
}

/// Detect and print the project type of a checkout
pub async fn detect(path: &Path) -> Result<()> {
    ensure_repo_dir(path)?;
    let info = detect_project(path);

    println!("🔍 Project: {}", path.display());
    println!("  Type:          {}", info.project_type);
    println!("  Dockerfile:    {}", if info.has_dockerfile { "yes" } else { "no" });
    if info.package_files.is_empty() {
        println!("  Package files: none");
    } else {
        println!("  Package files: {}", info.package_files.join(", "));
    }
    Ok(())
}

/// Dockerfile the build engine would render for the checkout at `path`
pub fn dockerfile_for(path: &Path, submission_image: &str) -> Result<(DockerfileTemplate, String)> {
    let info = detect_project(path);
    let template = DockerfileTemplate::for_project(&info, submission_image);
    let rendered = dockerfile::render_dockerfile(&template)
        .with_context(|| format!("Failed to render {} template", template.name()))?;
    Ok((template, rendered))
}

pub async fn render_dockerfile(path: &Path, submission_image: &str) -> Result<()> {
    ensure_repo_dir(path)?;
    let (template, rendered) = dockerfile_for(path, submission_image)?;

    eprintln!("# template: {}", template.name());
    if template.needs_submission_image() {
        eprintln!(
            "# the submission's own Dockerfile is built first as {}",
            submission_image
        );
    }
    print!("{}", rendered);
    Ok(())
}

/// Write the default challenge pack into `dir`
pub async fn init_pack(dir: &Path, time_box_secs: u64, oversized_lines: u64, force: bool) -> Result<()> {
    let entrypoint = dir.join(ENTRYPOINT);
    if tokio::fs::try_exists(&entrypoint).await.unwrap_or(false) && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            entrypoint.display()
        );
    }

    let options = DefaultPackOptions {
        time_box_secs,
        oversized_lines,
    };
    println!("📦 Writing default challenge pack to {}...", dir.display());
    write_default_pack(dir, &options)
        .with_context(|| format!("Failed to write challenge pack to {}", dir.display()))?;

    println!("✅ Challenge pack ready");
    println!("\n📋 Layout:");
    println!("  {}/tests/", dir.display());
    println!("  {}/eval_config.yaml", dir.display());
    println!("  {}/{}", dir.display(), ENTRYPOINT);
    println!("\n💡 The entrypoint writes /results/{} inside the sandbox", SCORE_FILE);
    Ok(())
}

/// Parse a `score.json` artifact; it must be a JSON object
pub fn parse_artifact(raw: &str) -> Result<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw).context("Artifact is not valid JSON")? {
        Value::Object(results) => Ok(results),
        _ => bail!("Artifact must be a JSON object"),
    }
}

pub async fn score(
    artifact: &Path,
    build_success: bool,
    repo_url: &str,
    pitch_deck_url: &str,
    demo_video_url: &str,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(artifact)
        .await
        .with_context(|| format!("Failed to read {}", artifact.display()))?;
    let results = parse_artifact(&raw)?;

    let scoring = score_submission(&ScoringInput {
        build_success,
        test_results: &results,
        repo_url,
        pitch_deck_url,
        demo_video_url,
    });
    print_scoring(&scoring);
    Ok(())
}

fn print_scoring(scoring: &ScoringResult) {
    let b = &scoring.breakdown;
    println!("📊 Score: {:.1} / 100\n", scoring.total_score);
    println!("{:<14} {:>6}", "Part", "Score");
    println!("{}", "─".repeat(21));
    println!("{:<14} {:>6.1}", "technical", b.technical);
    println!("{:<14} {:>6.1}", "presentation", b.presentation);
    println!("{:<14} {:>6.1}", "innovation", b.innovation);
    println!("{:<14} {:>6.1}", "usability", b.usability);
    println!("\n{}", scoring.feedback);
    if !scoring.recommendations.is_empty() {
        println!("\n📋 Recommendations:");
        for rec in &scoring.recommendations {
            println!("  - {}", rec);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_dockerfile_for_python_requirements() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "flask\n").unwrap();

        let (template, rendered) = dockerfile_for(dir.path(), "img-base").unwrap();
        assert_eq!(template.name(), "python");
        assert!(rendered.contains("requirements.txt"));
        assert!(rendered.contains("entrypoint.sh"));
    }

    #[test]
    fn test_dockerfile_for_own_dockerfile_extends_base() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM alpine\n").unwrap();

        let (template, rendered) = dockerfile_for(dir.path(), "img-base").unwrap();
        assert!(template.needs_submission_image());
        assert!(rendered.contains("FROM img-base"));
    }

    #[test]
    fn test_parse_artifact() {
        let results = parse_artifact(r#"{"totalScore": 70, "testsPass": true}"#).unwrap();
        assert_eq!(results["totalScore"], 70);
        assert!(parse_artifact("[1]").is_err());
        assert!(parse_artifact("not json").is_err());
    }

    #[tokio::test]
    async fn test_init_pack_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        init_pack(dir.path(), 300, 500, false).await.unwrap();
        assert!(dir.path().join(ENTRYPOINT).is_file());
        assert!(dir.path().join("tests").is_dir());

        assert!(init_pack(dir.path(), 300, 500, false).await.is_err());
        init_pack(dir.path(), 60, 500, true).await.unwrap();
    }
}
