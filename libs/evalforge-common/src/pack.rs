/// Challenge packs
///
/// A pack is what the image runs against the submission:
///
/// ```text
/// pack/
///   tests/              challenge tests (may be empty)
///   eval_config.yaml    free-form config read by the entrypoint
///   entrypoint.sh       writes /results/score.json
/// ```
///
/// When a challenge ships no pack, a default one is synthesised here. Its
/// scoring is a weak heuristic and only meant as a fallback.
use crate::dockerfile::TemplateError;
use handlebars::Handlebars;
use serde_json::json;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENTRYPOINT: &str = "entrypoint.sh";
pub const EVAL_CONFIG: &str = "eval_config.yaml";
pub const TESTS_DIR: &str = "tests";
pub const RESULTS_DIR: &str = "/results";
pub const SCORE_FILE: &str = "score.json";

#[derive(Debug, Error)]
pub enum PackError {
    #[error("challenge pack has no entrypoint.sh at {}", .0.display())]
    MissingEntrypoint(PathBuf),
    #[error("challenge pack I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultPackOptions {
    /// Internal time box for the test command, in seconds
    pub time_box_secs: u64,
    /// Source files longer than this count against code quality
    pub oversized_lines: u64,
}

impl Default for DefaultPackOptions {
    fn default() -> Self {
        Self {
            time_box_secs: 300,
            oversized_lines: 500,
        }
    }
}

const ENTRYPOINT_TEMPLATE: &str = r#"#!/usr/bin/env bash
# Default evaluation harness. Every check is best effort.
set -u

# The image working directory holds the submission unless APP_DIR says otherwise
APP_DIR="${APP_DIR:-$PWD}"
RESULTS_FILE="{{results_dir}}/{{score_file}}"
TIME_BOX={{time_box_secs}}
OVERSIZED_LINES={{oversized_lines}}

mkdir -p "{{results_dir}}"
cd "$APP_DIR" || exit 1

has_readme=false
if compgen -G 'README*' >/dev/null || compgen -G 'readme*' >/dev/null; then has_readme=true; fi

has_tests=false
if [ -d tests ] || [ -d test ] || [ -d __tests__ ] || [ -d spec ]; then has_tests=true; fi

has_deps=false
if [ -f package.json ] || [ -f requirements.txt ] || [ -f pyproject.toml ]; then has_deps=true; fi

has_dockerfile=false
if [ -f Dockerfile ]; then has_dockerfile=true; fi

follows_structure=false
if [ -d src ] || [ -d lib ] || [ -d app ]; then follows_structure=true; fi

has_ui=false
if find . -path ./node_modules -prune -o -type f \( -name '*.html' -o -name '*.jsx' -o -name '*.tsx' -o -name '*.vue' -o -name '*.css' \) -print 2>/dev/null | grep -q .; then
  has_ui=true
fi

responsive=false
if [ "$has_ui" = true ] && grep -rqsE '@media|viewport' --include='*.css' --include='*.scss' --include='*.html' --exclude-dir=node_modules .; then
  responsive=true
fi

tests_ran=false
test_status=1
test_output=""
if [ -f package.json ] && grep -q '"test"' package.json; then
  tests_ran=true
  test_output=$(timeout "$TIME_BOX" npm test 2>&1)
  test_status=$?
elif [ "$has_tests" = true ] && command -v pytest >/dev/null 2>&1; then
  tests_ran=true
  test_output=$(timeout "$TIME_BOX" pytest -q 2>&1)
  test_status=$?
fi
printf '%s\n' "$test_output"

count_marker() {
  printf '%s\n' "$test_output" | grep -oE "[0-9]+ ($1)" | grep -oE '^[0-9]+' | awk '{ s += $1 } END { print s + 0 }'
}
passed=$(count_marker 'passed|passing')
failed=$(count_marker 'failed|failing')

tests_pass=null
if [ "$tests_ran" = true ]; then
  if [ "$test_status" -eq 0 ] && [ "$failed" -eq 0 ]; then tests_pass=true; else tests_pass=false; fi
fi

file_count=0
oversized=0
total_lines=0
comment_lines=0
while IFS= read -r f; do
  [ -z "$f" ] && continue
  file_count=$((file_count + 1))
  lines=$(wc -l < "$f")
  total_lines=$((total_lines + lines))
  if [ "$lines" -gt "$OVERSIZED_LINES" ]; then oversized=$((oversized + 1)); fi
  c=$(grep -cE '^[[:space:]]*(#|//|/\*|\*)' "$f")
  comment_lines=$((comment_lines + c))
done <<< "$(find . -path ./node_modules -prune -o -path ./.git -prune -o -type f \( -name '*.js' -o -name '*.ts' -o -name '*.jsx' -o -name '*.tsx' -o -name '*.py' \) -print 2>/dev/null)"

quality=8
if [ "$file_count" -eq 0 ]; then quality=2; fi
if [ "$file_count" -ge 5 ]; then quality=$((quality + 2)); fi
quality=$((quality - oversized * 2))
if [ "$total_lines" -gt 0 ]; then
  density=$((comment_lines * 100 / total_lines))
  if [ "$density" -ge 10 ]; then quality=$((quality + 3)); elif [ "$density" -ge 5 ]; then quality=$((quality + 1)); fi
fi
if [ "$quality" -lt 0 ]; then quality=0; fi
if [ "$quality" -gt 15 ]; then quality=15; fi

ux=0
if [ "$has_readme" = true ]; then ux=$((ux + 2)); fi
if [ "$has_ui" = true ]; then ux=$((ux + 2)); fi
if [ "$responsive" = true ]; then ux=$((ux + 1)); fi

points() { if [ "$1" = true ]; then echo "$2"; else echo 0; fi; }
total=0
if [ "$tests_pass" = true ]; then total=40; elif [ "$tests_pass" = false ]; then total=10; fi
total=$((total + $(points "$has_readme" 10) + $(points "$has_tests" 10) + $(points "$has_deps" 10)))
total=$((total + $(points "$has_dockerfile" 5) + $(points "$follows_structure" 5) + quality + ux))
if [ "$total" -gt 100 ]; then total=100; fi

cat > "$RESULTS_FILE" <<EOF
{
  "totalScore": $total,
  "testsPass": $tests_pass,
  "testsCovered": $passed,
  "testsFailed": $failed,
  "hasReadme": $has_readme,
  "hasTests": $has_tests,
  "hasDependencies": $has_deps,
  "hasDockerfile": $has_dockerfile,
  "followsProjectStructure": $follows_structure,
  "hasUserInterface": $has_ui,
  "responsiveDesign": $responsive,
  "codeQuality": { "score": $quality, "files": $file_count, "oversizedFiles": $oversized },
  "userExperience": { "score": $ux }
}
EOF
exit 0
"#;

const EVAL_CONFIG_TEMPLATE: &str = r#"# Generated default challenge pack
name: default
timeBoxSeconds: {{time_box_secs}}
oversizedFileLines: {{oversized_lines}}
results: {{results_dir}}/{{score_file}}
"#;

fn render(template: &str, options: &DefaultPackOptions) -> Result<String, TemplateError> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(handlebars::no_escape);

    let data = json!({
        "results_dir": RESULTS_DIR,
        "score_file": SCORE_FILE,
        "time_box_secs": options.time_box_secs,
        "oversized_lines": options.oversized_lines,
    });
    Ok(handlebars.render_template(template, &data)?)
}

pub fn render_entrypoint(options: &DefaultPackOptions) -> Result<String, TemplateError> {
    render(ENTRYPOINT_TEMPLATE, options)
}

/// Write the default pack into `pack_dir`, creating it if needed
pub fn write_default_pack(pack_dir: &Path, options: &DefaultPackOptions) -> Result<(), PackError> {
    fs::create_dir_all(pack_dir.join(TESTS_DIR))?;
    fs::write(pack_dir.join(ENTRYPOINT), render_entrypoint(options)?)?;
    fs::write(pack_dir.join(EVAL_CONFIG), render(EVAL_CONFIG_TEMPLATE, options)?)?;
    Ok(())
}

/// Make a supplied pack satisfy the build context layout
///
/// Missing `tests/` and `eval_config.yaml` are replaced by empty
/// placeholders. A missing entrypoint cannot be papered over.
pub fn ensure_pack_layout(pack_dir: &Path) -> Result<(), PackError> {
    if !pack_dir.join(ENTRYPOINT).is_file() {
        return Err(PackError::MissingEntrypoint(pack_dir.to_path_buf()));
    }
    let tests = pack_dir.join(TESTS_DIR);
    if !tests.is_dir() {
        fs::create_dir_all(&tests)?;
    }
    let config = pack_dir.join(EVAL_CONFIG);
    if !config.is_file() {
        fs::write(&config, "")?;
    }
    Ok(())
}

/// Locate the pack root inside an extracted archive or clone
///
/// Archives often wrap everything in a single top-level directory, so the
/// first directory (breadth first) holding an entrypoint wins.
pub fn find_pack_root(extracted: &Path) -> Option<PathBuf> {
    let mut frontier = vec![extracted.to_path_buf()];
    for _depth in 0..3 {
        let mut next = Vec::new();
        for dir in frontier {
            if dir.join(ENTRYPOINT).is_file() {
                return Some(dir);
            }
            if let Ok(entries) = fs::read_dir(&dir) {
                let mut children: Vec<PathBuf> = entries
                    .filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| p.is_dir())
                    .filter(|p| p.file_name().map_or(true, |n| n != ".git"))
                    .collect();
                children.sort();
                next.extend(children);
            }
        }
        frontier = next;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_pack_layout() {
        let dir = TempDir::new().unwrap();
        let pack = dir.path().join("pack");
        write_default_pack(&pack, &DefaultPackOptions::default()).unwrap();

        assert!(pack.join("tests").is_dir());
        assert!(pack.join("entrypoint.sh").is_file());
        let config = fs::read_to_string(pack.join("eval_config.yaml")).unwrap();
        assert!(config.contains("timeBoxSeconds: 300"));
        assert!(config.contains("results: /results/score.json"));
    }

    #[test]
    fn test_entrypoint_renders_limits_and_fields() {
        let script = render_entrypoint(&DefaultPackOptions {
            time_box_secs: 120,
            oversized_lines: 800,
        })
        .unwrap();

        assert!(script.starts_with("#!/usr/bin/env bash"));
        assert!(script.contains("TIME_BOX=120"));
        assert!(script.contains("OVERSIZED_LINES=800"));
        assert!(script.contains("RESULTS_FILE=\"/results/score.json\""));
        assert!(script.contains("APP_DIR=\"${APP_DIR:-$PWD}\""));
        assert!(script.contains("timeout \"$TIME_BOX\" npm test"));
        assert!(script.contains("timeout \"$TIME_BOX\" pytest"));
        for field in [
            "totalScore",
            "testsPass",
            "testsCovered",
            "hasReadme",
            "hasTests",
            "hasDependencies",
            "hasDockerfile",
            "followsProjectStructure",
            "hasUserInterface",
            "responsiveDesign",
            "codeQuality",
            "userExperience",
        ] {
            assert!(script.contains(&format!("\"{}\"", field)), "missing {}", field);
        }
    }

    /// Run the rendered entrypoint on `repo`, writing into `results`
    #[cfg(unix)]
    fn run_entrypoint(repo: &Path, results: &Path) -> serde_json::Value {
        let script = render_entrypoint(&DefaultPackOptions::default())
            .unwrap()
            .replace(RESULTS_DIR, &results.display().to_string());
        let script_path = results.join("entrypoint.sh");
        fs::write(&script_path, script).unwrap();

        let status = std::process::Command::new("bash")
            .arg(&script_path)
            .current_dir(repo)
            .env_remove("APP_DIR")
            .stdout(std::process::Stdio::null())
            .status()
            .unwrap();
        assert!(status.success());

        let raw = fs::read_to_string(results.join(SCORE_FILE)).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[cfg(unix)]
    #[test]
    fn test_entrypoint_scores_a_python_checkout() {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("repo");
        let results = dir.path().join("results");
        fs::create_dir_all(repo.join("src")).unwrap();
        fs::create_dir_all(&results).unwrap();
        fs::write(repo.join("README.md"), "# Demo\n").unwrap();
        fs::write(repo.join("requirements.txt"), "flask\n").unwrap();
        fs::write(repo.join("src/app.py"), "# entry\nprint('hi')\n").unwrap();

        let score = run_entrypoint(&repo, &results);

        assert_eq!(score["hasReadme"], true);
        assert_eq!(score["hasDependencies"], true);
        assert_eq!(score["followsProjectStructure"], true);
        assert_eq!(score["hasTests"], false);
        assert!(score["testsPass"].is_null());
        assert_eq!(score["codeQuality"]["files"], 1);
        assert_eq!(score["userExperience"]["score"], 2);
        // readme 10 + deps 10 + structure 5 + quality + ux 2
        let quality = score["codeQuality"]["score"].as_i64().unwrap();
        assert_eq!(score["totalScore"].as_i64().unwrap(), 27 + quality);
    }

    #[cfg(unix)]
    #[test]
    fn test_entrypoint_finds_lowercase_readme() {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("repo");
        let results = dir.path().join("results");
        fs::create_dir_all(&repo).unwrap();
        fs::create_dir_all(&results).unwrap();
        fs::write(repo.join("readme.txt"), "notes\n").unwrap();

        let score = run_entrypoint(&repo, &results);
        assert_eq!(score["hasReadme"], true);

        fs::remove_file(repo.join("readme.txt")).unwrap();
        let score = run_entrypoint(&repo, &results);
        assert_eq!(score["hasReadme"], false);
    }

    #[test]
    fn test_supplied_pack_gets_placeholders() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("entrypoint.sh"), "#!/bin/bash\n").unwrap();

        ensure_pack_layout(dir.path()).unwrap();

        assert!(dir.path().join("tests").is_dir());
        assert_eq!(fs::read_to_string(dir.path().join("eval_config.yaml")).unwrap(), "");
    }

    #[test]
    fn test_supplied_pack_keeps_existing_config() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("entrypoint.sh"), "#!/bin/bash\n").unwrap();
        fs::write(dir.path().join("eval_config.yaml"), "name: custom\n").unwrap();

        ensure_pack_layout(dir.path()).unwrap();

        assert_eq!(
            fs::read_to_string(dir.path().join("eval_config.yaml")).unwrap(),
            "name: custom\n"
        );
    }

    #[test]
    fn test_pack_without_entrypoint_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("tests")).unwrap();
        let err = ensure_pack_layout(dir.path()).unwrap_err();
        assert!(matches!(err, PackError::MissingEntrypoint(_)));
    }

    #[test]
    fn test_find_pack_root_descends_into_wrapper_dir() {
        let dir = TempDir::new().unwrap();
        let wrapped = dir.path().join("challenge-pack-main");
        fs::create_dir_all(&wrapped).unwrap();
        fs::write(wrapped.join("entrypoint.sh"), "").unwrap();

        assert_eq!(find_pack_root(dir.path()), Some(wrapped));
    }

    #[test]
    fn test_find_pack_root_none_when_absent() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        assert_eq!(find_pack_root(dir.path()), None);
    }
}
