/// Scoring Engine
///
/// Turns a build flag, the sandbox artifact and the submission links into a
/// bounded four-part score. Everything here is pure; the constants are the
/// published rubric and are kept as literal values.
///
/// | Part         | Ceiling |
/// |--------------|---------|
/// | technical    | 40      |
/// | presentation | 25      |
/// | innovation   | 20      |
/// | usability    | 15      |
use crate::feedback::{build_feedback, build_recommendations};
use crate::types::{ScoreBreakdown, ScoringResult};
use reqwest::Url;
use serde_json::{Map, Value};

pub const TECHNICAL_MAX: f64 = 40.0;
pub const PRESENTATION_MAX: f64 = 25.0;
pub const INNOVATION_MAX: f64 = 20.0;
pub const USABILITY_MAX: f64 = 15.0;

pub const TECHNICAL_BUILD_FAILED: f64 = 5.0;
pub const TECHNICAL_BASE: f64 = 15.0;
pub const TESTS_PASS_MAX: f64 = 20.0;
pub const TESTS_PASS_PER_TEST: f64 = 2.0;
pub const TESTS_RAN_BONUS: f64 = 5.0;
pub const CODE_QUALITY_MAX: f64 = 15.0;
pub const CODE_QUALITY_DEFAULT: f64 = 8.0;
pub const README_BONUS: f64 = 2.0;
pub const TESTS_DIR_BONUS: f64 = 3.0;
pub const MANIFEST_BONUS: f64 = 2.0;
pub const STRUCTURE_BONUS: f64 = 3.0;

pub const PRESENTATION_BASE: f64 = 5.0;
pub const PITCH_DECK_VALID: f64 = 12.0;
pub const PITCH_DECK_PRESENT: f64 = 5.0;
pub const DEMO_VIDEO_VALID: f64 = 8.0;
pub const DEMO_VIDEO_PRESENT: f64 = 3.0;
pub const BOTH_LINKS_BONUS: f64 = 5.0;

pub const INNOVATION_NO_REPO: f64 = 5.0;
pub const INNOVATION_BASE: f64 = 8.0;
pub const INNOVATION_REPO_BONUS: f64 = 7.0;

pub const USABILITY_BASE: f64 = 6.0;
pub const USABILITY_DEMO_VALID: f64 = 6.0;
pub const USABILITY_DEMO_PRESENT: f64 = 2.0;
pub const USER_EXPERIENCE_MAX: f64 = 5.0;
pub const UI_BONUS: f64 = 2.0;
pub const RESPONSIVE_BONUS: f64 = 1.0;

/// Everything the scorer looks at for one submission
#[derive(Debug, Clone, Copy)]
pub struct ScoringInput<'a> {
    pub build_success: bool,
    pub test_results: &'a Map<String, Value>,
    pub repo_url: &'a str,
    pub pitch_deck_url: &'a str,
    pub demo_video_url: &'a str,
}

/// Absolute URL with a non-empty host. The empty string is never valid.
pub fn is_valid_url(raw: &str) -> bool {
    let raw = raw.trim();
    if raw.is_empty() {
        return false;
    }
    match Url::parse(raw) {
        Ok(url) => url.host_str().map_or(false, |h| !h.is_empty()),
        Err(_) => false,
    }
}

/// A valid URL the worker may hand to git or reqwest
pub fn is_http_url(raw: &str) -> bool {
    is_valid_url(raw)
        && Url::parse(raw.trim()).map_or(false, |url| matches!(url.scheme(), "http" | "https"))
}

fn clamp(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.max(0.0).min(max)
}

fn flag(results: &Map<String, Value>, key: &str) -> bool {
    results.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// `results[key].score` as a number, if present
fn nested_score(results: &Map<String, Value>, key: &str) -> Option<f64> {
    results.get(key)?.get("score")?.as_f64()
}

pub fn technical_score(build_success: bool, results: &Map<String, Value>) -> f64 {
    if !build_success {
        return TECHNICAL_BUILD_FAILED;
    }

    let mut score = TECHNICAL_BASE;

    match results.get("testsPass").and_then(Value::as_bool) {
        Some(true) => {
            let covered = results
                .get("testsCovered")
                .and_then(Value::as_f64)
                .unwrap_or(0.0)
                .max(0.0);
            score += (covered * TESTS_PASS_PER_TEST).min(TESTS_PASS_MAX);
        }
        Some(false) => score += TESTS_RAN_BONUS,
        None => {}
    }

    let quality = nested_score(results, "codeQuality").unwrap_or(CODE_QUALITY_DEFAULT);
    score += clamp(quality, CODE_QUALITY_MAX);

    if flag(results, "hasReadme") {
        score += README_BONUS;
    }
    if flag(results, "hasTests") {
        score += TESTS_DIR_BONUS;
    }
    if flag(results, "hasDependencies") {
        score += MANIFEST_BONUS;
    }
    if flag(results, "followsProjectStructure") {
        score += STRUCTURE_BONUS;
    }

    clamp(score, TECHNICAL_MAX)
}

pub fn presentation_score(pitch_deck_url: &str, demo_video_url: &str) -> f64 {
    let deck_valid = is_valid_url(pitch_deck_url);
    let demo_valid = is_valid_url(demo_video_url);
    let mut score = PRESENTATION_BASE;

    if deck_valid {
        score += PITCH_DECK_VALID;
    } else if !pitch_deck_url.trim().is_empty() {
        score += PITCH_DECK_PRESENT;
    }

    if demo_valid {
        score += DEMO_VIDEO_VALID;
    } else if !demo_video_url.trim().is_empty() {
        score += DEMO_VIDEO_PRESENT;
    }

    if deck_valid && demo_valid {
        score += BOTH_LINKS_BONUS;
    }

    clamp(score, PRESENTATION_MAX)
}

pub fn innovation_score(repo_url: &str) -> f64 {
    if !is_valid_url(repo_url) {
        return INNOVATION_NO_REPO;
    }
    clamp(INNOVATION_BASE + INNOVATION_REPO_BONUS, INNOVATION_MAX)
}

pub fn usability_score(demo_video_url: &str, results: &Map<String, Value>) -> f64 {
    let mut score = USABILITY_BASE;

    if is_valid_url(demo_video_url) {
        score += USABILITY_DEMO_VALID;
    } else if !demo_video_url.trim().is_empty() {
        score += USABILITY_DEMO_PRESENT;
    }

    let ux = nested_score(results, "userExperience").unwrap_or(0.0);
    score += clamp(ux, USER_EXPERIENCE_MAX);

    if flag(results, "hasUserInterface") {
        score += UI_BONUS;
    }
    if flag(results, "responsiveDesign") {
        score += RESPONSIVE_BONUS;
    }

    clamp(score, USABILITY_MAX)
}

pub fn breakdown(input: &ScoringInput<'_>) -> ScoreBreakdown {
    ScoreBreakdown {
        technical: technical_score(input.build_success, input.test_results),
        presentation: presentation_score(input.pitch_deck_url, input.demo_video_url),
        innovation: innovation_score(input.repo_url),
        usability: usability_score(input.demo_video_url, input.test_results),
    }
}

/// Full score with feedback and recommendations
pub fn score_submission(input: &ScoringInput<'_>) -> ScoringResult {
    let breakdown = breakdown(input);
    let total_score = breakdown.total();

    ScoringResult {
        total_score,
        feedback: build_feedback(&breakdown),
        recommendations: build_recommendations(&breakdown),
        breakdown,
    }
}
