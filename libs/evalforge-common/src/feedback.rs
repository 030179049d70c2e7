use crate::types::ScoreBreakdown;

/// Below these a recommendation for the part is emitted
pub const TECHNICAL_RECOMMEND_BELOW: f64 = 25.0;
pub const PRESENTATION_RECOMMEND_BELOW: f64 = 18.0;
pub const INNOVATION_RECOMMEND_BELOW: f64 = 12.0;
pub const USABILITY_RECOMMEND_BELOW: f64 = 10.0;

pub const GENERIC_RECOMMENDATION: &str =
    "Great work! Keep refining your project and consider adding more advanced features.";

fn technical_line(score: f64) -> &'static str {
    if score >= 35.0 {
        "Excellent technical implementation with passing tests and clean code."
    } else if score >= 25.0 {
        "Solid technical implementation with room for more test coverage."
    } else if score >= 15.0 {
        "The project builds, but tests and code quality need attention."
    } else {
        "The project could not be built or evaluated reliably."
    }
}

fn presentation_line(score: f64) -> &'static str {
    if score >= 22.0 {
        "Outstanding presentation with a complete pitch deck and demo video."
    } else if score >= 15.0 {
        "Good presentation materials; a few links are missing or unreachable."
    } else {
        "Presentation materials are missing or incomplete."
    }
}

fn innovation_line(score: f64) -> &'static str {
    if score >= 15.0 {
        "The solution is well documented as an original repository."
    } else if score >= 10.0 {
        "Some originality shows through; make the approach easier to inspect."
    } else {
        "We could not verify the repository behind this solution."
    }
}

fn usability_line(score: f64) -> &'static str {
    if score >= 12.0 {
        "Strong usability with a clear demo and a responsive interface."
    } else if score >= 9.0 {
        "Usable overall; the user experience could be more polished."
    } else {
        "Usability is hard to judge without a working demo or interface."
    }
}

fn closing_line(total: f64) -> &'static str {
    if total >= 85.0 {
        "Overall: an exceptional submission."
    } else if total >= 70.0 {
        "Overall: a strong submission."
    } else if total >= 50.0 {
        "Overall: a promising submission with clear areas to improve."
    } else {
        "Overall: the submission needs significant work."
    }
}

/// One sentence per part followed by a closing line on the total
pub fn build_feedback(breakdown: &ScoreBreakdown) -> String {
    [
        technical_line(breakdown.technical),
        presentation_line(breakdown.presentation),
        innovation_line(breakdown.innovation),
        usability_line(breakdown.usability),
        closing_line(breakdown.total()),
    ]
    .join(" ")
}

pub fn build_recommendations(breakdown: &ScoreBreakdown) -> Vec<String> {
    let mut recommendations = Vec::new();

    if breakdown.technical < TECHNICAL_RECOMMEND_BELOW {
        recommendations.push(
            "Add automated tests, a README and a dependency manifest so the build is reproducible."
                .to_string(),
        );
    }
    if breakdown.presentation < PRESENTATION_RECOMMEND_BELOW {
        recommendations
            .push("Provide a publicly reachable pitch deck and demo video link.".to_string());
    }
    if breakdown.innovation < INNOVATION_RECOMMEND_BELOW {
        recommendations.push("Submit a valid, public repository URL.".to_string());
    }
    if breakdown.usability < USABILITY_RECOMMEND_BELOW {
        recommendations.push(
            "Show the product in use: a demo video and a responsive interface help reviewers."
                .to_string(),
        );
    }

    if recommendations.is_empty() {
        recommendations.push(GENERIC_RECOMMENDATION.to_string());
    }
    recommendations
}
