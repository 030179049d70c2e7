/// Queue policy
///
/// Pure decisions the API and workers share:
/// - which priority a job gets at enqueue time
/// - how long a failed attempt waits before it is retried
/// - whether an attempt ends in the completed or the failed history
///
/// Nothing here touches Redis; the callers apply the decisions.
use crate::types::Priority;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("invalid deadline '{0}': expected an RFC 3339 timestamp")]
    InvalidDeadline(String),
}

/// Parse a challenge deadline as sent on the enqueue payload
pub fn parse_deadline(raw: &str) -> Result<DateTime<Utc>, PolicyError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| PolicyError::InvalidDeadline(raw.to_string()))
}

/// Priority from time remaining until the challenge deadline
///
/// Evaluated once at enqueue; a queued job keeps its priority even if the
/// deadline draws closer. A deadline that already passed counts as urgent.
pub fn priority_for_deadline(deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Priority {
    let Some(deadline) = deadline else {
        return Priority::Low;
    };

    let remaining = deadline - now;
    if remaining < ChronoDuration::days(1) {
        Priority::Critical
    } else if remaining < ChronoDuration::days(3) {
        Priority::High
    } else if remaining < ChronoDuration::days(7) {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// Delay before the next attempt: `base × 2^(attempts_made - 1)`
pub fn retry_delay(attempts_made: u8, base_ms: u64) -> Duration {
    let exponent = attempts_made.saturating_sub(1).min(16) as u32;
    Duration::from_millis(base_ms.saturating_mul(1u64 << exponent))
}

/// How an attempt ended, as far as the queue cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// A terminal result was persisted (SCORED or REJECTED)
    Finished,
    /// Infrastructure trouble; the same job may succeed later
    Transient(String),
    /// Nothing a retry can fix
    Fatal(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Retry { delay: Duration },
    Failed { reason: String },
}

/// Decide what happens to a job after an attempt
pub fn next_disposition(
    outcome: &AttemptOutcome,
    attempts_made: u8,
    max_attempts: u8,
    backoff_base_ms: u64,
) -> Disposition {
    match outcome {
        AttemptOutcome::Finished => Disposition::Completed,
        AttemptOutcome::Transient(reason) if attempts_made >= max_attempts => Disposition::Failed {
            reason: format!("{} (after {} attempts)", reason, attempts_made),
        },
        AttemptOutcome::Transient(_) => Disposition::Retry {
            delay: retry_delay(attempts_made, backoff_base_ms),
        },
        AttemptOutcome::Fatal(reason) => Disposition::Failed {
            reason: reason.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_priority_tiers() {
        let now = now();
        let at = |hours: i64| Some(now + ChronoDuration::hours(hours));

        assert_eq!(priority_for_deadline(at(5), now), Priority::Critical);
        assert_eq!(priority_for_deadline(at(24), now), Priority::High);
        assert_eq!(priority_for_deadline(at(71), now), Priority::High);
        assert_eq!(priority_for_deadline(at(72), now), Priority::Medium);
        assert_eq!(priority_for_deadline(at(24 * 7), now), Priority::Low);
        assert_eq!(priority_for_deadline(None, now), Priority::Low);
    }

    #[test]
    fn test_past_deadline_is_critical() {
        let now = now();
        let past = Some(now - ChronoDuration::hours(2));
        assert_eq!(priority_for_deadline(past, now), Priority::Critical);
    }

    #[test]
    fn test_parse_deadline() {
        let parsed = parse_deadline("2025-03-02T12:00:00Z").unwrap();
        assert_eq!(priority_for_deadline(Some(parsed), now()), Priority::High);
        assert_eq!(
            parse_deadline("next friday"),
            Err(PolicyError::InvalidDeadline("next friday".to_string()))
        );
    }

    #[test]
    fn test_retry_delay_doubles() {
        assert_eq!(retry_delay(1, 2000), Duration::from_secs(2));
        assert_eq!(retry_delay(2, 2000), Duration::from_secs(4));
        assert_eq!(retry_delay(3, 2000), Duration::from_secs(8));
    }

    #[test]
    fn test_transient_failure_retries_until_exhausted() {
        let outcome = AttemptOutcome::Transient("docker unavailable".to_string());

        assert_eq!(
            next_disposition(&outcome, 1, 3, 2000),
            Disposition::Retry {
                delay: Duration::from_secs(2)
            }
        );
        assert_eq!(
            next_disposition(&outcome, 2, 3, 2000),
            Disposition::Retry {
                delay: Duration::from_secs(4)
            }
        );
        match next_disposition(&outcome, 3, 3, 2000) {
            Disposition::Failed { reason } => assert!(reason.contains("after 3 attempts")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_finished_and_fatal_never_retry() {
        assert_eq!(
            next_disposition(&AttemptOutcome::Finished, 1, 3, 2000),
            Disposition::Completed
        );
        assert_eq!(
            next_disposition(&AttemptOutcome::Fatal("gone".to_string()), 1, 3, 2000),
            Disposition::Failed {
                reason: "gone".to_string()
            }
        );
    }
}
