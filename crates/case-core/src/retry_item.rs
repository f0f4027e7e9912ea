//! Durable retry-queue entries for the submission engine.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A durable retry-queue entry for a submission that failed transiently.
///
/// Survives process restart: the submitter's retry sweep claims items with
/// `next_attempt_at <= now` using a claim-with-visibility-timeout pattern so
/// two workers never retry the same item concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RetryItem {
    /// The case this retry belongs to.
    pub case_id: Uuid,
    /// The submission payload to retry, opaque to the retry queue itself.
    pub payload: serde_json::Value,
    /// Number of attempts made so far, including the initial attempt.
    pub attempt_count: u32,
    /// When this item becomes eligible for another attempt.
    pub next_attempt_at: DateTime<Utc>,
    /// The error message from the most recent failed attempt.
    pub last_error: String,
}

impl RetryItem {
    /// Builds the first retry entry for a case after its initial attempt
    /// failed transiently.
    pub fn first_attempt(
        case_id: Uuid,
        payload: serde_json::Value,
        next_attempt_at: DateTime<Utc>,
        last_error: impl Into<String>,
    ) -> Self {
        Self {
            case_id,
            payload,
            attempt_count: 1,
            next_attempt_at,
            last_error: last_error.into(),
        }
    }

    /// Records another failed attempt, incrementing `attempt_count` and
    /// updating the next eligible time and error message.
    pub fn record_failure(&mut self, next_attempt_at: DateTime<Utc>, last_error: impl Into<String>) {
        self.attempt_count += 1;
        self.next_attempt_at = next_attempt_at;
        self.last_error = last_error.into();
    }

    /// `true` once `attempt_count` has reached `max_attempts`.
    pub fn is_exhausted(&self, max_attempts: u32) -> bool {
        self.attempt_count >= max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_starts_at_count_one() {
        let item = RetryItem::first_attempt(Uuid::nil(), serde_json::json!({}), Utc::now(), "503");
        assert_eq!(item.attempt_count, 1);
        assert!(!item.is_exhausted(5));
    }

    #[test]
    fn record_failure_increments_and_updates() {
        let mut item = RetryItem::first_attempt(Uuid::nil(), serde_json::json!({}), Utc::now(), "503");
        let later = Utc::now();
        item.record_failure(later, "504");
        assert_eq!(item.attempt_count, 2);
        assert_eq!(item.last_error, "504");
        assert_eq!(item.next_attempt_at, later);
    }

    #[test]
    fn exhaustion_triggers_at_max_attempts() {
        let mut item = RetryItem::first_attempt(Uuid::nil(), serde_json::json!({}), Utc::now(), "503");
        for _ in 0..4 {
            item.record_failure(Utc::now(), "503");
        }
        assert_eq!(item.attempt_count, 5);
        assert!(item.is_exhausted(5));
    }
}
