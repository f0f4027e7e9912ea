//! The append-only, gap-free, per-case audit event log.

use std::collections::BTreeMap;
use std::sync::Mutex;

use case_core::AuditEvent;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Errors from the event store.
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// The appended event's sequence number does not immediately follow
    /// the case's last recorded sequence.
    ///
    /// This is the store's optimistic-concurrency check: the caller's
    /// view of "the last sequence" was stale, typically because another
    /// worker already advanced the case (a lease was lost) or a replaying
    /// worker recomputed a sequence number without re-reading the log.
    #[error("append to case {case_id} out of order: expected sequence {expected}, got {actual}")]
    OutOfOrder {
        /// The case the append targeted.
        case_id: Uuid,
        /// The sequence number that should have been used.
        expected: u64,
        /// The sequence number the caller supplied.
        actual: u64,
    },
}

/// Result of verifying a case's event chain: gap-free, monotonic,
/// starting at 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainVerification {
    /// Number of events in the chain.
    pub event_count: usize,
    /// Sequence numbers that break monotonic gap-free ordering, if any.
    pub gaps: Vec<(u64, u64)>,
    /// `true` if `gaps` is empty and the chain starts at 1.
    pub is_valid: bool,
}

/// The in-memory, per-case append-only event log.
#[derive(Default)]
pub struct EventStore {
    events: Mutex<BTreeMap<Uuid, Vec<AuditEvent>>>,
}

impl EventStore {
    /// An empty event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The next sequence number for `case_id` (1 if no events exist yet).
    pub fn next_sequence(&self, case_id: Uuid) -> u64 {
        self.events
            .lock()
            .expect("event store mutex poisoned")
            .get(&case_id)
            .and_then(|events| events.last())
            .map(|last| last.sequence + 1)
            .unwrap_or(1)
    }

    /// Appends `event`, rejecting it if its sequence does not immediately
    /// follow the case's current tail.
    ///
    /// This is the engine's at-most-once mechanism for side effects: a
    /// caller logs the intended effect as an event *before* performing it,
    /// using the sequence number as the optimistic-concurrency token; a
    /// replaying worker recomputes the same next sequence and the append
    /// is naturally rejected if another worker already wrote it.
    pub fn append(&self, event: AuditEvent) -> Result<(), EventStoreError> {
        let mut events = self.events.lock().expect("event store mutex poisoned");
        let case_events = events.entry(event.case_id).or_default();
        let expected = case_events.last().map(|last| last.sequence + 1).unwrap_or(1);
        if event.sequence != expected {
            return Err(EventStoreError::OutOfOrder {
                case_id: event.case_id,
                expected,
                actual: event.sequence,
            });
        }
        case_events.push(event);
        Ok(())
    }

    /// Returns all events for `case_id`, ordered by sequence.
    pub fn list(&self, case_id: Uuid) -> Vec<AuditEvent> {
        self.events.lock().expect("event store mutex poisoned").get(&case_id).cloned().unwrap_or_default()
    }

    /// The most recent event for `case_id`, if any. The orchestrator's
    /// replay path reads this to recompute the next step from
    /// `status_after`.
    pub fn last(&self, case_id: Uuid) -> Option<AuditEvent> {
        self.events.lock().expect("event store mutex poisoned").get(&case_id)?.last().cloned()
    }

    /// Verifies that `case_id`'s chain is monotonic, gap-free, and starts
    /// at 1.
    pub fn verify_chain(&self, case_id: Uuid) -> ChainVerification {
        let events = self.list(case_id);
        let mut gaps = Vec::new();
        let mut expected = 1u64;
        for event in &events {
            if event.sequence != expected {
                gaps.push((expected, event.sequence));
            }
            expected = event.sequence + 1;
        }
        ChainVerification {
            event_count: events.len(),
            is_valid: gaps.is_empty(),
            gaps,
        }
    }

    /// Returns the timestamp of the oldest event still pending past
    /// `deadline`, across all cases whose latest event is older than
    /// `deadline` and whose status (carried in `status_after`) is not
    /// terminal. Used by the expiry sweep to find candidates for
    /// `CASE_EXPIRED`.
    pub fn stale_case_ids(&self, deadline: DateTime<Utc>, terminal_statuses: &[&str]) -> Vec<Uuid> {
        let events = self.events.lock().expect("event store mutex poisoned");
        events
            .iter()
            .filter_map(|(case_id, case_events)| {
                let last = case_events.last()?;
                let is_terminal = last.status_after.as_deref().is_some_and(|s| terminal_statuses.contains(&s));
                (!is_terminal && last.timestamp < deadline).then_some(*case_id)
            })
            .collect()
    }
}
