//! The `Case` envelope and its lifecycle status.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The lifecycle status of a [`Case`]. Transitions are owned exclusively by
/// the orchestrator; see [`CaseStatus::can_transition_to`] for the legal
/// transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    /// The case row has been created; no file has been stored yet.
    Created,
    /// The original file is being written to the evidence store.
    StoringFile,
    /// The extractor is parsing the stored file.
    Parsing,
    /// The extractor emitted a blocker (typically `FORMULAS_BLOCKED`); the
    /// case awaits a re-uploaded file.
    ParseBlocked,
    /// The committee is reviewing the extractor's column mapping.
    RunningCommittee,
    /// The committee could not reach quorum, or a downstream step bounced
    /// back; the case awaits user corrections.
    AwaitingCorrections,
    /// The resolver is matching the extracted customer against the
    /// catalog.
    ResolvingCustomer,
    /// Customer matching was ambiguous; awaits a user selection.
    AwaitingCustomerSelection,
    /// The resolver is matching extracted line items against the catalog.
    ResolvingItems,
    /// Item matching was ambiguous; awaits a user selection.
    AwaitingItemSelection,
    /// All entities are resolved; awaits human approval to submit.
    AwaitingApproval,
    /// The submitter is posting the draft order to the external system.
    CreatingDraft,
    /// Submission hit a transient failure and is queued for retry.
    QueuedForRetry,
    /// Terminal: a draft order was created successfully.
    Completed,
    /// Terminal: submission failed non-transiently, or retries were
    /// exhausted.
    Failed,
    /// Terminal: cancelled by a privileged actor or by wait-timeout
    /// expiry.
    Cancelled,
}

impl CaseStatus {
    /// `true` if this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// `true` if this status is an `awaiting_*` park point: no worker holds
    /// the case, and it resumes only on an external event or timeout.
    pub fn is_awaiting(self) -> bool {
        matches!(
            self,
            Self::ParseBlocked
                | Self::AwaitingCorrections
                | Self::AwaitingCustomerSelection
                | Self::AwaitingItemSelection
                | Self::AwaitingApproval
        )
    }

    /// Returns `true` if a transition from `self` to `next` is legal per
    /// the state machine in §4.7.
    ///
    /// `cancel` is handled separately: any non-terminal status may
    /// transition to [`CaseStatus::Cancelled`], which this function also
    /// reports as legal so callers need only consult one predicate.
    pub fn can_transition_to(self, next: Self) -> bool {
        use CaseStatus::*;

        if next == Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Created, StoringFile)
                | (StoringFile, Parsing)
                | (Parsing, ParseBlocked)
                | (Parsing, RunningCommittee)
                | (ParseBlocked, StoringFile)
                | (RunningCommittee, AwaitingCorrections)
                | (RunningCommittee, ResolvingCustomer)
                | (AwaitingCorrections, Parsing)
                | (ResolvingCustomer, AwaitingCustomerSelection)
                | (ResolvingCustomer, ResolvingItems)
                | (AwaitingCustomerSelection, ResolvingCustomer)
                | (ResolvingItems, AwaitingItemSelection)
                | (ResolvingItems, AwaitingApproval)
                | (AwaitingItemSelection, ResolvingItems)
                | (AwaitingApproval, AwaitingCorrections)
                | (AwaitingApproval, CreatingDraft)
                | (CreatingDraft, Completed)
                | (CreatingDraft, QueuedForRetry)
                | (CreatingDraft, Failed)
                | (QueuedForRetry, CreatingDraft)
        )
    }
}

/// A case: the unit of work for one uploaded spreadsheet file.
///
/// `status` is mutated only by the orchestrator. A case is retained
/// forever once created; there is no delete path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Case {
    /// Unique identifier for this case.
    pub case_id: Uuid,
    /// The tenant this case is partitioned under.
    pub tenant_id: String,
    /// The identifier of the user who uploaded the file.
    pub uploader_id: String,
    /// The chat conversation this case was created from.
    pub conversation_handle: String,
    /// The original filename as uploaded.
    pub source_filename: String,
    /// SHA-256 of the original file bytes, 64 lowercase hex characters.
    pub file_hash: String,
    /// Current lifecycle status.
    pub status: CaseStatus,
    /// Correlation id for this case's external calls and log lines. Equal
    /// to `case_id` in string form unless a caller supplies a distinct
    /// value for testing.
    pub correlation_id: String,
    /// When the case was created.
    pub created_at: DateTime<Utc>,
    /// When the case was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl Case {
    /// Creates a new case in [`CaseStatus::Created`] with `correlation_id`
    /// defaulted to the string form of `case_id`.
    pub fn new(
        case_id: Uuid,
        tenant_id: impl Into<String>,
        uploader_id: impl Into<String>,
        conversation_handle: impl Into<String>,
        source_filename: impl Into<String>,
        file_hash: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            case_id,
            tenant_id: tenant_id.into(),
            uploader_id: uploader_id.into(),
            conversation_handle: conversation_handle.into(),
            source_filename: source_filename.into(),
            file_hash: file_hash.into(),
            status: CaseStatus::Created,
            correlation_id: case_id.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Attempts the transition to `next`, updating `status` and
    /// `updated_at` on success.
    ///
    /// # Errors
    ///
    /// Returns `Err(self.status)` (the status that rejected the
    /// transition) if `next` is not legal from the current status.
    pub fn transition_to(&mut self, next: CaseStatus, now: DateTime<Utc>) -> Result<(), CaseStatus> {
        if !self.status.can_transition_to(next) {
            return Err(self.status);
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn happy_path_transition_chain_is_legal() {
        use CaseStatus::*;
        let chain = [
            Created,
            StoringFile,
            Parsing,
            RunningCommittee,
            ResolvingCustomer,
            ResolvingItems,
            AwaitingApproval,
            CreatingDraft,
            Completed,
        ];
        for pair in chain.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn cancel_is_legal_from_any_non_terminal_status() {
        use CaseStatus::*;
        for status in [
            Created,
            StoringFile,
            Parsing,
            ParseBlocked,
            RunningCommittee,
            AwaitingCorrections,
            ResolvingCustomer,
            AwaitingCustomerSelection,
            ResolvingItems,
            AwaitingItemSelection,
            AwaitingApproval,
            CreatingDraft,
            QueuedForRetry,
        ] {
            assert!(status.can_transition_to(Cancelled), "{status:?} -> Cancelled");
        }
    }

    #[test]
    fn cancel_is_illegal_from_terminal_statuses() {
        use CaseStatus::*;
        for status in [Completed, Failed, Cancelled] {
            assert!(!status.can_transition_to(Cancelled));
        }
    }

    #[test]
    fn retry_loop_reenters_creating_draft() {
        assert!(CaseStatus::CreatingDraft.can_transition_to(CaseStatus::QueuedForRetry));
        assert!(CaseStatus::QueuedForRetry.can_transition_to(CaseStatus::CreatingDraft));
    }

    #[test]
    fn approval_rejection_returns_to_awaiting_corrections() {
        assert!(CaseStatus::AwaitingApproval.can_transition_to(CaseStatus::AwaitingCorrections));
    }

    #[test]
    fn illegal_transition_is_rejected() {
        assert!(!CaseStatus::Created.can_transition_to(CaseStatus::Completed));
    }

    #[test]
    fn case_transition_updates_timestamp_on_success_and_errors_with_current_status_on_failure() {
        let mut case = Case::new(Uuid::nil(), "tenant-1", "u-1", "conv-1", "orders.xlsx", "a".repeat(64), now());
        let later = now() + chrono::Duration::seconds(1);
        case.transition_to(CaseStatus::StoringFile, later).unwrap();
        assert_eq!(case.status, CaseStatus::StoringFile);
        assert_eq!(case.updated_at, later);

        let err = case.transition_to(CaseStatus::Completed, later).unwrap_err();
        assert_eq!(err, CaseStatus::StoringFile);
    }

    #[test]
    fn is_awaiting_covers_exactly_the_park_states() {
        use CaseStatus::*;
        for status in [ParseBlocked, AwaitingCorrections, AwaitingCustomerSelection, AwaitingItemSelection, AwaitingApproval] {
            assert!(status.is_awaiting());
        }
        for status in [Created, Parsing, RunningCommittee, CreatingDraft, Completed] {
            assert!(!status.is_awaiting());
        }
    }
}
