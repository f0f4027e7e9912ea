// SPDX-License-Identifier: MIT OR Apache-2.0
//! case-submitter
//!
//! Idempotent draft-order submission: fingerprint-gated at-most-once
//! semantics, OAuth token lifecycle, payload construction that never
//! leaks the spreadsheet's own price, and transient-failure retry via a
//! durable outbox and retry queue.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// The external bookkeeping system's draft-order contract.
pub mod client;
/// Fingerprint-gated idempotency.
pub mod idempotency;
/// Draft-order payload construction.
pub mod payload;
/// OAuth 2.0 access-token lifecycle.
pub mod token;

use chrono::Utc;
use uuid::Uuid;

use case_core::{CanonicalOrder, IssueCode, OutboxEntry, OutboxEventType, RetryItem, Severity};
use case_retry::RetryPolicy;
use case_store::fingerprints::FingerprintStore;
use case_store::outbox::OutboxStore;
use case_store::retry_queue::RetryQueue;

use client::{BookkeepingClient, ClientError};
use idempotency::{claim_or_duplicate, fingerprint_for, ClaimOutcome};
use payload::{build_payload, PayloadError, SubmissionPayload};
use token::{TokenCache, TokenRefresher};

/// The result of one [`submit_case`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionResult {
    /// A new draft order was created.
    Created {
        /// The external order id.
        external_order_id: String,
    },
    /// A prior submission for this fingerprint already completed.
    Duplicate {
        /// The external order id produced by the prior submission.
        external_order_id: String,
    },
    /// Submission failed transiently and was enqueued for retry.
    EnqueuedForRetry,
    /// Submission failed non-transiently; the case should move to `failed`.
    Failed {
        /// A human-readable failure reason.
        reason: String,
    },
}

/// Errors that prevent even attempting submission.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The order isn't fully resolved, so no payload or fingerprint could
    /// be built.
    #[error("order is not ready for submission: {0}")]
    NotReady(#[from] PayloadError),
}

/// Submits `order`, or records why it couldn't be submitted yet.
///
/// Orchestrates the fingerprint gate, the single in-process token refresh,
/// the one-shot auth-expired retry, and the transient/non-transient split
/// described by the submitter's contract. Does not itself run the retry
/// sweep over a durable [`RetryQueue`] — that is a separate worker pulling
/// from the same queue this function writes to.
#[allow(clippy::too_many_arguments)]
pub async fn submit_case<C: BookkeepingClient, R: TokenRefresher>(
    case_id: Uuid,
    order: &CanonicalOrder,
    client: &C,
    tokens: &TokenCache<R>,
    fingerprints: &FingerprintStore,
    outbox: &OutboxStore,
    retry_queue: &RetryQueue,
    retry_policy: &RetryPolicy,
) -> Result<SubmissionResult, SubmitError> {
    let fingerprint_hex = match fingerprint_for(order) {
        Some(fp) => fp,
        None => return Err(SubmitError::NotReady(PayloadError::CustomerUnresolved)),
    };

    match claim_or_duplicate(fingerprints, &fingerprint_hex, case_id, &order.meta.tenant_id).await {
        ClaimOutcome::Duplicate { external_order_id } => return Ok(SubmissionResult::Duplicate { external_order_id }),
        ClaimOutcome::TimedOut => return Ok(SubmissionResult::EnqueuedForRetry),
        ClaimOutcome::Claimed => {}
    }

    let payload = build_payload(case_id, order)?;
    let now = Utc::now();

    match attempt_with_auth_retry(client, tokens, &payload, now).await {
        Ok(external_order_id) => {
            let _ = fingerprints.settle(&fingerprint_hex, &external_order_id);
            outbox.append(OutboxEntry::new(
                Uuid::new_v4(),
                case_id,
                OutboxEventType::SalesorderCreated,
                serde_json::json!({ "external_order_id": external_order_id, "fingerprint": fingerprint_hex }),
                now,
            ));
            Ok(SubmissionResult::Created { external_order_id })
        }
        Err(error) if error.is_transient() => {
            let delay = retry_policy.delay_honoring_retry_after(1, error.retry_after());
            let item = RetryItem::first_attempt(case_id, serde_json::to_value(&payload).expect("payload always serializes"), now + chrono::Duration::from_std(delay).unwrap_or_default(), error.to_string());
            retry_queue.enqueue(item);
            tracing::warn!(case_id = %case_id, "submission failed transiently, enqueued for retry");
            Ok(SubmissionResult::EnqueuedForRetry)
        }
        Err(error) => {
            outbox.append(OutboxEntry::new(Uuid::new_v4(), case_id, OutboxEventType::SalesorderFailed, serde_json::json!({ "reason": error.to_string() }), now));
            tracing::error!(case_id = %case_id, %error, "submission failed non-transiently");
            Ok(SubmissionResult::Failed { reason: error.to_string() })
        }
    }
}

async fn attempt_with_auth_retry<C: BookkeepingClient, R: TokenRefresher>(
    client: &C,
    tokens: &TokenCache<R>,
    payload: &SubmissionPayload,
    now: chrono::DateTime<Utc>,
) -> Result<String, ClientError> {
    let access_token = tokens.access_token(now).await.map_err(|e| ClientError::Transient { message: e.to_string(), retry_after: None })?;
    match client.create_draft_order(&access_token, payload).await {
        Err(ClientError::AuthExpired) => {
            tokens.invalidate().await;
            let refreshed = tokens.access_token(now).await.map_err(|e| ClientError::Transient { message: e.to_string(), retry_after: None })?;
            client.create_draft_order(&refreshed, payload).await
        }
        other => other,
    }
}

/// Reports the submitter's taxonomy codes for a given [`ClientError`],
/// for attaching to a case's issue list when it transitions `failed`.
pub fn issue_code_for(error: &ClientError) -> (IssueCode, Severity) {
    match error {
        ClientError::Transient { .. } | ClientError::AuthExpired => (IssueCode::LowConfidence, Severity::Warning),
        ClientError::NonTransient { .. } => (IssueCode::LowConfidence, Severity::Error),
    }
}
