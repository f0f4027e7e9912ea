//! The external bookkeeping system's draft-order creation contract.

use std::time::Duration;

use crate::payload::SubmissionPayload;

/// Errors a [`BookkeepingClient`] call can return, classified for the
/// submitter's retry policy.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Network failure, 5xx, or an explicit rate limit — retryable.
    #[error("transient external-system error: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
        /// Server-supplied `Retry-After`, if any.
        retry_after: Option<Duration>,
    },
    /// The access token was rejected (401). The submitter refreshes once
    /// and retries the same call within the same attempt; this variant
    /// only surfaces if that retry also failed.
    #[error("access token rejected")]
    AuthExpired,
    /// A 4xx other than 429/401 — not retryable, fails the case.
    #[error("non-transient external-system error ({status}): {message}")]
    NonTransient {
        /// The HTTP status code.
        status: u16,
        /// Description of the failure.
        message: String,
    },
}

impl ClientError {
    /// `true` for errors the submitter's retry policy should act on.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient { .. })
    }

    /// The server-supplied `Retry-After`, if this is a transient error
    /// carrying one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ClientError::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// The external bookkeeping system's draft-order endpoint, abstracted so
/// the submitter can be tested against a stub.
#[async_trait::async_trait]
pub trait BookkeepingClient: Send + Sync {
    /// Creates a draft order, returning its external id.
    async fn create_draft_order(&self, access_token: &str, payload: &SubmissionPayload) -> Result<String, ClientError>;
}
