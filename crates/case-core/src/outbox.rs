//! Durable outbox entries awaiting delivery to downstream adapters.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The kind of event an [`OutboxEntry`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutboxEventType {
    /// A draft order was created successfully.
    SalesorderCreated,
    /// Submission failed non-transiently.
    SalesorderFailed,
    /// Retries were exhausted without success.
    RetryExhausted,
}

/// Delivery status of an [`OutboxEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Not yet acknowledged by the downstream adapter.
    Pending,
    /// Acknowledged; delivery is complete.
    Processed,
}

/// A durable, external-facing event awaiting delivery to a downstream
/// adapter (e.g. a user notification).
///
/// A separate delivery worker transitions entries from [`OutboxStatus::Pending`]
/// to [`OutboxStatus::Processed`] once the downstream adapter acknowledges;
/// this type does not perform delivery itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OutboxEntry {
    /// Unique identifier for this entry.
    pub id: Uuid,
    /// The case this event is about.
    pub case_id: Uuid,
    /// The kind of event.
    pub event_type: OutboxEventType,
    /// Event-specific payload for the downstream adapter.
    pub payload: serde_json::Value,
    /// When the entry was created.
    pub created_at: DateTime<Utc>,
    /// When the entry was acknowledged processed, if it has been.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<DateTime<Utc>>,
    /// Current delivery status.
    pub status: OutboxStatus,
}

impl OutboxEntry {
    /// Builds a pending outbox entry.
    pub fn new(
        id: Uuid,
        case_id: Uuid,
        event_type: OutboxEventType,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            case_id,
            event_type,
            payload,
            created_at,
            processed_at: None,
            status: OutboxStatus::Pending,
        }
    }

    /// Marks the entry processed at `now`.
    pub fn mark_processed(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Processed;
        self.processed_at = Some(now);
    }
}
