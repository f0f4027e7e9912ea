//! Append-only audit events.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who or what caused an [`AuditEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    /// A human end user.
    User,
    /// The orchestrator or another internal component acting on its own.
    System,
    /// The chat bot adapter.
    Bot,
    /// An AI agent acting on a user's behalf (e.g. via a tool endpoint).
    Agent,
    /// A privileged administrator.
    Admin,
    /// A background scheduler (catalog refresh, retry sweep, expiry sweep).
    Scheduler,
}

/// The actor that caused an [`AuditEvent`], with optional identifying
/// detail. `user_id` and `ip` are only ever populated for [`ActorType::User`]
/// and [`ActorType::Admin`] actors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Actor {
    /// The kind of actor.
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    /// The acting user's identifier, if `actor_type` is a human.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// The request's source IP, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl Actor {
    /// An actor representing the system itself (the orchestrator, a
    /// component acting without a human in the loop).
    pub fn system() -> Self {
        Self {
            actor_type: ActorType::System,
            user_id: None,
            ip: None,
        }
    }

    /// An actor representing a background scheduler.
    pub fn scheduler() -> Self {
        Self {
            actor_type: ActorType::Scheduler,
            user_id: None,
            ip: None,
        }
    }

    /// An actor representing a human user.
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            actor_type: ActorType::User,
            user_id: Some(user_id.into()),
            ip: None,
        }
    }

    /// Sets the source IP, consuming and returning `self`.
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }
}

/// A single append-only audit log entry for a case.
///
/// Sequence numbers are monotonic per `case_id`, starting at 1, and
/// gap-free — this is an invariant enforced by the state store, not by this
/// type, but callers constructing events should never skip a sequence
/// number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AuditEvent {
    /// Unique identifier for this event.
    pub id: Uuid,
    /// The case this event belongs to.
    pub case_id: Uuid,
    /// Monotonic, gap-free, per-case sequence number starting at 1.
    pub sequence: u64,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// A short machine-readable label for what happened, e.g.
    /// `"committee_completed"`, `"status_transitioned"`.
    pub event_type: String,
    /// The case status immediately after this event, if the event caused a
    /// transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_after: Option<String>,
    /// Who or what caused the event.
    pub actor: Actor,
    /// Event-specific structured payload.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Named pointers to blob artifacts produced by this event, e.g.
    /// `{"canonical_order": "orders-audit/{case_id}/canonical.json"}`.
    #[serde(default)]
    pub pointers: BTreeMap<String, String>,
    /// Fields redacted from `data` before persistence, by field path.
    #[serde(default)]
    pub redactions: Vec<String>,
}

impl AuditEvent {
    /// Builds an event with the given identity fields and no data,
    /// pointers, or redactions.
    pub fn new(
        id: Uuid,
        case_id: Uuid,
        sequence: u64,
        timestamp: DateTime<Utc>,
        event_type: impl Into<String>,
        actor: Actor,
    ) -> Self {
        Self {
            id,
            case_id,
            sequence,
            timestamp,
            event_type: event_type.into(),
            status_after: None,
            actor,
            data: serde_json::Value::Null,
            pointers: BTreeMap::new(),
            redactions: Vec::new(),
        }
    }

    /// Sets `status_after`, consuming and returning `self`.
    #[must_use]
    pub fn with_status_after(mut self, status: impl Into<String>) -> Self {
        self.status_after = Some(status.into());
        self
    }

    /// Sets the structured payload, consuming and returning `self`.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Adds a blob pointer, consuming and returning `self`.
    #[must_use]
    pub fn with_pointer(mut self, key: impl Into<String>, blob_uri: impl Into<String>) -> Self {
        self.pointers.insert(key.into(), blob_uri.into());
        self
    }
}
