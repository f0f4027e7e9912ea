//! TTL-based per-case worker lease table.
//!
//! Ensures at most one worker drives a given case at a time (spec section
//! 5). Grounded on the same state-transition shape as a sidecar process
//! pool, applied to case ids instead of process handles.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// The state of a case's lease entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Held by `worker_id`, valid until `expires_at`.
    Held,
    /// Explicitly released by its holder before expiry.
    Released,
    /// Allowed to lapse; `expires_at` has passed.
    Expired,
}

/// A single case's lease entry.
#[derive(Debug, Clone)]
pub struct Lease {
    /// The case this lease guards.
    pub case_id: Uuid,
    /// The worker currently (or most recently) holding the lease.
    pub worker_id: String,
    /// When the lease was most recently acquired or renewed.
    pub acquired_at: DateTime<Utc>,
    /// When the lease lapses if not renewed or released.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    fn state(&self, now: DateTime<Utc>) -> LeaseState {
        if now >= self.expires_at {
            LeaseState::Expired
        } else {
            LeaseState::Held
        }
    }
}

/// Errors from the lease table.
#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    /// Another worker holds an unexpired lease on this case.
    #[error("case {case_id} is leased by {held_by} until {expires_at}")]
    AlreadyHeld {
        /// The case that was contended for.
        case_id: Uuid,
        /// The worker currently holding the lease.
        held_by: String,
        /// When the current holder's lease expires.
        expires_at: DateTime<Utc>,
    },
    /// `release` or `renew` was called by a worker that does not hold the
    /// lease — it was lost to expiry and reacquired by another worker.
    #[error("case {case_id} lease is held by {actual_holder}, not {attempted_holder}")]
    LeaseLost {
        /// The case whose lease was lost.
        case_id: Uuid,
        /// The worker that attempted the operation.
        attempted_holder: String,
        /// The worker that currently actually holds the lease.
        actual_holder: String,
    },
}

/// The per-case worker lease table.
#[derive(Default)]
pub struct LeaseTable {
    leases: Mutex<BTreeMap<Uuid, Lease>>,
}

impl LeaseTable {
    /// An empty lease table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the lease for `case_id` on behalf of `worker_id`, valid
    /// for `ttl` from `now`.
    ///
    /// Succeeds if no lease is held, or the existing lease has expired
    /// (reclaiming an abandoned lease from a crashed worker).
    pub fn acquire(&self, case_id: Uuid, worker_id: impl Into<String>, now: DateTime<Utc>, ttl: chrono::Duration) -> Result<Lease, LeaseError> {
        let mut leases = self.leases.lock().expect("lease table mutex poisoned");
        if let Some(existing) = leases.get(&case_id) {
            if existing.state(now) == LeaseState::Held {
                return Err(LeaseError::AlreadyHeld {
                    case_id,
                    held_by: existing.worker_id.clone(),
                    expires_at: existing.expires_at,
                });
            }
        }
        let lease = Lease {
            case_id,
            worker_id: worker_id.into(),
            acquired_at: now,
            expires_at: now + ttl,
        };
        leases.insert(case_id, lease.clone());
        Ok(lease)
    }

    /// Renews `worker_id`'s lease on `case_id`, extending `expires_at` to
    /// `now + ttl`.
    pub fn renew(&self, case_id: Uuid, worker_id: &str, now: DateTime<Utc>, ttl: chrono::Duration) -> Result<Lease, LeaseError> {
        let mut leases = self.leases.lock().expect("lease table mutex poisoned");
        let lease = leases.get_mut(&case_id).ok_or_else(|| LeaseError::LeaseLost {
            case_id,
            attempted_holder: worker_id.to_string(),
            actual_holder: "<none>".to_string(),
        })?;
        if lease.worker_id != worker_id || lease.state(now) == LeaseState::Expired {
            return Err(LeaseError::LeaseLost {
                case_id,
                attempted_holder: worker_id.to_string(),
                actual_holder: lease.worker_id.clone(),
            });
        }
        lease.expires_at = now + ttl;
        Ok(lease.clone())
    }

    /// Releases `worker_id`'s lease on `case_id`, if it still holds it.
    pub fn release(&self, case_id: Uuid, worker_id: &str) {
        let mut leases = self.leases.lock().expect("lease table mutex poisoned");
        if leases.get(&case_id).is_some_and(|lease| lease.worker_id == worker_id) {
            leases.remove(&case_id);
        }
    }

    /// `true` if `case_id` currently has an unexpired lease.
    pub fn is_held(&self, case_id: Uuid, now: DateTime<Utc>) -> bool {
        self.leases
            .lock()
            .expect("lease table mutex poisoned")
            .get(&case_id)
            .is_some_and(|lease| lease.state(now) == LeaseState::Held)
    }
}
