// SPDX-License-Identifier: MIT OR Apache-2.0
//! case-store
//!
//! The durable state store (component B): cases, the append-only event
//! log, idempotency fingerprints, the retry queue, the outbox, the catalog
//! cache, and the per-case worker lease table. Every collection here is
//! named directly in the persisted-state layout of the system this engine
//! implements (`cases`, `events`, `fingerprints`, `retry_queue`, `outbox`,
//! `cache_customers`, `cache_items`).
#![deny(unsafe_code)]

/// Case rows, keyed by `case_id`.
pub mod cases;
/// Two-tier catalog cache with TTL and stale-on-failure fallback.
pub mod catalog_cache;
/// The append-only, gap-free, per-case audit event log.
pub mod events;
/// Atomic insert-or-conflict fingerprint table.
pub mod fingerprints;
/// TTL-based per-case worker lease table.
pub mod lease;
/// Durable outbox of external-facing events.
pub mod outbox;
/// Claim-with-visibility-timeout retry queue.
pub mod retry_queue;

pub use cases::{CaseFilter, CaseStore, CaseStoreError};
pub use catalog_cache::{CatalogCache, CatalogCacheError, CatalogView};
pub use events::{ChainVerification, EventStore, EventStoreError};
pub use fingerprints::{FingerprintStore, FingerprintStoreError, InsertOutcome};
pub use lease::{Lease, LeaseError, LeaseState, LeaseTable};
pub use outbox::OutboxStore;
pub use retry_queue::{RetryClaim, RetryQueue};
