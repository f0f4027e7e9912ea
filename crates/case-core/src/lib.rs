// SPDX-License-Identifier: MIT OR Apache-2.0
//! case-core
//!
//! The stable contract for the case orchestration engine: the data model
//! shared by the extractor, committee, resolver, submitter, orchestrator,
//! and the boundary adapters. If you only take one dependency, take this
//! one.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Append-only audit event log entries.
pub mod audit;
/// The `Case` envelope and its lifecycle status.
pub mod case;
/// Two-tier catalog cache entries (customers, items).
pub mod catalog;
/// `(sheet, A1, raw)` evidence pointers.
pub mod evidence;
/// Idempotency fingerprints for external submission.
pub mod fingerprint;
/// Canonical JSON and SHA-256 helpers shared across the workspace.
pub mod hashing;
/// Validation/committee/resolver issues attached to a case.
pub mod issue;
/// The extracted `CanonicalOrder` and its nested types.
pub mod order;
/// Durable outbox entries awaiting delivery to downstream adapters.
pub mod outbox;
/// Durable retry-queue entries for the submission engine.
pub mod retry_item;

pub use audit::{Actor, ActorType, AuditEvent};
pub use case::{Case, CaseStatus};
pub use catalog::{CatalogCustomer, CatalogItem, CatalogItemStatus};
pub use evidence::EvidenceCell;
pub use fingerprint::{compute_fingerprint_hex, day_bucket, line_item_hash, parse_day_bucket, Fingerprint};
pub use hashing::{canonical_json, sha256_hex, CanonicalizeError};
pub use issue::{Issue, IssueCode, Severity};
pub use order::{
    Approval, CanonicalOrder, ColumnMapping, Confidence, CustomerCandidate, CustomerExtract,
    CustomerResolutionStatus, ExternalSystemLinkage, ItemCandidate, ItemResolutionStatus, LineItem,
    MappingMethod, OrderMeta, SchemaInference, Totals,
};
pub use outbox::{OutboxEntry, OutboxEventType, OutboxStatus};
pub use retry_item::RetryItem;

/// Current contract version string embedded in audit events and wire payloads.
///
/// # Examples
///
/// ```
/// assert_eq!(case_core::CONTRACT_VERSION, "case/v1");
/// ```
pub const CONTRACT_VERSION: &str = "case/v1";
