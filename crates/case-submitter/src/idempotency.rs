//! Fingerprint-gated idempotent submission.

use std::time::Duration;

use case_core::{day_bucket, line_item_hash, compute_fingerprint_hex, CanonicalOrder, Fingerprint};
use case_store::fingerprints::{FingerprintStore, InsertOutcome};
use chrono::Utc;
use uuid::Uuid;

/// How many times [`await_fingerprint_resolution`] polls the fingerprint
/// store before giving up.
pub const MAX_WAIT_POLLS: u32 = 10;
/// The fixed interval between polls.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Computes the submission fingerprint for `order` per the system's
/// `SHA256(file_hash || resolved_customer_id || line_item_hash ||
/// day_bucket)` scheme.
pub fn fingerprint_for(order: &CanonicalOrder) -> Option<String> {
    let customer_id = order.customer.resolved_external_id.as_deref()?;
    let pairs: Vec<(String, f64)> = order
        .line_items
        .iter()
        .map(|item| item.resolved_external_id.clone().map(|id| (id, item.quantity)))
        .collect::<Option<_>>()?;
    let hash = line_item_hash(&pairs);
    let bucket = day_bucket(order.meta.received_at);
    Some(compute_fingerprint_hex(&order.meta.file_hash, customer_id, &hash, &bucket))
}

/// The outcome of claiming a fingerprint ahead of submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This case won the claim; proceed with submission.
    Claimed,
    /// A prior case already completed submission for this fingerprint.
    Duplicate {
        /// The external order id produced by the prior submission.
        external_order_id: String,
    },
    /// A sibling submission is in flight and never settled within the
    /// bounded wait; the caller should treat this as a transient failure
    /// and let the retry queue redrive it later.
    TimedOut,
}

/// Attempts to claim `fingerprint_hex` for `case_id`. On conflict with an
/// unsettled sibling record, polls up to [`MAX_WAIT_POLLS`] times at
/// [`WAIT_POLL_INTERVAL`] rather than posting a second submission.
pub async fn claim_or_duplicate(store: &FingerprintStore, fingerprint_hex: &str, case_id: Uuid, tenant_id: &str) -> ClaimOutcome {
    let fingerprint = Fingerprint { fingerprint_hex: fingerprint_hex.to_string(), case_id, tenant_id: tenant_id.to_string(), created_at: Utc::now(), external_order_id: None };

    match store.insert_or_conflict(fingerprint) {
        InsertOutcome::Inserted => ClaimOutcome::Claimed,
        InsertOutcome::Conflict(existing) => {
            if let Some(external_order_id) = existing.external_order_id {
                return ClaimOutcome::Duplicate { external_order_id };
            }
            await_fingerprint_resolution(store, fingerprint_hex).await
        }
    }
}

/// Bounded wait-and-retry on a fingerprint lookup while a sibling
/// submission is believed to be in flight.
pub async fn await_fingerprint_resolution(store: &FingerprintStore, fingerprint_hex: &str) -> ClaimOutcome {
    for _ in 0..MAX_WAIT_POLLS {
        tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        if let Ok(record) = store.get(fingerprint_hex) {
            if let Some(external_order_id) = record.external_order_id {
                return ClaimOutcome::Duplicate { external_order_id };
            }
        }
    }
    ClaimOutcome::TimedOut
}

#[cfg(test)]
mod tests {
    use super::*;
    use case_core::{Confidence, CustomerExtract, ItemResolutionStatus, LineItem, OrderMeta, SchemaInference, Totals};
    use std::collections::BTreeMap;

    fn order_with_lines() -> CanonicalOrder {
        let mut customer = CustomerExtract::new("Acme Corp", vec![]);
        customer.resolved_external_id = Some("cust-1".to_string());
        CanonicalOrder {
            meta: OrderMeta {
                case_id: Uuid::nil(),
                tenant_id: "tenant-1".to_string(),
                received_at: Utc::now(),
                filename: "orders.xlsx".to_string(),
                file_hash: "a".repeat(64),
                language_hint: "en".to_string(),
                parser_version: "0.1.0".to_string(),
            },
            customer,
            line_items: vec![LineItem {
                row_index: 0,
                sku: Some("SKU-001".to_string()),
                gtin: None,
                product_name: None,
                quantity: 10.0,
                unit_price_source: Some(20.0),
                unit_price_resolved: Some(25.5),
                line_total_source: Some(200.0),
                currency: None,
                resolved_external_id: Some("item-1".to_string()),
                resolution_status: ItemResolutionStatus::Resolved,
                item_candidates: Vec::new(),
                evidence: BTreeMap::new(),
            }],
            totals: Totals { subtotal: None, tax: None, grand: None, evidence: BTreeMap::new() },
            schema_inference: SchemaInference { selected_sheet: "Sheet1".to_string(), header_row: 0, column_mappings: vec![] },
            confidence: Confidence::from_stages(BTreeMap::new()),
            issues: vec![],
            approvals: vec![],
            external_linkage: None,
        }
    }

    #[test]
    fn fingerprint_requires_fully_resolved_order() {
        let order = order_with_lines();
        assert!(fingerprint_for(&order).is_some());
    }

    #[test]
    fn fingerprint_is_none_when_a_line_is_unresolved() {
        let mut order = order_with_lines();
        order.line_items[0].resolved_external_id = None;
        assert!(fingerprint_for(&order).is_none());
    }

    #[test]
    fn fingerprint_is_stable_under_line_item_reordering() {
        let mut order = order_with_lines();
        order.line_items.push(LineItem { row_index: 1, resolved_external_id: Some("item-0".to_string()), ..order.line_items[0].clone() });
        let forward = fingerprint_for(&order);
        order.line_items.reverse();
        let reversed = fingerprint_for(&order);
        assert_eq!(forward, reversed);
    }

    #[tokio::test]
    async fn first_claim_wins() {
        let store = FingerprintStore::new();
        let outcome = claim_or_duplicate(&store, "fp-1", Uuid::new_v4(), "tenant-1").await;
        assert_eq!(outcome, ClaimOutcome::Claimed);
    }

    #[tokio::test]
    async fn settled_conflict_returns_duplicate() {
        let store = FingerprintStore::new();
        let case_id = Uuid::new_v4();
        claim_or_duplicate(&store, "fp-1", case_id, "tenant-1").await;
        store.settle("fp-1", "ext-order-1").unwrap();
        let outcome = claim_or_duplicate(&store, "fp-1", Uuid::new_v4(), "tenant-1").await;
        assert_eq!(outcome, ClaimOutcome::Duplicate { external_order_id: "ext-order-1".to_string() });
    }
}
