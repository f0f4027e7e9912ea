// SPDX-License-Identifier: MIT OR Apache-2.0
//! case-resolver
//!
//! Resolves a `CanonicalOrder`'s customer and line items against the
//! external catalog: exact-then-fuzzy customer matching, SKU/GTIN/name
//! item matching, and price resolution with a non-mutating audit trail.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Customer matching.
pub mod customer;
/// Normalized edit-distance fuzzy scoring shared by customer and item matching.
pub mod fuzzy;
/// Item matching.
pub mod item;
/// Price resolution and its audit trail.
pub mod price;

use case_core::{CanonicalOrder, CatalogCustomer, CatalogItem};

use price::PriceAudit;

/// Resolver thresholds, overridable per tenant.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Fuzzy score at or above which a customer match is considered
    /// trustworthy enough to auto-resolve (subject to the ambiguity margin).
    pub customer_fuzzy_high: f64,
    /// Fuzzy score at or above which a customer match is surfaced as
    /// `needs_user_input` rather than `not_found`.
    pub customer_fuzzy_low: f64,
    /// Minimum score gap between the best and runner-up match required to
    /// treat a match as unambiguous.
    pub ambiguity_margin: f64,
    /// Whether fuzzy name matching is attempted for line items that have
    /// no SKU/GTIN match. Off by default: SKU/GTIN matching is exact and
    /// low-risk, name fuzzing is not.
    pub item_fuzzy_enabled: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { customer_fuzzy_high: 0.75, customer_fuzzy_low: 0.60, ambiguity_margin: 0.1, item_fuzzy_enabled: false }
    }
}

/// Resolves `order`'s customer and every line item against the catalog,
/// mutating `order` in place: resolution statuses and ids are set,
/// resolved prices are filled in, and new issues are appended to
/// `order.issues`. Returns the price audit records produced along the way.
pub fn resolve_order(order: &mut CanonicalOrder, customers: &[CatalogCustomer], items: &[CatalogItem], config: &ResolverConfig) -> Vec<PriceAudit> {
    if let Some(issue) = customer::resolve_customer(&mut order.customer, customers, config) {
        tracing::info!(case_id = %order.meta.case_id, code = ?issue.code, "customer resolution issue");
        order.issues.push(issue);
    }

    let mut audits = Vec::with_capacity(order.line_items.len());
    for line in &mut order.line_items {
        if let Some(issue) = item::resolve_item(line, items, config) {
            tracing::info!(case_id = %order.meta.case_id, row = line.row_index, code = ?issue.code, "item resolution issue");
            order.issues.push(issue);
            continue;
        }
        if let Some(external_id) = line.resolved_external_id.clone() {
            if let Some(catalog_item) = items.iter().find(|i| i.external_id == external_id) {
                audits.push(price::resolve_price(line, catalog_item));
            }
        }
    }

    audits
}

#[cfg(test)]
mod tests {
    use super::*;
    use case_core::{CatalogItemStatus, Confidence, CustomerExtract, LineItem, OrderMeta, SchemaInference, Totals};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn order() -> CanonicalOrder {
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
            customer: CustomerExtract::new("Acme Corp", vec![]),
            line_items: vec![LineItem {
                row_index: 0,
                sku: Some("SKU-001".to_string()),
                gtin: None,
                product_name: Some("Widget".to_string()),
                quantity: 10.0,
                unit_price_source: Some(20.0),
                unit_price_resolved: None,
                line_total_source: Some(200.0),
                currency: None,
                resolved_external_id: None,
                resolution_status: case_core::ItemResolutionStatus::Unresolved,
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
    fn resolves_customer_and_item_and_produces_price_audit() {
        let mut o = order();
        let customers = vec![CatalogCustomer { external_id: "cust-1".to_string(), display_name: "Acme Corp".to_string(), company_name: None }];
        let items = vec![CatalogItem { external_id: "i1".to_string(), sku: Some("SKU-001".to_string()), gtin: None, name: "Widget".to_string(), rate: 25.5, status: CatalogItemStatus::Active }];
        let audits = resolve_order(&mut o, &customers, &items, &ResolverConfig::default());
        assert_eq!(o.customer.resolved_external_id.as_deref(), Some("cust-1"));
        assert_eq!(o.line_items[0].resolved_external_id.as_deref(), Some("i1"));
        assert_eq!(o.line_items[0].unit_price_resolved, Some(25.5));
        assert_eq!(o.line_items[0].unit_price_source, Some(20.0));
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].difference, Some(5.5));
    }

    #[test]
    fn unresolvable_customer_and_item_both_push_issues() {
        let mut o = order();
        let audits = resolve_order(&mut o, &[], &[], &ResolverConfig::default());
        assert!(audits.is_empty());
        assert_eq!(o.issues.len(), 2);
    }
}
