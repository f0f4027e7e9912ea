//! Builds the external draft-order payload from a resolved `CanonicalOrder`.
//!
//! `unit_price_resolved` is the payload's only source of price; the
//! spreadsheet's own `unit_price_source` is never serialized into it.

use case_core::CanonicalOrder;
use serde::Serialize;
use uuid::Uuid;

/// One line of the external draft-order payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PayloadLine {
    /// The resolved catalog item's external id.
    pub item_external_id: String,
    /// Quantity ordered.
    pub quantity: f64,
    /// The authoritative unit price. Always `unit_price_resolved`; never
    /// the spreadsheet's own price.
    pub unit_price: f64,
}

/// The external draft-order payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionPayload {
    /// The resolved customer's external id.
    pub customer_external_id: String,
    /// Order lines.
    pub lines: Vec<PayloadLine>,
    /// The order status. Always `"draft"`: this system never posts a
    /// non-draft order.
    pub status: &'static str,
    /// Custom field carrying the case id for operator traceability in the
    /// external system.
    pub external_order_key: String,
}

/// Errors building a payload from an order that isn't fully resolved.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PayloadError {
    /// The order's customer has no resolved external id.
    #[error("customer is not resolved")]
    CustomerUnresolved,
    /// A line item has no resolved unit price.
    #[error("line {row_index} has no resolved unit price")]
    LineMissingPrice {
        /// The unresolved line's row index.
        row_index: u32,
    },
    /// A line item has no resolved catalog item id.
    #[error("line {row_index} has no resolved item")]
    LineUnresolved {
        /// The unresolved line's row index.
        row_index: u32,
    },
}

/// Builds the submission payload for `order`, which must have a resolved
/// customer and every line item resolved with a price.
pub fn build_payload(case_id: Uuid, order: &CanonicalOrder) -> Result<SubmissionPayload, PayloadError> {
    let customer_external_id = order.customer.resolved_external_id.clone().ok_or(PayloadError::CustomerUnresolved)?;

    let mut lines = Vec::with_capacity(order.line_items.len());
    for item in &order.line_items {
        let item_external_id = item.resolved_external_id.clone().ok_or(PayloadError::LineUnresolved { row_index: item.row_index })?;
        let unit_price = item.unit_price_resolved.ok_or(PayloadError::LineMissingPrice { row_index: item.row_index })?;
        lines.push(PayloadLine { item_external_id, quantity: item.quantity, unit_price });
    }

    Ok(SubmissionPayload { customer_external_id, lines, status: "draft", external_order_key: case_id.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use case_core::{Confidence, CustomerExtract, ItemResolutionStatus, LineItem, OrderMeta, SchemaInference, Totals};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn base_order() -> CanonicalOrder {
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
            line_items: vec![],
            totals: Totals { subtotal: None, tax: None, grand: None, evidence: BTreeMap::new() },
            schema_inference: SchemaInference { selected_sheet: "Sheet1".to_string(), header_row: 0, column_mappings: vec![] },
            confidence: Confidence::from_stages(BTreeMap::new()),
            issues: vec![],
            approvals: vec![],
            external_linkage: None,
        }
    }

    fn resolved_line() -> LineItem {
        LineItem {
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
        }
    }

    #[test]
    fn builds_payload_using_resolved_price_exclusively() {
        let mut order = base_order();
        order.customer.resolved_external_id = Some("cust-1".to_string());
        order.line_items = vec![resolved_line()];
        let payload = build_payload(Uuid::nil(), &order).unwrap();
        assert_eq!(payload.lines[0].unit_price, 25.5);
        assert_eq!(payload.status, "draft");
        assert_eq!(payload.external_order_key, Uuid::nil().to_string());
    }

    #[test]
    fn rejects_unresolved_customer() {
        let order = base_order();
        assert_eq!(build_payload(Uuid::nil(), &order), Err(PayloadError::CustomerUnresolved));
    }

    #[test]
    fn rejects_line_without_resolved_price() {
        let mut order = base_order();
        order.customer.resolved_external_id = Some("cust-1".to_string());
        let mut line = resolved_line();
        line.unit_price_resolved = None;
        order.line_items = vec![line];
        assert_eq!(build_payload(Uuid::nil(), &order), Err(PayloadError::LineMissingPrice { row_index: 0 }));
    }
}
