//! The extracted `CanonicalOrder` and its nested types.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::evidence::EvidenceCell;
use crate::issue::Issue;

/// Identity and provenance metadata for a [`CanonicalOrder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OrderMeta {
    /// The case this order belongs to.
    pub case_id: Uuid,
    /// The tenant this order belongs to.
    pub tenant_id: String,
    /// When the source file was received.
    pub received_at: DateTime<Utc>,
    /// The original filename.
    pub filename: String,
    /// SHA-256 of the original file, 64 lowercase hex characters.
    pub file_hash: String,
    /// Majority-character language detected in headers and the first data
    /// column: `"en"`, `"fa"`, `"ar"`, `"mixed"`, or `"unknown"`.
    pub language_hint: String,
    /// Version string of the extractor that produced this order, for
    /// forward-compatible replay.
    pub parser_version: String,
}

/// How far along customer resolution has gotten for a [`CustomerExtract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CustomerResolutionStatus {
    /// The resolver has not run yet.
    Unresolved,
    /// Exactly one catalog entry matched unambiguously.
    Resolved,
    /// More than one catalog entry matched within the ambiguity margin.
    Ambiguous,
    /// A plausible but uncertain match exists; the user may confirm it.
    NeedsUserInput,
    /// No catalog entry matched above the low threshold.
    NotFound,
}

/// A catalog customer considered as a candidate match during resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CustomerCandidate {
    /// The catalog customer's external identifier.
    pub external_id: String,
    /// The catalog's display name for this customer.
    pub display_name: String,
    /// Similarity score against the extracted text, in `[0, 1]`.
    pub similarity: f64,
}

/// The extracted customer, plus whatever resolution progress has been made
/// against the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CustomerExtract {
    /// The customer text as it appeared in the spreadsheet.
    pub raw_text: String,
    /// Current resolution status.
    pub resolution_status: CustomerResolutionStatus,
    /// The resolved catalog customer's external id, once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_external_id: Option<String>,
    /// Candidate matches, populated when ambiguous or needing user input.
    #[serde(default)]
    pub candidates: Vec<CustomerCandidate>,
    /// Evidence cells backing the extracted text.
    #[serde(default)]
    pub evidence: Vec<EvidenceCell>,
}

impl CustomerExtract {
    /// Builds an unresolved customer extract from raw text and its
    /// backing evidence.
    pub fn new(raw_text: impl Into<String>, evidence: Vec<EvidenceCell>) -> Self {
        Self {
            raw_text: raw_text.into(),
            resolution_status: CustomerResolutionStatus::Unresolved,
            resolved_external_id: None,
            candidates: Vec::new(),
            evidence,
        }
    }
}

fn default_item_resolution_status() -> ItemResolutionStatus {
    ItemResolutionStatus::Unresolved
}

/// How far along item resolution has gotten for a [`LineItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ItemResolutionStatus {
    /// The resolver has not run yet.
    Unresolved,
    /// Exactly one catalog entry matched unambiguously.
    Resolved,
    /// More than one catalog entry matched via the same matching stage.
    Ambiguous,
    /// No catalog entry matched by SKU, GTIN, or (if enabled) fuzzy name.
    NotFound,
}

/// A catalog item considered as a candidate match during resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ItemCandidate {
    /// The catalog item's external identifier.
    pub external_id: String,
    /// The catalog's display name for this item.
    pub name: String,
    /// Similarity score against the extracted text, in `[0, 1]`. `1.0`
    /// for exact SKU/GTIN matches.
    pub similarity: f64,
}

/// A single extracted line item.
///
/// `unit_price_resolved`, when set, is the authoritative price;
/// `unit_price_source` is the spreadsheet's own price and is audit-only
/// (never used for submission or totals).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LineItem {
    /// 0-based position of this line within the extracted row order.
    pub row_index: u32,
    /// Current item-resolution status.
    #[serde(default = "default_item_resolution_status")]
    pub resolution_status: ItemResolutionStatus,
    /// Candidate matches, populated when ambiguous.
    #[serde(default)]
    pub item_candidates: Vec<ItemCandidate>,
    /// Extracted SKU, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    /// Extracted GTIN, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtin: Option<String>,
    /// Extracted product name, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    /// Parsed quantity. `0` is legal and never warns.
    pub quantity: f64,
    /// Unit price as it appeared in the spreadsheet. Audit-only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price_source: Option<f64>,
    /// Unit price as resolved from the external catalog. Authoritative
    /// once set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price_resolved: Option<f64>,
    /// Line total as it appeared in the spreadsheet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_total_source: Option<f64>,
    /// ISO 4217 currency code, if detected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// The resolved catalog item's external id, once resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_external_id: Option<String>,
    /// Per-field evidence cells, keyed by canonical field name (`"sku"`,
    /// `"quantity"`, `"unit_price_source"`, `"line_total_source"`, ...).
    #[serde(default)]
    pub evidence: std::collections::BTreeMap<String, EvidenceCell>,
}

impl LineItem {
    /// The authoritative unit price: the resolved catalog price if set,
    /// otherwise the spreadsheet's own price.
    ///
    /// Per the system's no-silent-pricing rule, once `unit_price_resolved`
    /// is set it always wins; `unit_price_source` is never consulted after
    /// resolution.
    pub fn authoritative_unit_price(&self) -> Option<f64> {
        self.unit_price_resolved.or(self.unit_price_source)
    }

    /// `true` if quantity, source price, and source total are all present,
    /// making this line eligible for the arithmetic check.
    pub fn has_arithmetic_inputs(&self) -> bool {
        self.unit_price_source.is_some() && self.line_total_source.is_some()
    }

    /// Checks `|qty*price - total| <= max(abs_tol, rel_tol * max(|qty*price|, |total|, 1))`
    /// against the source price and total, returning `None` if either input
    /// is missing.
    pub fn arithmetic_mismatch(&self, abs_tol: f64, rel_tol: f64) -> Option<bool> {
        let price = self.unit_price_source?;
        let total = self.line_total_source?;
        let computed = self.quantity * price;
        let diff = (computed - total).abs();
        let bound = abs_tol.max(rel_tol * computed.abs().max(total.abs()).max(1.0));
        Some(diff > bound)
    }
}

/// Extracted order totals, each optionally backed by evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Totals {
    /// Subtotal before tax.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtotal: Option<f64>,
    /// Tax amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax: Option<f64>,
    /// Grand total.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grand: Option<f64>,
    /// Evidence cells for whichever of the above were extracted, keyed by
    /// `"subtotal"`, `"tax"`, `"grand"`.
    #[serde(default)]
    pub evidence: std::collections::BTreeMap<String, EvidenceCell>,
}

/// How a column-to-field mapping was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MappingMethod {
    /// The deterministic extractor's weighted scoring chose this mapping
    /// unassisted.
    Deterministic,
    /// The committee's aggregated vote chose this mapping.
    Committee,
    /// A user explicitly corrected this mapping.
    UserCorrection,
}

/// A single canonical-field-to-column mapping decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ColumnMapping {
    /// The canonical field name, e.g. `"sku"`, `"unit_price"`.
    pub field: String,
    /// The spreadsheet column identifier selected for this field, or
    /// `None` if no column scored above the mapping floor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column_id: Option<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// How the mapping was decided.
    pub method: MappingMethod,
}

/// Sheet- and header-selection results plus the resolved column mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SchemaInference {
    /// Name of the sheet chosen as the data sheet.
    pub selected_sheet: String,
    /// 0-based index of the row chosen as the header row.
    pub header_row: u32,
    /// Resolved mapping of canonical fields to spreadsheet columns.
    pub column_mappings: Vec<ColumnMapping>,
}

/// Per-stage and overall confidence for a [`CanonicalOrder`].
///
/// `overall` is defined as the minimum of the per-stage confidences: the
/// extractor never reports an overall confidence higher than its least
/// confident stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Confidence {
    /// The minimum of all per-stage confidences. Always in `[0, 1]`.
    pub overall: f64,
    /// Per-stage confidence, keyed by stage name (`"sheet_selection"`,
    /// `"header_detection"`, `"column_mapping"`, `"committee"`,
    /// `"resolution"`).
    pub per_stage: std::collections::BTreeMap<String, f64>,
}

impl Confidence {
    /// Builds a `Confidence` from per-stage scores, computing `overall` as
    /// their minimum. Returns `overall = 1.0` if `per_stage` is empty.
    pub fn from_stages(per_stage: std::collections::BTreeMap<String, f64>) -> Self {
        let overall = per_stage.values().copied().fold(f64::INFINITY, f64::min);
        let overall = if overall.is_finite() { overall } else { 1.0 };
        Self { overall, per_stage }
    }
}

/// A user or system approval decision recorded against a [`CanonicalOrder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Approval {
    /// The user id that granted or denied approval.
    pub user_id: String,
    /// `true` if approved, `false` if rejected (returning the case to
    /// corrections).
    pub approved: bool,
    /// When the decision was recorded.
    pub decided_at: DateTime<Utc>,
}

/// Linkage to the order this case produced in the external system, once
/// resolved by the submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ExternalSystemLinkage {
    /// The external system's order identifier.
    pub external_order_id: String,
    /// The order status in the external system. Always `"draft"`: this
    /// system never posts a non-draft order.
    pub status: String,
}

/// The core extracted entity: a canonical, evidence-linked representation
/// of one spreadsheet order.
///
/// Once written, a `CanonicalOrder` is treated as immutable. A correction
/// produces a new version with its own evidence cells; the event log
/// retains a pointer to the prior version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CanonicalOrder {
    /// Identity and provenance.
    pub meta: OrderMeta,
    /// The extracted customer and its resolution state.
    pub customer: CustomerExtract,
    /// Extracted line items. Non-empty unless the case failed with
    /// `NO_LINE_ITEMS`.
    pub line_items: Vec<LineItem>,
    /// Extracted totals.
    pub totals: Totals,
    /// Sheet/header/column mapping decisions.
    pub schema_inference: SchemaInference,
    /// Per-stage and overall confidence.
    pub confidence: Confidence,
    /// Issues raised against this order so far.
    #[serde(default)]
    pub issues: Vec<Issue>,
    /// Approval decisions recorded against this order.
    #[serde(default)]
    pub approvals: Vec<Approval>,
    /// Linkage to the external system's draft order, once created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_linkage: Option<ExternalSystemLinkage>,
}

impl CanonicalOrder {
    /// `true` if any issue attached to this order is a blocker.
    pub fn has_blocking_issues(&self) -> bool {
        self.issues.iter().any(Issue::is_blocking)
    }

    /// `true` if every line item carries evidence for every field it has a
    /// value for. This is the cheap half of the "every scalar has
    /// evidence" invariant; the other half (the A1 reference actually
    /// exists in the decoded workbook) can only be checked against the
    /// decoded sheet matrix, outside this type.
    pub fn line_items_have_evidence_for_set_fields(&self) -> bool {
        self.line_items.iter().all(|item| {
            (item.sku.is_none() || item.evidence.contains_key("sku"))
                && (item.gtin.is_none() || item.evidence.contains_key("gtin"))
                && (item.product_name.is_none() || item.evidence.contains_key("product_name"))
                && item.evidence.contains_key("quantity")
        })
    }
}
