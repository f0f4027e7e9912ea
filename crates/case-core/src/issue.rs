//! Issues attached to a case by the extractor, committee, and resolver.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::evidence::EvidenceCell;

/// Severity of an [`Issue`]. Only [`Severity::Blocker`] prevents submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational; never shown as a problem.
    Info,
    /// Worth surfacing but does not block progress.
    Warning,
    /// Surfaced prominently; does not by itself block submission.
    Error,
    /// Prevents submission until resolved.
    Blocker,
}

/// The enumerated error-taxonomy codes an [`Issue`] can carry, per the
/// system's validation, committee, and external error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    /// A formula marker was found inside a plausible data region.
    FormulasBlocked,
    /// No customer could be extracted from the workbook.
    MissingCustomer,
    /// The customer text matched more than one catalog entry within the
    /// ambiguity margin.
    AmbiguousCustomer,
    /// The customer text matched no catalog entry above the low threshold.
    CustomerNotFound,
    /// A line item is missing an item identifier entirely.
    MissingItem,
    /// A line item's SKU/GTIN/name matched more than one catalog entry.
    AmbiguousItem,
    /// A line item's SKU/GTIN/name matched no catalog entry.
    ItemNotFound,
    /// `|qty*price - total|` exceeded the configured tolerance.
    ArithmeticMismatch,
    /// A quantity value could not be parsed or was negative.
    InvalidQuantity,
    /// A price value could not be parsed or was negative.
    InvalidPrice,
    /// A GTIN failed length or check-digit validation.
    InvalidGtin,
    /// A canonical field had no column mapping at all.
    MissingRequiredField,
    /// No line items survived row extraction.
    NoLineItems,
    /// The workbook decoded but contained no usable rows at all.
    EmptySpreadsheet,
    /// Two or more sheets scored within the sheet-selection ambiguity
    /// margin.
    MultipleSheetCandidates,
    /// Two or more rows scored within the header-detection ambiguity
    /// margin.
    MultipleHeaderCandidates,
    /// The same item identifier appeared in more than one extracted row.
    DuplicateLineItem,
    /// The committee's valid votes did not converge on a winner.
    CommitteeDisagreement,
    /// Fewer than two valid committee votes were returned.
    CommitteeUnavailable,
    /// A committee or resolver result scored below the confidence floor.
    LowConfidence,
    /// A numeric cell parsed under a different thousands/decimal
    /// convention than the majority of its column.
    MixedNumberStyle,
}

/// An issue raised against a case by the extractor, committee, or resolver.
///
/// Blockers ([`Severity::Blocker`]) prevent submission until resolved;
/// everything else is informational or surfaced to the user for optional
/// action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Issue {
    /// The taxonomy code identifying what went wrong.
    pub code: IssueCode,
    /// How severe the issue is.
    pub severity: Severity,
    /// A human-readable message suitable for rendering in a chat card.
    pub message: String,
    /// Canonical field names this issue affects, e.g. `"line_items[2].quantity"`.
    #[serde(default)]
    pub affected_fields: Vec<String>,
    /// Evidence cells backing the issue, if any.
    #[serde(default)]
    pub evidence: Vec<EvidenceCell>,
    /// A short instruction for what the user should do, if actionable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_user_action: Option<String>,
}

impl Issue {
    /// Builds an issue with no affected fields, evidence, or suggested
    /// action set.
    pub fn new(code: IssueCode, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code,
            severity,
            message: message.into(),
            affected_fields: Vec::new(),
            evidence: Vec::new(),
            suggested_user_action: None,
        }
    }

    /// Appends an affected field name, consuming and returning `self`.
    #[must_use]
    pub fn with_affected_field(mut self, field: impl Into<String>) -> Self {
        self.affected_fields.push(field.into());
        self
    }

    /// Appends an evidence cell, consuming and returning `self`.
    #[must_use]
    pub fn with_evidence(mut self, cell: EvidenceCell) -> Self {
        self.evidence.push(cell);
        self
    }

    /// Sets the suggested user action, consuming and returning `self`.
    #[must_use]
    pub fn with_suggested_user_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_user_action = Some(action.into());
        self
    }

    /// `true` if this issue's severity prevents submission.
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocker
    }
}
