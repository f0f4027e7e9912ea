//! Evidence cells: the `(sheet, A1, raw)` pointers that back every extracted
//! scalar.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A single `(sheet_name, A1_cell, raw_value)` pointer into the decoded
/// workbook, optionally carrying the display value and number format the
/// decoder observed.
///
/// Immutable once written: an `EvidenceCell` is never edited in place. A
/// correction to an extracted value produces a new `CanonicalOrder` version
/// with its own evidence cells; the old ones remain in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EvidenceCell {
    /// The worksheet the cell came from.
    pub sheet_name: String,
    /// The A1-style cell reference, e.g. `"C14"`.
    pub a1_cell: String,
    /// The raw value as decoded, before digit normalization or number
    /// parsing.
    pub raw_value: String,
    /// The value as displayed in the original workbook, if the decoder
    /// captured a distinct display string (e.g. currency formatting).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_value: Option<String>,
    /// The cell's number format string, if any (e.g. `"#,##0.00"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_format: Option<String>,
}

impl EvidenceCell {
    /// Builds an evidence cell from a sheet name, cell reference, and raw
    /// value, leaving the optional display fields unset.
    pub fn new(sheet_name: impl Into<String>, a1_cell: impl Into<String>, raw_value: impl Into<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            a1_cell: a1_cell.into(),
            raw_value: raw_value.into(),
            display_value: None,
            number_format: None,
        }
    }

    /// Sets the display value, consuming and returning `self`.
    #[must_use]
    pub fn with_display_value(mut self, display_value: impl Into<String>) -> Self {
        self.display_value = Some(display_value.into());
        self
    }

    /// Sets the number format, consuming and returning `self`.
    #[must_use]
    pub fn with_number_format(mut self, number_format: impl Into<String>) -> Self {
        self.number_format = Some(number_format.into());
        self
    }
}
