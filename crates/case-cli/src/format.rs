// SPDX-License-Identifier: MIT OR Apache-2.0
//! Output formatting for cases, orders, and committee results.

use std::fmt;
use std::str::FromStr;

use case_committee::CommitteeResult;
use case_core::{Case, CanonicalOrder};
use serde::{Deserialize, Serialize};

/// Supported output formats for CLI display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Pretty-printed JSON.
    Json,
    /// Key-value aligned table.
    Table,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Json => "json",
            Self::Table => "table",
        };
        f.write_str(s)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "table" => Ok(Self::Table),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Formats a [`Case`] according to `format`.
pub fn format_case(case: &Case, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(case).unwrap_or_default(),
        OutputFormat::Table => {
            let mut lines = Vec::new();
            lines.push(format!("{:<16} {}", "case_id", case.case_id));
            lines.push(format!("{:<16} {:?}", "status", case.status));
            lines.push(format!("{:<16} {}", "tenant_id", case.tenant_id));
            lines.push(format!("{:<16} {}", "uploader_id", case.uploader_id));
            lines.push(format!("{:<16} {}", "filename", case.source_filename));
            lines.push(format!("{:<16} {}", "created_at", case.created_at));
            lines.push(format!("{:<16} {}", "updated_at", case.updated_at));
            lines.join("\n")
        }
    }
}

/// Formats a list of [`Case`]s as one table row per case, or a JSON array.
pub fn format_case_list(cases: &[Case], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(cases).unwrap_or_default(),
        OutputFormat::Table => {
            let mut lines = vec![format!("{:<38} {:<28} {:<20} {}", "case_id", "status", "uploader_id", "filename")];
            for case in cases {
                lines.push(format!("{:<38} {:<28} {:<20} {}", case.case_id, format!("{:?}", case.status), case.uploader_id, case.source_filename));
            }
            lines.join("\n")
        }
    }
}

/// Formats a [`CanonicalOrder`] according to `format`.
pub fn format_order(order: &CanonicalOrder, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(order).unwrap_or_default(),
        OutputFormat::Table => {
            let mut lines = Vec::new();
            lines.push(format!("{:<16} {}", "case_id", order.meta.case_id));
            lines.push(format!("{:<16} {}", "customer", order.customer.raw_text));
            lines.push(format!("{:<16} {:?}", "customer_status", order.customer.resolution_status));
            lines.push(format!("{:<16} {}", "line_items", order.line_items.len()));
            lines.push(format!("{:<16} {}", "issues", order.issues.len()));
            lines.push(format!("{:<16} {:.3}", "overall_confidence", order.confidence.overall));
            lines.join("\n")
        }
    }
}

/// Formats a [`CommitteeResult`] according to `format`.
///
/// `CommitteeResult` itself isn't `Serialize` (it's an internal
/// computation result, not a wire type), so the `Json` variant assembles
/// a `serde_json::Value` from its already-`Serialize` fields.
pub fn format_committee_result(result: &CommitteeResult, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let value = serde_json::json!({
                "column_mappings": result.column_mappings,
                "issues": result.issues,
                "requires_human_input": result.requires_human_input,
                "consensus": result.consensus,
                "selected_providers": result.selected_providers,
                "seed": result.seed,
            });
            serde_json::to_string_pretty(&value).unwrap_or_default()
        }
        OutputFormat::Table => {
            let mut lines = Vec::new();
            lines.push(format!("{:<20} {}", "requires_human_input", result.requires_human_input));
            lines.push(format!("{:<20} {}", "selected_providers", result.selected_providers.len()));
            lines.push(format!("{:<20} {}", "column_mappings", result.column_mappings.len()));
            lines.push(format!("{:<20} {}", "issues", result.issues.len()));
            lines.join("\n")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_format_display_roundtrips() {
        for format in &[OutputFormat::Json, OutputFormat::Table] {
            let s = format.to_string();
            let parsed: OutputFormat = s.parse().unwrap();
            assert_eq!(&parsed, format);
        }
    }

    #[test]
    fn output_format_from_str_rejects_unknown() {
        assert!("nope".parse::<OutputFormat>().is_err());
    }
}
