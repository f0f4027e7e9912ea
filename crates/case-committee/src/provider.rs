//! The committee's provider contract: bounded evidence packs in, a
//! validated JSON mapping proposal out.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identifies one provider in the pool. `family` groups vendor/model
/// families so selection can enforce diversity (no two selected
/// providers share a family).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Stable provider id, e.g. `"vendor-a-mapper-v2"`.
    pub id: String,
    /// The vendor/model family this provider belongs to.
    pub family: String,
}

/// Maximum length of a header string included in an [`EvidencePack`]'s
/// column summaries.
pub const MAX_HEADER_CHARS: usize = 100;
/// Maximum number of non-empty sample values included per column.
pub const MAX_SAMPLES_PER_COLUMN: usize = 5;
/// Maximum length of a single sample value.
pub const MAX_SAMPLE_CHARS: usize = 200;

/// Per-column statistics bounded to the evidence-pack caps. No raw cell
/// data beyond these caps is ever included — this is both a privacy and
/// a cost boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    /// Stable column identifier (its 0-based index as a string).
    pub column_id: String,
    /// The header text, truncated to [`MAX_HEADER_CHARS`].
    pub header: String,
    /// Up to [`MAX_SAMPLES_PER_COLUMN`] non-empty sample values, each
    /// truncated to [`MAX_SAMPLE_CHARS`].
    pub samples: Vec<String>,
    /// Count of non-empty cells observed in this column.
    pub non_empty_count: usize,
    /// Count of distinct values observed in this column.
    pub unique_count: usize,
    /// Detected data types, e.g. `["numeric", "text"]`.
    pub detected_types: Vec<String>,
    /// Detected patterns, e.g. `["gtin_like", "currency_like"]`.
    pub detected_patterns: Vec<String>,
}

impl ColumnSummary {
    /// Builds a summary from raw values, truncating the header and
    /// sample values and capping the sample count to the evidence-pack
    /// bounds.
    pub fn bounded(column_id: impl Into<String>, header: &str, raw_samples: &[String]) -> Self {
        let truncate = |s: &str, max: usize| s.chars().take(max).collect::<String>();
        let samples: Vec<String> =
            raw_samples.iter().filter(|s| !s.trim().is_empty()).take(MAX_SAMPLES_PER_COLUMN).map(|s| truncate(s, MAX_SAMPLE_CHARS)).collect();
        let unique: BTreeSet<&String> = raw_samples.iter().collect();
        Self {
            column_id: column_id.into(),
            header: truncate(header, MAX_HEADER_CHARS),
            samples,
            non_empty_count: raw_samples.iter().filter(|s| !s.trim().is_empty()).count(),
            unique_count: unique.len(),
            detected_types: Vec::new(),
            detected_patterns: Vec::new(),
        }
    }
}

/// The bounded input handed to every committee provider. Deliberately
/// excludes raw full-column data, customer identity, and anything
/// beyond the enumerated column statistics and a handful of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidencePack {
    /// The candidate columns, in order.
    pub columns: Vec<ColumnSummary>,
    /// The canonical fields that need a mapping decision.
    pub fields: Vec<String>,
    /// Detected language hint (`"en"`, `"fa"`, `"ar"`, `"mixed"`, `"unknown"`).
    pub language_hint: String,
    /// Enumerated constraints the provider's output must satisfy,
    /// restated here for the provider's benefit (e.g. `"every field
    /// must have a mapping entry"`).
    pub constraints: Vec<String>,
}

/// Severity of a [`ProviderIssue`] as reported by a provider, independent
/// of [`case_core::Severity`] since providers speak a narrower vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSeverity {
    /// Informational.
    Info,
    /// Worth surfacing.
    Warning,
    /// Surfaced prominently.
    Error,
}

/// An issue a provider chose to report alongside its mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderIssue {
    /// A short code identifying the issue kind.
    pub code: String,
    /// The issue's severity.
    pub severity: ProviderSeverity,
    /// Free-text evidence the provider cited (bounded by the same caps
    /// as the evidence pack it was given).
    pub evidence: String,
}

/// One provider's proposed mapping for a single canonical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingVote {
    /// The canonical field this vote is for.
    pub field: String,
    /// The column id selected for `field`, or `None` if the provider
    /// found no suitable column.
    pub selected_column_id: Option<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// The provider's stated reasoning, for audit.
    pub reasoning: String,
}

/// A provider's full output for one committee round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutput {
    /// One vote per field the provider was asked about.
    pub mappings: Vec<MappingVote>,
    /// Issues the provider chose to surface.
    #[serde(default)]
    pub issues: Vec<ProviderIssue>,
    /// The provider's self-reported overall confidence.
    pub overall_confidence: f64,
    /// How long the provider took, in milliseconds.
    pub processing_time_ms: u64,
}

/// Why a provider's vote was discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A field from the evidence pack had no corresponding vote.
    #[error("missing mapping entry for field '{0}'")]
    MissingFieldEntry(String),
    /// A vote selected a column id outside the pack's candidate set.
    #[error("vote for field '{field}' selected unknown column '{column_id}'")]
    UnknownColumnId {
        /// The field the bad vote was for.
        field: String,
        /// The column id that wasn't in the candidate set.
        column_id: String,
    },
    /// A confidence value fell outside `[0, 1]`.
    #[error("vote for field '{0}' has confidence outside [0, 1]")]
    ConfidenceOutOfRange(String),
}

/// Validates `output` against the evidence pack's field and column-id
/// constraints: every field must have an entry, and every selected
/// column id must belong to the pack's candidate set.
pub fn validate_output(pack: &EvidencePack, output: &ProviderOutput) -> Result<(), ValidationError> {
    let candidate_ids: BTreeSet<&str> = pack.columns.iter().map(|c| c.column_id.as_str()).collect();
    let voted_fields: BTreeSet<&str> = output.mappings.iter().map(|v| v.field.as_str()).collect();

    for field in &pack.fields {
        if !voted_fields.contains(field.as_str()) {
            return Err(ValidationError::MissingFieldEntry(field.clone()));
        }
    }

    for vote in &output.mappings {
        if !(0.0..=1.0).contains(&vote.confidence) {
            return Err(ValidationError::ConfidenceOutOfRange(vote.field.clone()));
        }
        if let Some(column_id) = &vote.selected_column_id {
            if !candidate_ids.contains(column_id.as_str()) {
                return Err(ValidationError::UnknownColumnId { field: vote.field.clone(), column_id: column_id.clone() });
            }
        }
    }

    Ok(())
}

/// A committee provider: given a bounded evidence pack, proposes a
/// column mapping.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// This provider's descriptor (id and vendor family).
    fn descriptor(&self) -> ProviderDescriptor;

    /// Proposes a mapping for `pack`. Implementations should respect
    /// `timeout` themselves when possible, but callers also enforce it
    /// externally via [`tokio::time::timeout`].
    async fn propose(&self, pack: &EvidencePack, timeout: Duration) -> anyhow::Result<ProviderOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack() -> EvidencePack {
        EvidencePack {
            columns: vec![ColumnSummary::bounded("0", "SKU", &["SKU-001".to_string()])],
            fields: vec!["sku".to_string()],
            language_hint: "en".to_string(),
            constraints: vec![],
        }
    }

    #[test]
    fn column_summary_truncates_and_bounds_samples() {
        let long_header = "x".repeat(200);
        let samples: Vec<String> = (0..10).map(|i| format!("value-{i}")).collect();
        let summary = ColumnSummary::bounded("0", &long_header, &samples);
        assert_eq!(summary.header.chars().count(), MAX_HEADER_CHARS);
        assert_eq!(summary.samples.len(), MAX_SAMPLES_PER_COLUMN);
    }

    #[test]
    fn validate_rejects_missing_field_entry() {
        let output = ProviderOutput { mappings: vec![], issues: vec![], overall_confidence: 0.8, processing_time_ms: 10 };
        assert_eq!(validate_output(&pack(), &output), Err(ValidationError::MissingFieldEntry("sku".to_string())));
    }

    #[test]
    fn validate_rejects_unknown_column_id() {
        let output = ProviderOutput {
            mappings: vec![MappingVote { field: "sku".to_string(), selected_column_id: Some("99".to_string()), confidence: 0.9, reasoning: String::new() }],
            issues: vec![],
            overall_confidence: 0.8,
            processing_time_ms: 10,
        };
        assert!(matches!(validate_output(&pack(), &output), Err(ValidationError::UnknownColumnId { .. })));
    }

    #[test]
    fn validate_accepts_well_formed_output() {
        let output = ProviderOutput {
            mappings: vec![MappingVote { field: "sku".to_string(), selected_column_id: Some("0".to_string()), confidence: 0.9, reasoning: String::new() }],
            issues: vec![],
            overall_confidence: 0.9,
            processing_time_ms: 10,
        };
        assert!(validate_output(&pack(), &output).is_ok());
    }

    #[test]
    fn validate_rejects_out_of_range_confidence() {
        let output = ProviderOutput {
            mappings: vec![MappingVote { field: "sku".to_string(), selected_column_id: None, confidence: 1.5, reasoning: String::new() }],
            issues: vec![],
            overall_confidence: 0.5,
            processing_time_ms: 10,
        };
        assert_eq!(validate_output(&pack(), &output), Err(ValidationError::ConfidenceOutOfRange("sku".to_string())));
    }
}
