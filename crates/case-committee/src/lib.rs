// SPDX-License-Identifier: MIT OR Apache-2.0
//! case-committee
//!
//! The multi-provider mapping committee: selects a diverse 3-provider
//! panel, fans requests out in parallel under a per-provider timeout,
//! validates each response against the evidence-pack contract, and
//! aggregates the valid votes into a merged column mapping with
//! consensus metadata.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Weighted vote aggregation.
pub mod aggregate;
/// Offline provider-weight calibration.
pub mod calibrate;
/// The provider contract: evidence packs in, validated votes out.
pub mod provider;
/// Diverse provider selection.
pub mod selection;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use case_core::{ColumnMapping, Issue, IssueCode, MappingMethod, Severity};

use aggregate::{aggregate_field, ConsensusLabel, FieldAggregate};
use calibrate::WeightsFile;
use provider::{validate_output, EvidencePack, ProviderBackend, ProviderDescriptor, ProviderOutput};
use selection::select_providers;

/// The full result of one committee round.
#[derive(Debug, Clone)]
pub struct CommitteeResult {
    /// The merged column mapping, one entry per requested field.
    pub column_mappings: Vec<ColumnMapping>,
    /// Issues raised by the committee round itself (not by individual
    /// providers, whose issues are folded into `requires_human_input`
    /// and the per-field aggregates).
    pub issues: Vec<Issue>,
    /// `true` if any field's result needs a human decision, or if fewer
    /// than 2 valid votes were returned.
    pub requires_human_input: bool,
    /// Per-field consensus labels, for the audit record.
    pub consensus: BTreeMap<String, ConsensusLabel>,
    /// The providers actually selected for this round.
    pub selected_providers: Vec<ProviderDescriptor>,
    /// The seed used for selection, for replay.
    pub seed: u64,
}

/// Runs one committee round: selects providers, invokes them in
/// parallel under `per_provider_timeout`, validates and aggregates their
/// votes.
pub async fn run_committee(
    pack: &EvidencePack,
    providers: &[Arc<dyn ProviderBackend>],
    weights: &WeightsFile,
    seed: u64,
    per_provider_timeout: Duration,
    ambiguity_margin: f64,
    no_consensus_floor_fraction: f64,
) -> CommitteeResult {
    let descriptors: Vec<ProviderDescriptor> = providers.iter().map(|p| p.descriptor()).collect();
    let selected = select_providers(&descriptors, seed);
    let selected_backends: Vec<&Arc<dyn ProviderBackend>> =
        selected.iter().filter_map(|d| providers.iter().find(|p| p.descriptor() == *d)).collect();

    let invocations = selected_backends.iter().map(|backend| {
        let backend = Arc::clone(*backend);
        let pack = pack.clone();
        async move {
            let descriptor = backend.descriptor();
            match tokio::time::timeout(per_provider_timeout, backend.propose(&pack, per_provider_timeout)).await {
                Ok(Ok(output)) => match validate_output(&pack, &output) {
                    Ok(()) => Some((descriptor, output)),
                    Err(error) => {
                        tracing::warn!(provider = %descriptor.id, %error, "discarding invalid committee vote");
                        None
                    }
                },
                Ok(Err(error)) => {
                    tracing::warn!(provider = %descriptor.id, %error, "committee provider returned an error");
                    None
                }
                Err(_) => {
                    tracing::warn!(provider = %descriptor.id, "committee provider timed out");
                    None
                }
            }
        }
    });

    let valid_votes: Vec<(ProviderDescriptor, ProviderOutput)> = futures::future::join_all(invocations).await.into_iter().flatten().collect();

    let mut issues = Vec::new();
    let mut requires_human_input = valid_votes.len() < 2;

    if valid_votes.is_empty() {
        issues.push(Issue::new(IssueCode::CommitteeUnavailable, Severity::Blocker, "no valid committee votes were returned"));
        return CommitteeResult {
            column_mappings: pack
                .fields
                .iter()
                .map(|field| ColumnMapping { field: field.clone(), column_id: None, confidence: 0.0, method: MappingMethod::Committee })
                .collect(),
            issues,
            requires_human_input: true,
            consensus: BTreeMap::new(),
            selected_providers: selected,
            seed,
        };
    }

    let mut column_mappings = Vec::with_capacity(pack.fields.len());
    let mut consensus = BTreeMap::new();

    for field in &pack.fields {
        let field_votes: Vec<(&ProviderDescriptor, &provider::MappingVote, f64)> = valid_votes
            .iter()
            .filter_map(|(descriptor, output)| {
                output.mappings.iter().find(|v| &v.field == field).map(|vote| (descriptor, vote, weights.weight_for(&descriptor.id)))
            })
            .collect();

        let FieldAggregate { winner, winner_score, consensus: label, requires_human_input: field_needs_review, .. } =
            aggregate_field(field, &field_votes, ambiguity_margin, no_consensus_floor_fraction);

        if field_needs_review {
            requires_human_input = true;
            issues.push(
                Issue::new(IssueCode::LowConfidence, Severity::Warning, format!("committee mapping for '{field}' needs human review"))
                    .with_affected_field(field.clone()),
            );
        }
        if label == ConsensusLabel::NoConsensus || label == ConsensusLabel::Split {
            issues.push(
                Issue::new(IssueCode::CommitteeDisagreement, Severity::Warning, format!("committee providers disagreed on '{field}'"))
                    .with_affected_field(field.clone()),
            );
        }

        consensus.insert(field.clone(), label);
        column_mappings.push(ColumnMapping { field: field.clone(), column_id: winner, confidence: winner_score, method: MappingMethod::Committee });
    }

    CommitteeResult { column_mappings, issues, requires_human_input, consensus, selected_providers: selected, seed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use provider::{ColumnSummary, MappingVote};

    struct StubProvider {
        descriptor: ProviderDescriptor,
        vote: Option<String>,
        confidence: f64,
        slow: bool,
    }

    #[async_trait]
    impl ProviderBackend for StubProvider {
        fn descriptor(&self) -> ProviderDescriptor {
            self.descriptor.clone()
        }

        async fn propose(&self, pack: &EvidencePack, _timeout: Duration) -> anyhow::Result<ProviderOutput> {
            if self.slow {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(ProviderOutput {
                mappings: pack
                    .fields
                    .iter()
                    .map(|field| MappingVote {
                        field: field.clone(),
                        selected_column_id: self.vote.clone(),
                        confidence: self.confidence,
                        reasoning: "stub".to_string(),
                    })
                    .collect(),
                issues: vec![],
                overall_confidence: self.confidence,
                processing_time_ms: 1,
            })
        }
    }

    fn pack() -> EvidencePack {
        EvidencePack {
            columns: vec![ColumnSummary::bounded("0", "SKU", &["SKU-001".to_string()])],
            fields: vec!["sku".to_string()],
            language_hint: "en".to_string(),
            constraints: vec![],
        }
    }

    fn stub(id: &str, family: &str, vote: Option<&str>, confidence: f64) -> Arc<dyn ProviderBackend> {
        Arc::new(StubProvider {
            descriptor: ProviderDescriptor { id: id.to_string(), family: family.to_string() },
            vote: vote.map(str::to_string),
            confidence,
            slow: false,
        })
    }

    #[tokio::test]
    async fn unanimous_agreement_produces_a_winner_with_no_review_needed() {
        let providers = vec![stub("p1", "fam-a", Some("0"), 0.9), stub("p2", "fam-b", Some("0"), 0.85), stub("p3", "fam-c", Some("0"), 0.95)];
        let result = run_committee(&pack(), &providers, &WeightsFile::default(), 1, Duration::from_secs(1), 0.1, 0.5).await;
        assert!(!result.requires_human_input);
        assert_eq!(result.column_mappings[0].column_id.as_deref(), Some("0"));
        assert_eq!(result.consensus["sku"], ConsensusLabel::Unanimous);
    }

    #[tokio::test]
    async fn timed_out_provider_vote_is_discarded() {
        let providers = vec![
            stub("p1", "fam-a", Some("0"), 0.9),
            stub("p2", "fam-b", Some("0"), 0.85),
            Arc::new(StubProvider { descriptor: ProviderDescriptor { id: "p3".to_string(), family: "fam-c".to_string() }, vote: Some("0".to_string()), confidence: 0.9, slow: true }),
        ];
        let result = run_committee(&pack(), &providers, &WeightsFile::default(), 1, Duration::from_millis(10), 0.1, 0.5).await;
        assert!(!result.requires_human_input);
        assert_eq!(result.column_mappings[0].column_id.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn zero_valid_votes_yields_committee_unavailable() {
        let providers: Vec<Arc<dyn ProviderBackend>> = vec![Arc::new(StubProvider {
            descriptor: ProviderDescriptor { id: "p1".to_string(), family: "fam-a".to_string() },
            vote: Some("0".to_string()),
            confidence: 0.9,
            slow: true,
        })];
        let result = run_committee(&pack(), &providers, &WeightsFile::default(), 1, Duration::from_millis(5), 0.1, 0.5).await;
        assert!(result.requires_human_input);
        assert!(result.issues.iter().any(|i| i.code == IssueCode::CommitteeUnavailable));
    }

    #[tokio::test]
    async fn exactly_one_valid_vote_flags_requires_human_input() {
        let providers = vec![
            stub("p1", "fam-a", Some("0"), 0.9),
            Arc::new(StubProvider { descriptor: ProviderDescriptor { id: "p2".to_string(), family: "fam-b".to_string() }, vote: Some("0".to_string()), confidence: 0.9, slow: true }),
        ];
        let result = run_committee(&pack(), &providers, &WeightsFile::default(), 1, Duration::from_millis(5), 0.1, 0.5).await;
        assert!(result.requires_human_input);
    }
}
