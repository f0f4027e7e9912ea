//! Weighted aggregation of valid committee votes into a merged mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::provider::{MappingVote, ProviderDescriptor};

/// How strongly the valid votes for a field agreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusLabel {
    /// All valid votes agreed on a non-null candidate.
    Unanimous,
    /// More than half of valid votes agreed.
    Majority,
    /// No candidate strictly exceeded half.
    Split,
    /// The winner's total weighted score fell below the no-consensus floor.
    NoConsensus,
}

/// One field's aggregated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldAggregate {
    /// The canonical field.
    pub field: String,
    /// The winning column id, `None` if every vote was null or there were
    /// no valid votes at all.
    pub winner: Option<String>,
    /// The winner's total weighted score.
    pub winner_score: f64,
    /// The runner-up's total weighted score (`0.0` if there wasn't one).
    pub runner_up_score: f64,
    /// How strongly the votes agreed.
    pub consensus: ConsensusLabel,
    /// `true` if the winner/runner-up gap is inside the ambiguity margin
    /// (regardless of `consensus`), meaning this needs human review.
    pub requires_human_input: bool,
}

/// Default fraction of the total weight a winner must clear to avoid
/// `no_consensus`.
pub const DEFAULT_NO_CONSENSUS_FLOOR_FRACTION: f64 = 0.5;

fn weighted_scores(votes: &[(&ProviderDescriptor, &MappingVote, f64)]) -> BTreeMap<String, f64> {
    let mut scores: BTreeMap<String, f64> = BTreeMap::new();
    for (_, vote, weight) in votes {
        if let Some(column_id) = &vote.selected_column_id {
            *scores.entry(column_id.clone()).or_insert(0.0) += vote.confidence * weight;
        }
    }
    scores
}

/// Aggregates one field's valid votes (each paired with its provider's
/// weight) into a [`FieldAggregate`].
///
/// `ambiguity_margin` and `no_consensus_floor_fraction` are both
/// expressed relative to the total weight of the valid votes supplied.
pub fn aggregate_field(
    field: &str,
    votes: &[(&ProviderDescriptor, &MappingVote, f64)],
    ambiguity_margin: f64,
    no_consensus_floor_fraction: f64,
) -> FieldAggregate {
    let total_weight: f64 = votes.iter().map(|(_, _, w)| w).sum();
    let scores = weighted_scores(votes);

    let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let (winner, winner_score) = ranked.first().cloned().map(|(id, s)| (Some(id), s)).unwrap_or((None, 0.0));
    let runner_up_score = ranked.get(1).map(|(_, s)| *s).unwrap_or(0.0);

    let non_null_votes: Vec<&(&ProviderDescriptor, &MappingVote, f64)> = votes.iter().filter(|(_, v, _)| v.selected_column_id.is_some()).collect();
    let agreeing_with_winner = winner
        .as_ref()
        .map(|w| non_null_votes.iter().filter(|(_, v, _)| v.selected_column_id.as_deref() == Some(w.as_str())).count())
        .unwrap_or(0);

    let floor = no_consensus_floor_fraction * total_weight;
    let consensus = if winner.is_none() || winner_score < floor {
        ConsensusLabel::NoConsensus
    } else if !non_null_votes.is_empty() && agreeing_with_winner == non_null_votes.len() {
        ConsensusLabel::Unanimous
    } else if (agreeing_with_winner as f64) > (non_null_votes.len() as f64) / 2.0 {
        ConsensusLabel::Majority
    } else {
        ConsensusLabel::Split
    };

    let requires_human_input = winner.is_some() && (winner_score - runner_up_score) < ambiguity_margin;

    FieldAggregate { field: field.to_string(), winner, winner_score, runner_up_score, consensus, requires_human_input }
}
