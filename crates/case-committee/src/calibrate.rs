//! Offline calibration: score providers against a golden set and update
//! their weights, normalized to sum to the number of active providers.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::provider::MappingVote;

/// A single golden-set example: the field/column answer a correct
/// provider should have produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldenExample {
    /// The canonical field.
    pub field: String,
    /// The correct column id, or `None` if no column should be selected.
    pub expected_column_id: Option<String>,
}

/// Per-provider weights, keyed by provider id. Loaded from and written
/// to a signed config file (or persistent store) in production; this
/// type only knows how to (de)serialize the map itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightsFile {
    /// Provider id to scalar weight, default `1.0`.
    pub weights: BTreeMap<String, f64>,
}

impl WeightsFile {
    /// Loads a weights file from `path`.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Writes this weights file to `path`.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let contents = serde_json::to_string_pretty(self).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, contents)
    }

    /// This provider's weight, defaulting to `1.0` if unset.
    pub fn weight_for(&self, provider_id: &str) -> f64 {
        self.weights.get(provider_id).copied().unwrap_or(1.0)
    }

    /// Normalizes the weight vector so it sums to `active_providers`
    /// (the number of currently-selected providers), preserving relative
    /// proportions.
    pub fn normalize(&mut self, active_providers: usize) {
        if self.weights.is_empty() || active_providers == 0 {
            return;
        }
        let total: f64 = self.weights.values().sum();
        if total <= 0.0 {
            return;
        }
        let target = active_providers as f64;
        for weight in self.weights.values_mut() {
            *weight = *weight / total * target;
        }
    }
}

/// Scores one provider's votes against a golden set: the fraction of
/// golden examples the provider's votes matched exactly.
///
/// Votes for fields absent from the golden set are ignored; golden
/// fields absent from the provider's votes count as misses.
pub fn score_against_golden_set(votes: &[MappingVote], golden: &[GoldenExample]) -> f64 {
    if golden.is_empty() {
        return 1.0;
    }
    let by_field: BTreeMap<&str, &MappingVote> = votes.iter().map(|v| (v.field.as_str(), v)).collect();
    let matches = golden
        .iter()
        .filter(|example| by_field.get(example.field.as_str()).map(|v| v.selected_column_id == example.expected_column_id).unwrap_or(false))
        .count();
    matches as f64 / golden.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MappingVote;

    fn vote(field: &str, column: Option<&str>) -> MappingVote {
        MappingVote { field: field.to_string(), selected_column_id: column.map(str::to_string), confidence: 0.9, reasoning: String::new() }
    }

    #[test]
    fn scores_perfect_match_as_one() {
        let votes = vec![vote("sku", Some("0")), vote("quantity", Some("1"))];
        let golden = vec![
            GoldenExample { field: "sku".to_string(), expected_column_id: Some("0".to_string()) },
            GoldenExample { field: "quantity".to_string(), expected_column_id: Some("1".to_string()) },
        ];
        assert_eq!(score_against_golden_set(&votes, &golden), 1.0);
    }

    #[test]
    fn scores_partial_match() {
        let votes = vec![vote("sku", Some("0")), vote("quantity", Some("9"))];
        let golden = vec![
            GoldenExample { field: "sku".to_string(), expected_column_id: Some("0".to_string()) },
            GoldenExample { field: "quantity".to_string(), expected_column_id: Some("1".to_string()) },
        ];
        assert_eq!(score_against_golden_set(&votes, &golden), 0.5);
    }

    #[test]
    fn missing_golden_field_counts_as_a_miss() {
        let votes = vec![vote("sku", Some("0"))];
        let golden = vec![GoldenExample { field: "quantity".to_string(), expected_column_id: Some("1".to_string()) }];
        assert_eq!(score_against_golden_set(&votes, &golden), 0.0);
    }

    #[test]
    fn weights_default_to_one() {
        let weights = WeightsFile::default();
        assert_eq!(weights.weight_for("anything"), 1.0);
    }

    #[test]
    fn normalize_preserves_proportions_and_sums_to_target() {
        let mut weights = WeightsFile { weights: BTreeMap::from([("a".to_string(), 2.0), ("b".to_string(), 2.0)]) };
        weights.normalize(3);
        assert!((weights.weights["a"] - 1.5).abs() < 1e-9);
        assert!((weights.weights.values().sum::<f64>() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn load_and_save_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");
        let weights = WeightsFile { weights: BTreeMap::from([("p1".to_string(), 1.2)]) };
        weights.save(&path).unwrap();
        let loaded = WeightsFile::load(&path).unwrap();
        assert_eq!(loaded, weights);
    }
}
