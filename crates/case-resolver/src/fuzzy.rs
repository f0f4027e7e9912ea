//! Normalized edit-distance similarity, used by both customer and item
//! fuzzy matching. No string-similarity crate is in the dependency stack,
//! so this hand-rolls a small Levenshtein distance rather than adding one.

/// Computes the Levenshtein edit distance between `a` and `b`.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            current[j + 1] = (previous[j] + cost).min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Normalized edit-distance similarity in `[0, 1]`: `1.0` for identical
/// strings, `0.0` when the edit distance equals the longer string's
/// length.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let max_len = a_chars.len().max(b_chars.len());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein(&a_chars, &b_chars);
    1.0 - (distance as f64 / max_len as f64)
}

/// One scored candidate from a top-K fuzzy search.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate<T> {
    /// The candidate item.
    pub value: T,
    /// Its similarity score against the query, in `[0, 1]`.
    pub score: f64,
}

/// Scores every candidate against `query` and returns the top `k` by
/// descending score.
pub fn top_k<T: Clone>(query: &str, candidates: impl Iterator<Item = (T, String)>, k: usize) -> Vec<ScoredCandidate<T>> {
    let mut scored: Vec<ScoredCandidate<T>> =
        candidates.map(|(value, text)| ScoredCandidate { value, score: similarity(query, &text) }).collect();
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_score_one() {
        assert_eq!(similarity("acme corp", "acme corp"), 1.0);
    }

    #[test]
    fn completely_different_strings_score_near_zero() {
        assert!(similarity("abc", "xyz") < 0.1);
    }

    #[test]
    fn single_character_typo_scores_high() {
        assert!(similarity("acme corp", "acme corq") > 0.85);
    }

    #[test]
    fn empty_strings_score_one() {
        assert_eq!(similarity("", ""), 1.0);
    }

    #[test]
    fn top_k_truncates_and_orders_descending() {
        let candidates = vec![("a".to_string(), "acme corp".to_string()), ("b".to_string(), "widgets inc".to_string()), ("c".to_string(), "acme corq".to_string())];
        let results = top_k("acme corp", candidates.into_iter(), 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].value, "a");
        assert!(results[0].score >= results[1].score);
    }
}
