//! Header-row detection: score each candidate row by headerness.

use crate::sheet::SheetMatrix;

/// Tokens that mark a row as a totals/summary row rather than a header or
/// data row, compared case-insensitively.
const TOTALS_TOKENS: &[&str] = &["total", "subtotal", "grand total", "sum", "جمع", "مجموع"];

/// A scored header-row candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderCandidate {
    /// 0-based row index within the sheet.
    pub row_index: usize,
    /// Headerness score in `[0, 1]`.
    pub score: f64,
}

fn is_totals_row(row: &[crate::sheet::Cell]) -> bool {
    row.iter().any(|cell| {
        let lower = cell.raw_value.to_lowercase();
        TOTALS_TOKENS.iter().any(|token| lower.contains(token))
    })
}

fn non_empty_ratio(row: &[crate::sheet::Cell]) -> f64 {
    if row.is_empty() {
        return 0.0;
    }
    let filled = row.iter().filter(|c| !c.raw_value.trim().is_empty()).count();
    filled as f64 / row.len() as f64
}

fn text_ratio(row: &[crate::sheet::Cell]) -> f64 {
    let non_empty: Vec<&crate::sheet::Cell> = row.iter().filter(|c| !c.raw_value.trim().is_empty()).collect();
    if non_empty.is_empty() {
        return 0.0;
    }
    let text_cells = non_empty.iter().filter(|c| c.raw_value.trim().parse::<f64>().is_err()).count();
    text_cells as f64 / non_empty.len() as f64
}

/// Rewards rows whose non-empty cell lengths cluster in a short,
/// label-like range (2-24 characters) rather than being uniformly short
/// (likely codes) or long (likely free text / a title row).
fn length_distribution_score(row: &[crate::sheet::Cell]) -> f64 {
    let lengths: Vec<usize> =
        row.iter().filter(|c| !c.raw_value.trim().is_empty()).map(|c| c.raw_value.trim().chars().count()).collect();
    if lengths.is_empty() {
        return 0.0;
    }
    let in_range = lengths.iter().filter(|&&len| (2..=24).contains(&len)).count();
    in_range as f64 / lengths.len() as f64
}

/// Scores a single row's plausibility as a header row, combining
/// non-empty ratio, text-vs-number ratio, label-length distribution, and
/// absence of totals tokens. Totals rows score `0.0` outright.
pub fn score_row(row: &[crate::sheet::Cell]) -> f64 {
    if is_totals_row(row) {
        return 0.0;
    }
    let weights = [non_empty_ratio(row), text_ratio(row), length_distribution_score(row)];
    weights.iter().sum::<f64>() / weights.len() as f64
}

/// Scores every row of `sheet` as a header candidate and returns them
/// ordered by descending score. Title rows (mostly empty, or a single
/// filled cell) score low naturally and need no special casing.
pub fn candidate_rows(sheet: &SheetMatrix) -> Vec<HeaderCandidate> {
    let mut candidates: Vec<HeaderCandidate> =
        sheet.rows.iter().enumerate().map(|(row_index, row)| HeaderCandidate { row_index, score: score_row(row) }).collect();
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

/// `true` when the best and runner-up header candidates score within
/// `margin` of each other, meaning detection is ambiguous.
pub fn is_ambiguous(candidates: &[HeaderCandidate], margin: f64) -> bool {
    match candidates {
        [best, runner_up, ..] => (best.score - runner_up.score).abs() < margin,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::Cell;

    fn cell(raw: &str) -> Cell {
        Cell { a1: "A1".to_string(), raw_value: raw.to_string(), is_formula: false, number_format: None, hidden: false }
    }

    #[test]
    fn header_row_scores_higher_than_title_row() {
        let title = vec![cell("Order Summary")];
        let header = vec![cell("SKU"), cell("Quantity"), cell("Unit Price"), cell("Total")];
        assert!(score_row(&header) > score_row(&title));
    }

    #[test]
    fn totals_row_scores_zero() {
        let row = vec![cell("Grand Total"), cell(""), cell("255.00")];
        assert_eq!(score_row(&row), 0.0);
    }

    #[test]
    fn data_row_scores_lower_than_header_row() {
        let header = vec![cell("SKU"), cell("Quantity"), cell("Unit Price")];
        let data = vec![cell("SKU-001"), cell("10"), cell("25.50")];
        assert!(score_row(&header) >= score_row(&data));
    }

    #[test]
    fn ambiguity_detected_within_margin() {
        let candidates = vec![
            HeaderCandidate { row_index: 0, score: 0.85 },
            HeaderCandidate { row_index: 1, score: 0.80 },
        ];
        assert!(is_ambiguous(&candidates, 0.1));
        assert!(!is_ambiguous(&candidates, 0.01));
    }
}
