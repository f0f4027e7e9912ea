//! Sheet selection: pick the data sheet by its best header-candidate score.

use crate::header::candidate_rows;
use crate::sheet::Workbook;

/// A scored sheet candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetCandidate {
    /// Index into [`Workbook::sheets`].
    pub sheet_index: usize,
    /// The name of the sheet.
    pub sheet_name: String,
    /// The best header-row score found anywhere in the sheet.
    pub score: f64,
}

/// Scores every sheet in `workbook` by its best header-row candidate
/// score, descending.
pub fn candidate_sheets(workbook: &Workbook) -> Vec<SheetCandidate> {
    let mut candidates: Vec<SheetCandidate> = workbook
        .sheets
        .iter()
        .enumerate()
        .map(|(sheet_index, sheet)| {
            let score = candidate_rows(sheet).first().map(|c| c.score).unwrap_or(0.0);
            SheetCandidate { sheet_index, sheet_name: sheet.name.clone(), score }
        })
        .collect();
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

/// `true` when the best and runner-up sheet candidates score within
/// `margin` of each other.
pub fn is_ambiguous(candidates: &[SheetCandidate], margin: f64) -> bool {
    match candidates {
        [best, runner_up, ..] => (best.score - runner_up.score).abs() < margin,
        _ => false,
    }
}
