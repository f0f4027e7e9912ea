//! Column mapping: score each candidate column against each canonical
//! field and pick the best.

use std::collections::BTreeMap;

use crate::gtin::is_valid_gtin;
use crate::numbers::parse_number;

/// Weight given to header-similarity-against-synonym-dictionary.
const WEIGHT_HEADER_SIMILARITY: f64 = 0.4;
/// Weight given to value-type compatibility.
const WEIGHT_VALUE_TYPE: f64 = 0.3;
/// Weight given to pattern heuristics (GTIN check digit, currency shape, SKU shape).
const WEIGHT_PATTERN: f64 = 0.2;
/// Weight given to column-adjacency priors.
const WEIGHT_ADJACENCY: f64 = 0.1;

/// A candidate column summarized for scoring: its header text and a
/// handful of non-empty sample values.
#[derive(Debug, Clone)]
pub struct ColumnStats {
    /// 0-based column index within the header row.
    pub column_index: usize,
    /// The header cell's text, if any.
    pub header: String,
    /// Non-empty sample values drawn from the data rows below the header.
    pub sample_values: Vec<String>,
}

/// Multilingual (English/Farsi/Arabic) header synonyms per canonical
/// field, used for the header-similarity sub-score.
fn synonyms(field: &str) -> &'static [&'static str] {
    match field {
        "sku" => &["sku", "item code", "item number", "product code", "کد کالا", "رمز المنتج"],
        "gtin" => &["gtin", "barcode", "upc", "ean", "بارکد"],
        "product_name" => &["product", "product name", "item", "description", "نام کالا", "اسم المنتج"],
        "quantity" => &["qty", "quantity", "count", "تعداد", "الكمية"],
        "unit_price" => &["unit price", "price", "rate", "قیمت واحد", "سعر الوحدة"],
        "line_total" => &["total", "line total", "amount", "جمع", "المجموع"],
        "customer_name" => &["customer", "customer name", "client", "buyer", "مشتری", "العميل"],
        _ => &[],
    }
}

/// Pairs a field with the neighbor it is conventionally placed beside,
/// for the adjacency-prior sub-score.
fn adjacency_partner(field: &str) -> Option<&'static str> {
    match field {
        "sku" => Some("product_name"),
        "product_name" => Some("sku"),
        "quantity" => Some("unit_price"),
        "unit_price" => Some("line_total"),
        "line_total" => Some("unit_price"),
        _ => None,
    }
}

fn normalize_header(header: &str) -> String {
    header.to_lowercase().chars().filter(|c| c.is_alphanumeric() || c.is_whitespace()).collect::<String>().trim().to_string()
}

fn header_similarity(header: &str, field: &str) -> f64 {
    let normalized = normalize_header(header);
    if normalized.is_empty() {
        return 0.0;
    }
    synonyms(field)
        .iter()
        .map(|syn| {
            let syn = syn.to_lowercase();
            if normalized == syn {
                1.0
            } else if normalized.contains(&syn) || syn.contains(&normalized) {
                0.7
            } else {
                0.0
            }
        })
        .fold(0.0, f64::max)
}

fn numeric_ratio(values: &[String]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let numeric = values.iter().filter(|v| parse_number(v).is_some()).count();
    numeric as f64 / values.len() as f64
}

fn value_type_score(values: &[String], field: &str) -> f64 {
    match field {
        "quantity" | "unit_price" | "line_total" => numeric_ratio(values),
        "sku" | "gtin" | "product_name" | "customer_name" => 1.0 - numeric_ratio(values),
        _ => 0.5,
    }
}

fn looks_like_sku(value: &str) -> bool {
    let trimmed = value.trim();
    !trimmed.is_empty()
        && trimmed.len() <= 32
        && trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && trimmed.chars().any(|c| c.is_ascii_alphabetic())
}

fn looks_like_currency(value: &str) -> bool {
    value.contains(['$', '€', '£', '¥', '₹']) || parse_number(value).is_some()
}

fn pattern_score(values: &[String], field: &str) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let matches = match field {
        "gtin" => values.iter().filter(|v| is_valid_gtin(v)).count(),
        "sku" => values.iter().filter(|v| looks_like_sku(v)).count(),
        "unit_price" | "line_total" => values.iter().filter(|v| looks_like_currency(v)).count(),
        _ => return 0.5,
    };
    matches as f64 / values.len() as f64
}

fn adjacency_score(field: &str, column_index: usize, columns: &[ColumnStats]) -> f64 {
    let Some(partner) = adjacency_partner(field) else {
        return 0.5;
    };
    let neighbors = [column_index.checked_sub(1), Some(column_index + 1)];
    neighbors
        .into_iter()
        .flatten()
        .filter_map(|idx| columns.iter().find(|c| c.column_index == idx))
        .map(|neighbor| header_similarity(&neighbor.header, partner))
        .fold(0.0, f64::max)
}

/// Scores a single `(field, column)` pair, combining header similarity,
/// value-type compatibility, pattern heuristics, and adjacency priors
/// with weights `0.4/0.3/0.2/0.1`.
pub fn score_column_for_field(field: &str, column: &ColumnStats, all_columns: &[ColumnStats]) -> f64 {
    WEIGHT_HEADER_SIMILARITY * header_similarity(&column.header, field)
        + WEIGHT_VALUE_TYPE * value_type_score(&column.sample_values, field)
        + WEIGHT_PATTERN * pattern_score(&column.sample_values, field)
        + WEIGHT_ADJACENCY * adjacency_score(field, column.column_index, all_columns)
}

/// The winning column for a field, plus the runner-up's score for
/// ambiguity-margin checks.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMappingScore {
    /// The canonical field name.
    pub field: String,
    /// The best-scoring column, if any column scored above zero.
    pub best_column: Option<usize>,
    /// The best column's score.
    pub best_score: f64,
    /// The runner-up's score, `0.0` if there was no second candidate.
    pub runner_up_score: f64,
}

impl FieldMappingScore {
    /// `true` when the winner and runner-up are within `margin` of each
    /// other, meaning this mapping needs user review.
    pub fn is_ambiguous(&self, margin: f64) -> bool {
        self.best_column.is_some() && (self.best_score - self.runner_up_score) < margin
    }
}

/// Scores every candidate column against every field in `fields`,
/// returning one [`FieldMappingScore`] per field.
pub fn map_columns(fields: &[&str], columns: &[ColumnStats]) -> Vec<FieldMappingScore> {
    fields
        .iter()
        .map(|&field| {
            let mut scores: Vec<(usize, f64)> =
                columns.iter().map(|c| (c.column_index, score_column_for_field(field, c, columns))).collect();
            scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

            let best = scores.first().copied();
            let runner_up = scores.get(1).map(|(_, score)| *score).unwrap_or(0.0);
            FieldMappingScore {
                field: field.to_string(),
                best_column: best.filter(|(_, score)| *score > 0.0).map(|(idx, _)| idx),
                best_score: best.map(|(_, score)| score).unwrap_or(0.0),
                runner_up_score: runner_up,
            }
        })
        .collect()
}

/// Bundles the raw column headers (for evidence/debugging) alongside the
/// computed mapping, keyed by field.
pub fn map_columns_by_field(fields: &[&str], columns: &[ColumnStats]) -> BTreeMap<String, FieldMappingScore> {
    map_columns(fields, columns).into_iter().map(|score| (score.field.clone(), score)).collect()
}
