// SPDX-License-Identifier: MIT OR Apache-2.0
//! case-extractor
//!
//! The deterministic spreadsheet-to-`CanonicalOrder` pipeline: sheet
//! selection, header detection, digit normalization, number parsing,
//! column mapping, row extraction, arithmetic checking, GTIN validation,
//! and language hinting. No LLM call happens anywhere in this crate;
//! ambiguity is surfaced as an [`Issue`] for the committee or a human to
//! resolve, never guessed at.
//!
//! Decoding the workbook's binary format is explicitly out of scope here;
//! see [`sheet::WorkbookDecoder`] for the seam a concrete decoder plugs
//! into.
#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Column-to-field scoring.
pub mod column_mapping;
/// Digit normalization.
pub mod digits;
/// GTIN validation.
pub mod gtin;
/// Header-row detection.
pub mod header;
/// Language hinting.
pub mod language;
/// Locale-tolerant number parsing.
pub mod numbers;
/// The decoded workbook/sheet/cell model.
pub mod sheet;
/// Sheet selection.
pub mod sheet_selection;

use std::collections::BTreeMap;

use case_core::{
    CanonicalOrder, ColumnMapping, Confidence, CustomerExtract, EvidenceCell, Issue, IssueCode, LineItem, MappingMethod,
    OrderMeta, SchemaInference, Severity, Totals,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use column_mapping::{map_columns, ColumnStats};
use numbers::{parse_number_with_style, NumberStyle};
use sheet::{Cell, SheetMatrix, Workbook};

/// The canonical fields this pipeline maps spreadsheet columns onto.
const FIELDS: &[&str] =
    &["sku", "gtin", "product_name", "quantity", "unit_price", "line_total", "customer_name"];

/// Fields without which a line item cannot be extracted meaningfully.
const REQUIRED_LINE_FIELDS: &[&str] = &["quantity"];

/// Tuning parameters for the extraction pipeline. Defaults mirror the
/// enumerated environment configuration (`EXTRACTOR_STRICT_FORMULAS` and
/// the arithmetic/ambiguity tolerances).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractConfig {
    /// Reject any formula found in the data region. Default `true`.
    pub strict_formulas: bool,
    /// Absolute tolerance for the arithmetic check.
    pub abs_tol: f64,
    /// Relative tolerance for the arithmetic check.
    pub rel_tol: f64,
    /// Ambiguity margin for sheet selection, header detection, and column
    /// mapping.
    pub ambiguity_margin: f64,
    /// Maximum sample values drawn per column for scoring.
    pub max_samples_per_column: usize,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self { strict_formulas: true, abs_tol: 0.02, rel_tol: 0.01, ambiguity_margin: 0.1, max_samples_per_column: 5 }
    }
}

/// Unrecoverable extraction failure. Everything else surfaces as an
/// [`Issue`] attached to the returned order instead of an `Err`.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// The decoded workbook had no sheets at all.
    #[error("workbook decoded with no sheets")]
    NoSheets,
}

fn is_totals_row(row: &[Cell]) -> bool {
    const TOTALS_TOKENS: &[&str] = &["total", "subtotal", "grand total", "sum", "جمع", "مجموع"];
    row.iter().any(|cell| {
        let lower = cell.raw_value.to_lowercase();
        TOTALS_TOKENS.iter().any(|token| lower.contains(token))
    })
}

fn empty_order(case_id: Uuid, tenant_id: String, filename: String, file_hash: String, received_at: DateTime<Utc>) -> CanonicalOrder {
    CanonicalOrder {
        meta: OrderMeta {
            case_id,
            tenant_id,
            received_at,
            filename,
            file_hash,
            language_hint: language::UNKNOWN.to_string(),
            parser_version: env!("CARGO_PKG_VERSION").to_string(),
        },
        customer: CustomerExtract::new("", vec![]),
        line_items: vec![],
        totals: Totals { subtotal: None, tax: None, grand: None, evidence: BTreeMap::new() },
        schema_inference: SchemaInference { selected_sheet: String::new(), header_row: 0, column_mappings: vec![] },
        confidence: Confidence::from_stages(BTreeMap::new()),
        issues: vec![],
        approvals: vec![],
        external_linkage: None,
    }
}

/// Builds [`ColumnStats`] for every column in `sheet`'s header row,
/// sampling up to `max_samples` non-empty, non-totals values per column.
fn build_columns(sheet: &SheetMatrix, header_row: usize, max_samples: usize) -> Vec<ColumnStats> {
    let width = sheet.width();
    let header_cells = sheet.rows.get(header_row);
    (0..width)
        .map(|column_index| {
            let header = header_cells.and_then(|row| row.get(column_index)).map(|c| c.raw_value.clone()).unwrap_or_default();
            let sample_values: Vec<String> = sheet
                .rows
                .iter()
                .skip(header_row + 1)
                .filter(|row| !is_totals_row(row))
                .filter_map(|row| row.get(column_index))
                .map(|c| c.raw_value.trim().to_string())
                .filter(|v| !v.is_empty())
                .take(max_samples)
                .collect();
            ColumnStats { column_index, header, sample_values }
        })
        .collect()
}

/// The numeric style most cells in `column_index` parsed under, sampled
/// over every non-totals data row. `None` if no cell in the column parsed
/// as a number at all.
fn dominant_number_style(sheet: &SheetMatrix, header_row: usize, column_index: usize) -> Option<NumberStyle> {
    let mut counts = [(NumberStyle::UsStyle, 0usize), (NumberStyle::EuropeanStyle, 0), (NumberStyle::NoSeparators, 0)];
    for row in sheet.rows.iter().skip(header_row + 1).filter(|row| !is_totals_row(row)) {
        if let Some((_, style)) = row.get(column_index).and_then(|c| parse_number_with_style(&c.raw_value)) {
            if let Some(entry) = counts.iter_mut().find(|(s, _)| *s == style) {
                entry.1 += 1;
            }
        }
    }
    counts.into_iter().filter(|(_, n)| *n > 0).max_by_key(|(_, n)| *n).map(|(style, _)| style)
}

/// Raises [`IssueCode::MixedNumberStyle`] if `style` disagrees with the
/// column's `dominant` style (spec step 6's per-column consistency check).
fn flag_style_mismatch(
    issues: &mut Vec<Issue>,
    sheet_name: &str,
    field: &str,
    row_index: usize,
    cell: &Cell,
    style: NumberStyle,
    dominant: Option<NumberStyle>,
) {
    if dominant.is_some_and(|dominant| dominant != style) {
        issues.push(
            Issue::new(
                IssueCode::MixedNumberStyle,
                Severity::Warning,
                format!("{field} at row {row_index} uses a different numeric style than the rest of its column"),
            )
            .with_evidence(evidence_for(sheet_name, cell))
            .with_affected_field(format!("line_items[{row_index}].{field}")),
        );
    }
}

fn evidence_for(sheet_name: &str, cell: &Cell) -> EvidenceCell {
    let mut evidence = EvidenceCell::new(sheet_name, cell.a1.clone(), cell.raw_value.clone());
    if let Some(format) = &cell.number_format {
        evidence = evidence.with_number_format(format.clone());
    }
    evidence
}

/// Runs the full deterministic extraction pipeline against an
/// already-decoded `workbook`, producing a (possibly partial)
/// [`CanonicalOrder`] plus the issues raised along the way.
///
/// Only workbook-level decode failures (no sheets at all) return `Err`;
/// every other problem — blocked formulas, ambiguous sheets or headers,
/// unmapped fields, arithmetic mismatches, bad GTINs — is recorded as an
/// [`Issue`] on the returned order.
#[allow(clippy::too_many_arguments)]
pub fn extract(
    case_id: Uuid,
    tenant_id: impl Into<String>,
    filename: impl Into<String>,
    file_hash: impl Into<String>,
    received_at: DateTime<Utc>,
    workbook: &Workbook,
    config: &ExtractConfig,
) -> Result<CanonicalOrder, ExtractError> {
    let tenant_id = tenant_id.into();
    let filename = filename.into();
    let file_hash = file_hash.into();

    if workbook.sheets.is_empty() {
        return Err(ExtractError::NoSheets);
    }

    let mut order = empty_order(case_id, tenant_id.clone(), filename.clone(), file_hash.clone(), received_at);
    let mut issues: Vec<Issue> = Vec::new();
    let mut stage_confidence: BTreeMap<String, f64> = BTreeMap::new();

    // Step 2: formula gate. Scans every decoded cell; a hit anywhere
    // blocks extraction outright under the default strict policy.
    if config.strict_formulas {
        let formula_hit = workbook.sheets.iter().enumerate().find_map(|(sheet_idx, sheet)| {
            sheet.rows.iter().flatten().find(|c| c.is_formula).map(|cell| (sheet_idx, sheet.name.clone(), cell.clone()))
        });
        if let Some((_, sheet_name, cell)) = formula_hit {
            tracing::warn!(case_id = %case_id, sheet = %sheet_name, cell = %cell.a1, "formula found in data region");
            issues.push(
                Issue::new(IssueCode::FormulasBlocked, Severity::Blocker, format!("formula found at {}!{}", sheet_name, cell.a1))
                    .with_evidence(evidence_for(&sheet_name, &cell))
                    .with_suggested_user_action("re-upload the file with formulas replaced by their values"),
            );
            order.issues = issues;
            return Ok(order);
        }
    }

    let all_empty = workbook.sheets.iter().all(|s| s.rows.iter().all(|row| row.iter().all(|c| c.raw_value.trim().is_empty())));
    if all_empty {
        issues.push(Issue::new(IssueCode::EmptySpreadsheet, Severity::Blocker, "workbook contains no non-empty cells"));
        order.issues = issues;
        return Ok(order);
    }

    // Step 3: sheet selection.
    let sheet_candidates = sheet_selection::candidate_sheets(workbook);
    let best_sheet = sheet_candidates.first().expect("non-empty workbook has at least one sheet candidate");
    stage_confidence.insert("sheet_selection".to_string(), best_sheet.score);
    if sheet_selection::is_ambiguous(&sheet_candidates, config.ambiguity_margin) {
        issues.push(Issue::new(
            IssueCode::MultipleSheetCandidates,
            Severity::Warning,
            format!("multiple sheets scored within {} of each other", config.ambiguity_margin),
        ));
    }
    let sheet = &workbook.sheets[best_sheet.sheet_index];

    // Step 4: header-row detection.
    let header_candidates = header::candidate_rows(sheet);
    let best_header = header_candidates.first().cloned().unwrap_or(header::HeaderCandidate { row_index: 0, score: 0.0 });
    stage_confidence.insert("header_detection".to_string(), best_header.score);
    if header::is_ambiguous(&header_candidates, config.ambiguity_margin) {
        issues.push(Issue::new(
            IssueCode::MultipleHeaderCandidates,
            Severity::Warning,
            format!("multiple rows scored within {} of each other as the header", config.ambiguity_margin),
        ));
    }
    let header_row = best_header.row_index;

    // Steps 5-7: digit normalization (inside numbers::parse_number),
    // number parsing, and column mapping.
    let columns = build_columns(sheet, header_row, config.max_samples_per_column);
    let field_scores = map_columns(FIELDS, &columns);
    let mut column_mappings = Vec::with_capacity(field_scores.len());
    let mut mapped_column_of: BTreeMap<&str, usize> = BTreeMap::new();
    let mut mapping_scores_for_confidence = Vec::new();

    for score in &field_scores {
        match score.best_column {
            Some(column_index) => {
                mapped_column_of.insert(score.field.as_str(), column_index);
                mapping_scores_for_confidence.push(score.best_score);
                if score.is_ambiguous(config.ambiguity_margin) {
                    issues.push(
                        Issue::new(
                            IssueCode::LowConfidence,
                            Severity::Warning,
                            format!("column mapping for '{}' needs review (ambiguous winner)", score.field),
                        )
                        .with_affected_field(score.field.clone()),
                    );
                }
            }
            None => {
                if REQUIRED_LINE_FIELDS.contains(&score.field.as_str()) {
                    issues.push(
                        Issue::new(
                            IssueCode::MissingRequiredField,
                            Severity::Blocker,
                            format!("no column mapped to required field '{}'", score.field),
                        )
                        .with_affected_field(score.field.clone()),
                    );
                }
            }
        }
        column_mappings.push(ColumnMapping {
            field: score.field.clone(),
            column_id: score.best_column.map(|idx| idx.to_string()),
            confidence: score.best_score,
            method: MappingMethod::Deterministic,
        });
    }
    let column_mapping_confidence = if mapping_scores_for_confidence.is_empty() {
        0.0
    } else {
        mapping_scores_for_confidence.iter().sum::<f64>() / mapping_scores_for_confidence.len() as f64
    };
    stage_confidence.insert("column_mapping".to_string(), column_mapping_confidence);

    order.schema_inference = SchemaInference { selected_sheet: sheet.name.clone(), header_row: header_row as u32, column_mappings };

    // Customer name: first non-empty value anywhere in the mapped column.
    if let Some(&customer_col) = mapped_column_of.get("customer_name") {
        let found = sheet
            .rows
            .iter()
            .skip(header_row + 1)
            .filter(|row| !is_totals_row(row))
            .find_map(|row| row.get(customer_col).filter(|c| !c.raw_value.trim().is_empty()));
        if let Some(cell) = found {
            order.customer = CustomerExtract::new(cell.raw_value.trim(), vec![evidence_for(&sheet.name, cell)]);
        } else {
            issues.push(Issue::new(IssueCode::MissingCustomer, Severity::Blocker, "no customer value found in mapped column"));
        }
    } else {
        issues.push(Issue::new(IssueCode::MissingCustomer, Severity::Blocker, "no column mapped to customer name"));
    }

    let quantity_style = mapped_column_of.get("quantity").and_then(|&idx| dominant_number_style(sheet, header_row, idx));
    let unit_price_style = mapped_column_of.get("unit_price").and_then(|&idx| dominant_number_style(sheet, header_row, idx));
    let line_total_style = mapped_column_of.get("line_total").and_then(|&idx| dominant_number_style(sheet, header_row, idx));

    // Step 8: row extraction, skipping totals rows.
    let mut seen_item_ids: BTreeMap<String, usize> = BTreeMap::new();
    let mut line_items = Vec::new();
    for (row_index, row) in sheet.rows.iter().enumerate().skip(header_row + 1) {
        if is_totals_row(row) {
            continue;
        }
        if row.iter().all(|c| c.raw_value.trim().is_empty()) {
            continue;
        }

        let cell_at = |field: &str| mapped_column_of.get(field).and_then(|&idx| row.get(idx)).filter(|c| !c.raw_value.trim().is_empty());

        let mut evidence: BTreeMap<String, EvidenceCell> = BTreeMap::new();
        let sku = cell_at("sku").map(|c| {
            evidence.insert("sku".to_string(), evidence_for(&sheet.name, c));
            c.raw_value.trim().to_string()
        });
        let gtin = cell_at("gtin").map(|c| {
            evidence.insert("gtin".to_string(), evidence_for(&sheet.name, c));
            c.raw_value.trim().to_string()
        });
        let product_name = cell_at("product_name").map(|c| {
            evidence.insert("product_name".to_string(), evidence_for(&sheet.name, c));
            c.raw_value.trim().to_string()
        });

        let quantity_cell = cell_at("quantity");
        let quantity_parsed = quantity_cell.and_then(|c| parse_number_with_style(&c.raw_value));
        let quantity = quantity_parsed.map(|(value, _)| value);
        match (quantity_cell, quantity_parsed) {
            (Some(c), Some((q, style))) => {
                evidence.insert("quantity".to_string(), evidence_for(&sheet.name, c));
                flag_style_mismatch(&mut issues, &sheet.name, "quantity", row_index, c, style, quantity_style);
                if q < 0.0 {
                    issues.push(
                        Issue::new(IssueCode::InvalidQuantity, Severity::Error, format!("negative quantity at row {row_index}"))
                            .with_evidence(evidence_for(&sheet.name, c)),
                    );
                }
            }
            (Some(c), None) => {
                issues.push(
                    Issue::new(IssueCode::InvalidQuantity, Severity::Error, format!("unparseable quantity at row {row_index}"))
                        .with_evidence(evidence_for(&sheet.name, c)),
                );
            }
            (None, _) => {}
        }

        let unit_price_cell = cell_at("unit_price");
        let unit_price_parsed = unit_price_cell.and_then(|c| parse_number_with_style(&c.raw_value));
        let unit_price_source = unit_price_parsed.map(|(value, _)| value);
        if let (Some(c), Some((price, style))) = (unit_price_cell, unit_price_parsed) {
            evidence.insert("unit_price_source".to_string(), evidence_for(&sheet.name, c));
            flag_style_mismatch(&mut issues, &sheet.name, "unit_price", row_index, c, style, unit_price_style);
            if price < 0.0 {
                issues.push(
                    Issue::new(IssueCode::InvalidPrice, Severity::Error, format!("negative unit price at row {row_index}"))
                        .with_evidence(evidence_for(&sheet.name, c)),
                );
            }
        }

        let line_total_cell = cell_at("line_total");
        let line_total_parsed = line_total_cell.and_then(|c| parse_number_with_style(&c.raw_value));
        let line_total_source = line_total_parsed.map(|(value, _)| value);
        if let Some(c) = line_total_cell {
            if let Some((_, style)) = line_total_parsed {
                evidence.insert("line_total_source".to_string(), evidence_for(&sheet.name, c));
                flag_style_mismatch(&mut issues, &sheet.name, "line_total", row_index, c, style, line_total_style);
            }
        }

        if let Some(gtin_value) = &gtin {
            if !gtin::is_valid_gtin(gtin_value) {
                issues.push(
                    Issue::new(IssueCode::InvalidGtin, Severity::Warning, format!("invalid GTIN '{gtin_value}' at row {row_index}"))
                        .with_affected_field(format!("line_items[{row_index}].gtin")),
                );
            }
        }

        if sku.is_none() && gtin.is_none() && product_name.is_none() {
            issues.push(Issue::new(IssueCode::MissingItem, Severity::Blocker, format!("no item identifier found at row {row_index}")));
            continue;
        }

        let item_key = sku.clone().or_else(|| gtin.clone()).or_else(|| product_name.clone()).unwrap_or_default();
        if let Some(&first_row) = seen_item_ids.get(&item_key) {
            issues.push(Issue::new(
                IssueCode::DuplicateLineItem,
                Severity::Warning,
                format!("item '{item_key}' also appears at row {first_row}"),
            ));
        } else {
            seen_item_ids.insert(item_key, row_index);
        }

        let item = LineItem {
            row_index: row_index as u32,
            sku,
            gtin,
            product_name,
            quantity: quantity.unwrap_or(0.0),
            unit_price_source,
            unit_price_resolved: None,
            line_total_source,
            currency: None,
            resolved_external_id: None,
            resolution_status: case_core::ItemResolutionStatus::Unresolved,
            item_candidates: Vec::new(),
            evidence,
        };

        // Step 9: arithmetic check.
        if let Some(mismatch) = item.arithmetic_mismatch(config.abs_tol, config.rel_tol) {
            if mismatch {
                issues.push(
                    Issue::new(
                        IssueCode::ArithmeticMismatch,
                        Severity::Warning,
                        format!("quantity * unit price does not match line total at row {row_index}"),
                    )
                    .with_affected_field(format!("line_items[{row_index}]")),
                );
            }
        }

        line_items.push(item);
    }

    if line_items.is_empty() {
        issues.push(Issue::new(IssueCode::NoLineItems, Severity::Blocker, "no line items survived row extraction"));
    }
    order.line_items = line_items;

    // Step 11: language hint over header text and the first mapped
    // column's samples.
    let header_texts: Vec<&str> = columns.iter().map(|c| c.header.as_str()).collect();
    let first_column_samples: Vec<&str> =
        columns.first().map(|c| c.sample_values.iter().map(String::as_str).collect()).unwrap_or_default();
    let mut samples = header_texts;
    samples.extend(first_column_samples);
    order.meta.language_hint = language::detect(&samples);

    order.confidence = Confidence::from_stages(stage_confidence);
    order.issues = issues;

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cell(a1: &str, raw: &str) -> Cell {
        Cell { a1: a1.to_string(), raw_value: raw.to_string(), is_formula: false, number_format: None, hidden: false }
    }

    fn simple_english_workbook() -> Workbook {
        Workbook {
            sheets: vec![SheetMatrix {
                name: "Sheet1".to_string(),
                rows: vec![
                    vec![cell("A1", "Customer"), cell("B1", "SKU"), cell("C1", "Quantity"), cell("D1", "Unit Price"), cell("E1", "Total")],
                    vec![
                        cell("A2", "ACME Corporation"),
                        cell("B2", "SKU-001"),
                        cell("C2", "10"),
                        cell("D2", "25.50"),
                        cell("E2", "255.00"),
                    ],
                ],
            }],
        }
    }

    fn received_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn happy_path_extracts_one_line_item_with_no_blockers() {
        let workbook = simple_english_workbook();
        let order = extract(
            Uuid::new_v4(),
            "tenant-1",
            "simple-english.xlsx",
            "a".repeat(64),
            received_at(),
            &workbook,
            &ExtractConfig::default(),
        )
        .unwrap();

        assert!(!order.has_blocking_issues());
        assert_eq!(order.line_items.len(), 1);
        assert_eq!(order.line_items[0].quantity, 10.0);
        assert_eq!(order.line_items[0].unit_price_source, Some(25.50));
        assert_eq!(order.customer.raw_text, "ACME Corporation");
        assert_eq!(order.meta.language_hint, "en");
    }

    #[test]
    fn formula_in_data_region_blocks_extraction() {
        let mut workbook = simple_english_workbook();
        workbook.sheets[0].rows[1][4].is_formula = true;
        let order = extract(Uuid::new_v4(), "tenant-1", "f.xlsx", "h".repeat(64), received_at(), &workbook, &ExtractConfig::default()).unwrap();
        assert!(order.has_blocking_issues());
        assert!(order.issues.iter().any(|i| i.code == IssueCode::FormulasBlocked));
        assert!(order.line_items.is_empty());
    }

    #[test]
    fn empty_workbook_blocks_with_empty_spreadsheet() {
        let workbook = Workbook { sheets: vec![SheetMatrix { name: "Sheet1".to_string(), rows: vec![] }] };
        let order = extract(Uuid::new_v4(), "tenant-1", "empty.xlsx", "e".repeat(64), received_at(), &workbook, &ExtractConfig::default()).unwrap();
        assert!(order.issues.iter().any(|i| i.code == IssueCode::EmptySpreadsheet));
    }

    #[test]
    fn no_sheets_is_a_fatal_error() {
        let workbook = Workbook { sheets: vec![] };
        let result = extract(Uuid::new_v4(), "tenant-1", "x.xlsx", "x".repeat(64), received_at(), &workbook, &ExtractConfig::default());
        assert!(matches!(result, Err(ExtractError::NoSheets)));
    }

    #[test]
    fn persian_digit_quantity_parses_to_fifteen() {
        let mut workbook = simple_english_workbook();
        workbook.sheets[0].rows[1][2] = cell("C2", "\u{06f1}\u{06f5}");
        let order = extract(Uuid::new_v4(), "tenant-1", "persian.xlsx", "p".repeat(64), received_at(), &workbook, &ExtractConfig::default()).unwrap();
        assert_eq!(order.line_items[0].quantity, 15.0);
    }

    #[test]
    fn arithmetic_mismatch_emits_warning() {
        let mut workbook = simple_english_workbook();
        workbook.sheets[0].rows[1][4] = cell("E2", "999.00");
        let order = extract(Uuid::new_v4(), "tenant-1", "bad-math.xlsx", "m".repeat(64), received_at(), &workbook, &ExtractConfig::default()).unwrap();
        assert!(order.issues.iter().any(|i| i.code == IssueCode::ArithmeticMismatch));
    }

    #[test]
    fn duplicate_sku_flags_duplicate_line_item() {
        let mut workbook = simple_english_workbook();
        let dup_row = workbook.sheets[0].rows[1].clone();
        workbook.sheets[0].rows.push(dup_row);
        let order = extract(Uuid::new_v4(), "tenant-1", "dup.xlsx", "d".repeat(64), received_at(), &workbook, &ExtractConfig::default()).unwrap();
        assert!(order.issues.iter().any(|i| i.code == IssueCode::DuplicateLineItem));
    }
}
