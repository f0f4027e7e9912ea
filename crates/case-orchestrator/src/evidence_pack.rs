//! Builds the committee's bounded [`EvidencePack`] from a decoded workbook
//! and the extractor's schema inference.

use case_committee::provider::{ColumnSummary, EvidencePack};
use case_core::CanonicalOrder;
use case_extractor::sheet::Workbook;

const FIELDS: &[&str] = &["sku", "gtin", "product_name", "quantity", "unit_price", "line_total", "customer_name"];

/// Builds the evidence pack for `order`'s selected sheet, bounding every
/// column summary to the committee's sample caps via
/// [`ColumnSummary::bounded`].
pub fn build_evidence_pack(order: &CanonicalOrder, workbook: &Workbook) -> EvidencePack {
    let sheet = workbook.sheets.iter().find(|s| s.name == order.schema_inference.selected_sheet).or_else(|| workbook.sheets.first());

    let columns = match sheet {
        Some(sheet) => {
            let header_row = order.schema_inference.header_row as usize;
            let width = sheet.width();
            (0..width)
                .map(|col| {
                    let header = sheet.cell(header_row, col).map(|c| c.raw_value.as_str()).unwrap_or_default();
                    let samples: Vec<String> = sheet
                        .rows
                        .iter()
                        .skip(header_row + 1)
                        .filter_map(|row| row.get(col))
                        .map(|cell| cell.raw_value.clone())
                        .collect();
                    ColumnSummary::bounded(col.to_string(), header, &samples)
                })
                .collect()
        }
        None => Vec::new(),
    };

    EvidencePack {
        columns,
        fields: FIELDS.iter().map(|f| f.to_string()).collect(),
        language_hint: order.meta.language_hint.clone(),
        constraints: vec!["every field must have a mapping entry".to_string()],
    }
}
