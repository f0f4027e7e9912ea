//! Price resolution: set `unit_price_resolved` from the catalog, leaving
//! `unit_price_source` untouched, and record a side audit comparing the two.

use case_core::{CatalogItem, LineItem};

/// A side-channel audit record comparing the spreadsheet's own price
/// against the catalog's authoritative rate. Never feeds back into
/// `unit_price_source`.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceAudit {
    /// 0-based row index of the line this audit covers.
    pub row_index: u32,
    /// The spreadsheet's own price, if present.
    pub source_price: Option<f64>,
    /// The catalog's authoritative rate.
    pub resolved_price: f64,
    /// `resolved_price - source_price`, `None` if there was no source price.
    pub difference: Option<f64>,
}

/// Sets `unit_price_resolved` from `item`'s rate and returns the side
/// audit record. No-op on `unit_price_source`.
pub fn resolve_price(line: &mut LineItem, item: &CatalogItem) -> PriceAudit {
    line.unit_price_resolved = Some(item.rate);
    PriceAudit {
        row_index: line.row_index,
        source_price: line.unit_price_source,
        resolved_price: item.rate,
        difference: line.unit_price_source.map(|source| item.rate - source),
    }
}
