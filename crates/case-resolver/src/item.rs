//! Item matching: SKU exact, then GTIN exact, then feature-gated fuzzy
//! name matching.

use case_core::{CatalogItem, Issue, IssueCode, ItemCandidate, ItemResolutionStatus, LineItem, Severity};

use crate::fuzzy::top_k;
use crate::ResolverConfig;

const TOP_K: usize = 5;

fn candidates_from<'a>(items: impl Iterator<Item = &'a CatalogItem>) -> Vec<ItemCandidate> {
    items.map(|i| ItemCandidate { external_id: i.external_id.clone(), name: i.name.clone(), similarity: 1.0 }).collect()
}

/// Resolves one line item against the catalog, mutating its resolution
/// status, resolved id, and candidates in place. Returns an [`Issue`] when
/// the result is ambiguous or unresolved.
pub fn resolve_item(line: &mut LineItem, items: &[CatalogItem], config: &ResolverConfig) -> Option<Issue> {
    if let Some(sku) = &line.sku {
        let normalized = CatalogItem::normalize_sku(sku);
        let matches: Vec<&CatalogItem> = items.iter().filter(|i| i.sku.as_deref().map(CatalogItem::normalize_sku).as_deref() == Some(normalized.as_str())).collect();
        match matches.as_slice() {
            [] => {}
            [only] => return resolved(line, only),
            many => return ambiguous(line, candidates_from(many.iter().copied()), line.row_index),
        }
    }

    if let Some(gtin) = &line.gtin {
        let normalized = CatalogItem::normalize_gtin(gtin);
        let matches: Vec<&CatalogItem> = items.iter().filter(|i| i.gtin.as_deref().map(CatalogItem::normalize_gtin).as_deref() == Some(normalized.as_str())).collect();
        match matches.as_slice() {
            [] => {}
            [only] => return resolved(line, only),
            many => return ambiguous(line, candidates_from(many.iter().copied()), line.row_index),
        }
    }

    if config.item_fuzzy_enabled {
        if let Some(name) = &line.product_name {
            let ranked = top_k(name, items.iter().map(|i| (i.clone(), i.name.clone())), TOP_K);
            let best = ranked.first();
            let runner_up_score = ranked.get(1).map(|c| c.score).unwrap_or(0.0);
            if let Some(best) = best {
                if best.score >= config.customer_fuzzy_high && (best.score - runner_up_score) >= config.ambiguity_margin {
                    return resolved(line, &best.value);
                }
            }
        }
    }

    line.resolution_status = ItemResolutionStatus::NotFound;
    line.item_candidates.clear();
    Some(
        Issue::new(IssueCode::ItemNotFound, Severity::Blocker, format!("line {} matched no catalog item", line.row_index))
            .with_affected_field(format!("line_items[{}]", line.row_index)),
    )
}

fn resolved(line: &mut LineItem, item: &CatalogItem) -> Option<Issue> {
    line.resolution_status = ItemResolutionStatus::Resolved;
    line.resolved_external_id = Some(item.external_id.clone());
    line.item_candidates.clear();
    None
}

fn ambiguous(line: &mut LineItem, candidates: Vec<ItemCandidate>, row_index: u32) -> Option<Issue> {
    line.resolution_status = ItemResolutionStatus::Ambiguous;
    line.item_candidates = candidates;
    Some(
        Issue::new(IssueCode::AmbiguousItem, Severity::Error, format!("line {row_index} matched more than one catalog item"))
            .with_affected_field(format!("line_items[{row_index}]")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ResolverConfig {
        ResolverConfig::default()
    }

    fn line(sku: Option<&str>, gtin: Option<&str>, name: Option<&str>) -> LineItem {
        LineItem {
            row_index: 0,
            sku: sku.map(str::to_string),
            gtin: gtin.map(str::to_string),
            product_name: name.map(str::to_string),
            quantity: 1.0,
            unit_price_source: None,
            unit_price_resolved: None,
            line_total_source: None,
            currency: None,
            resolved_external_id: None,
            resolution_status: ItemResolutionStatus::Unresolved,
            item_candidates: Vec::new(),
            evidence: Default::default(),
        }
    }

    fn item(id: &str, sku: Option<&str>, gtin: Option<&str>, name: &str) -> CatalogItem {
        CatalogItem {
            external_id: id.to_string(),
            sku: sku.map(str::to_string),
            gtin: gtin.map(str::to_string),
            name: name.to_string(),
            rate: 10.0,
            status: case_core::CatalogItemStatus::Active,
        }
    }

    #[test]
    fn sku_exact_match_resolves() {
        let mut l = line(Some("sku 001"), None, None);
        let items = vec![item("i1", Some("SKU001"), None, "Widget")];
        let issue = resolve_item(&mut l, &items, &config());
        assert!(issue.is_none());
        assert_eq!(l.resolved_external_id.as_deref(), Some("i1"));
    }

    #[test]
    fn sku_collision_is_ambiguous() {
        let mut l = line(Some("SKU001"), None, None);
        let items = vec![item("i1", Some("SKU001"), None, "Widget"), item("i2", Some("SKU001"), None, "Other Widget")];
        let issue = resolve_item(&mut l, &items, &config());
        assert_eq!(l.resolution_status, ItemResolutionStatus::Ambiguous);
        assert_eq!(issue.unwrap().code, IssueCode::AmbiguousItem);
    }

    #[test]
    fn falls_back_to_gtin_when_no_sku() {
        let mut l = line(None, Some("0-12345-67890-5"), None);
        let items = vec![item("i1", None, Some("0123456789805"), "Widget")];
        resolve_item(&mut l, &items, &config());
        assert_eq!(l.resolved_external_id.as_deref(), Some("i1"));
    }

    #[test]
    fn no_match_without_fuzzy_is_not_found() {
        let mut l = line(Some("SKU999"), None, Some("Widget"));
        let items = vec![item("i1", Some("SKU001"), None, "Widget")];
        let issue = resolve_item(&mut l, &items, &config());
        assert_eq!(l.resolution_status, ItemResolutionStatus::NotFound);
        assert_eq!(issue.unwrap().severity, Severity::Blocker);
    }

    #[test]
    fn fuzzy_name_resolves_when_enabled() {
        let mut config = config();
        config.item_fuzzy_enabled = true;
        let mut l = line(None, None, Some("Wodget"));
        let items = vec![item("i1", None, None, "Wodget")];
        let issue = resolve_item(&mut l, &items, &config);
        assert!(issue.is_none());
        assert_eq!(l.resolved_external_id.as_deref(), Some("i1"));
    }
}
