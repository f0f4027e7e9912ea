//! Two-tier catalog cache entries (customers, items).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a catalog item in the external system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CatalogItemStatus {
    /// Available for ordering.
    Active,
    /// No longer orderable but retained for historical resolution.
    Inactive,
}

/// A cached catalog customer entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CatalogCustomer {
    /// The external system's customer identifier.
    pub external_id: String,
    /// The customer's display name.
    pub display_name: String,
    /// The customer's registered company name, if distinct from the
    /// display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
}

/// A cached catalog item entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CatalogItem {
    /// The external system's item identifier.
    pub external_id: String,
    /// The item's SKU, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    /// The item's GTIN, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gtin: Option<String>,
    /// The item's display name.
    pub name: String,
    /// The item's authoritative unit rate.
    pub rate: f64,
    /// The item's lifecycle status.
    pub status: CatalogItemStatus,
}

impl CatalogCustomer {
    /// Normalizes a name for exact matching: case-fold, collapse internal
    /// whitespace, strip punctuation.
    ///
    /// This mirrors the resolver's first customer-matching pass (§4.3):
    /// exact normalized-name match on display name or company name.
    pub fn normalize_name(name: &str) -> String {
        let folded: String = name
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        folded.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// `true` if `candidate`'s normalized form matches this customer's
    /// display name or company name.
    pub fn matches_exact(&self, candidate: &str) -> bool {
        let normalized_candidate = Self::normalize_name(candidate);
        Self::normalize_name(&self.display_name) == normalized_candidate
            || self
                .company_name
                .as_deref()
                .map(|company| Self::normalize_name(company) == normalized_candidate)
                .unwrap_or(false)
    }
}

impl CatalogItem {
    /// Normalizes a SKU for exact matching: upper-case, strip internal
    /// whitespace.
    pub fn normalize_sku(sku: &str) -> String {
        sku.chars().filter(|c| !c.is_whitespace()).collect::<String>().to_uppercase()
    }

    /// Normalizes a GTIN for exact matching: digits only.
    pub fn normalize_gtin(gtin: &str) -> String {
        gtin.chars().filter(|c| c.is_ascii_digit()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_name_collapses_case_whitespace_and_punctuation() {
        assert_eq!(CatalogCustomer::normalize_name("  ACME,  Corp.  "), "acme corp");
    }

    #[test]
    fn matches_exact_checks_display_and_company_name() {
        let customer = CatalogCustomer {
            external_id: "cust-1".to_string(),
            display_name: "ACME Corp".to_string(),
            company_name: Some("Acme Corporation LLC".to_string()),
        };
        assert!(customer.matches_exact("acme corp"));
        assert!(customer.matches_exact("Acme Corporation LLC"));
        assert!(!customer.matches_exact("Widgets Inc"));
    }

    #[test]
    fn normalize_sku_strips_whitespace_and_upcases() {
        assert_eq!(CatalogItem::normalize_sku(" sku 001 "), "SKU001");
    }

    #[test]
    fn normalize_gtin_keeps_digits_only() {
        assert_eq!(CatalogItem::normalize_gtin("0-12345-67890-5"), "0123456789805");
    }
}
