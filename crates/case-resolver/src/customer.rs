//! Customer matching: exact normalized-name match, then fuzzy top-K.

use case_core::{CatalogCustomer, CustomerCandidate, CustomerExtract, CustomerResolutionStatus, Issue, IssueCode, Severity};

use crate::fuzzy::top_k;
use crate::ResolverConfig;

/// How many fuzzy candidates to retain when a match is ambiguous.
pub const TOP_K: usize = 5;

/// Resolves `extract` against `customers`, mutating its resolution status,
/// resolved id, and candidates in place. Returns an [`Issue`] when the
/// result is ambiguous or unresolved.
pub fn resolve_customer(extract: &mut CustomerExtract, customers: &[CatalogCustomer], config: &ResolverConfig) -> Option<Issue> {
    if let Some(exact) = customers.iter().find(|c| c.matches_exact(&extract.raw_text)) {
        extract.resolution_status = CustomerResolutionStatus::Resolved;
        extract.resolved_external_id = Some(exact.external_id.clone());
        extract.candidates.clear();
        return None;
    }

    let ranked = top_k(&extract.raw_text, customers.iter().map(|c| (c.clone(), c.display_name.clone())), TOP_K);
    let best = ranked.first();
    let runner_up_score = ranked.get(1).map(|c| c.score).unwrap_or(0.0);

    match best {
        Some(best) if best.score >= config.customer_fuzzy_high && (best.score - runner_up_score) >= config.ambiguity_margin => {
            extract.resolution_status = CustomerResolutionStatus::Resolved;
            extract.resolved_external_id = Some(best.value.external_id.clone());
            extract.candidates = to_candidates(&ranked);
            None
        }
        Some(best) if best.score >= config.customer_fuzzy_high => {
            extract.resolution_status = CustomerResolutionStatus::Ambiguous;
            extract.candidates = to_candidates(&ranked);
            Some(
                Issue::new(IssueCode::AmbiguousCustomer, Severity::Error, format!("'{}' matched multiple customers within the ambiguity margin", extract.raw_text))
                    .with_affected_field("customer"),
            )
        }
        Some(best) if best.score >= config.customer_fuzzy_low => {
            extract.resolution_status = CustomerResolutionStatus::NeedsUserInput;
            extract.candidates = to_candidates(&ranked);
            Some(
                Issue::new(IssueCode::AmbiguousCustomer, Severity::Warning, format!("'{}' plausibly matches a known customer; please confirm", extract.raw_text))
                    .with_affected_field("customer")
                    .with_suggested_user_action("confirm the suggested customer or provide the correct one"),
            )
        }
        _ => {
            extract.resolution_status = CustomerResolutionStatus::NotFound;
            extract.candidates.clear();
            Some(
                Issue::new(IssueCode::CustomerNotFound, Severity::Blocker, format!("no catalog customer matched '{}'", extract.raw_text))
                    .with_affected_field("customer"),
            )
        }
    }
}

fn to_candidates(ranked: &[crate::fuzzy::ScoredCandidate<CatalogCustomer>]) -> Vec<CustomerCandidate> {
    ranked
        .iter()
        .map(|c| CustomerCandidate { external_id: c.value.external_id.clone(), display_name: c.value.display_name.clone(), similarity: c.score })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ResolverConfig {
        ResolverConfig::default()
    }

    fn customer(id: &str, name: &str) -> CatalogCustomer {
        CatalogCustomer { external_id: id.to_string(), display_name: name.to_string(), company_name: None }
    }

    #[test]
    fn exact_normalized_match_resolves() {
        let mut extract = CustomerExtract::new("  ACME, Corp.  ", vec![]);
        let customers = vec![customer("cust-1", "Acme Corp")];
        let issue = resolve_customer(&mut extract, &customers, &config());
        assert!(issue.is_none());
        assert_eq!(extract.resolution_status, CustomerResolutionStatus::Resolved);
        assert_eq!(extract.resolved_external_id.as_deref(), Some("cust-1"));
    }

    #[test]
    fn clear_fuzzy_winner_resolves() {
        let mut extract = CustomerExtract::new("Acme Corp Inc", vec![]);
        let customers = vec![customer("cust-1", "Acme Corp"), customer("cust-2", "Totally Different Co")];
        let issue = resolve_customer(&mut extract, &customers, &config());
        assert!(issue.is_none());
        assert_eq!(extract.resolution_status, CustomerResolutionStatus::Resolved);
    }

    #[test]
    fn close_fuzzy_candidates_are_ambiguous() {
        let mut extract = CustomerExtract::new("Acme Corp", vec![]);
        let customers = vec![customer("cust-1", "Acme Corpo"), customer("cust-2", "Acme Corps")];
        let issue = resolve_customer(&mut extract, &customers, &config());
        assert_eq!(extract.resolution_status, CustomerResolutionStatus::Ambiguous);
        assert!(issue.unwrap().code == IssueCode::AmbiguousCustomer);
    }

    #[test]
    fn low_confidence_fuzzy_needs_user_input() {
        let mut extract = CustomerExtract::new("Acme", vec![]);
        let customers = vec![customer("cust-1", "Acme Corporation Holdings")];
        resolve_customer(&mut extract, &customers, &config());
        assert!(matches!(extract.resolution_status, CustomerResolutionStatus::NeedsUserInput | CustomerResolutionStatus::NotFound));
    }

    #[test]
    fn no_match_is_not_found() {
        let mut extract = CustomerExtract::new("Zzzzqqqxx", vec![]);
        let customers = vec![customer("cust-1", "Acme Corp")];
        let issue = resolve_customer(&mut extract, &customers, &config());
        assert_eq!(extract.resolution_status, CustomerResolutionStatus::NotFound);
        assert_eq!(issue.unwrap().severity, Severity::Blocker);
    }
}
