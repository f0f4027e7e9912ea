//! Provider selection: pick 3 distinct-family providers from a pool,
//! reproducibly from a seed.

use crate::provider::ProviderDescriptor;

/// How many providers a committee round selects.
pub const COMMITTEE_SIZE: usize = 3;

/// A small deterministic PRNG (xorshift64*) so selection is reproducible
/// from a seed stored in the event log without pulling in a random-number
/// crate for what is, here, pure shuffling.
struct Xorshift64 {
    state: u64,
}

impl Xorshift64 {
    fn new(seed: u64) -> Self {
        Self { state: if seed == 0 { 0x9E3779B97F4A7C15 } else { seed } }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }
}

fn deterministic_shuffle<T: Clone>(items: &[T], seed: u64) -> Vec<T> {
    let mut rng = Xorshift64::new(seed);
    let mut indexed: Vec<(u64, T)> = items.iter().map(|item| (rng.next_u64(), item.clone())).collect();
    indexed.sort_by_key(|(key, _)| *key);
    indexed.into_iter().map(|(_, item)| item).collect()
}

/// Selects up to [`COMMITTEE_SIZE`] providers from `pool`, enforcing that
/// no two selected providers share a `family`. Selection order is a
/// deterministic shuffle of `pool` keyed on `seed`, so the same seed
/// always yields the same selection for the same pool.
///
/// Returns fewer than [`COMMITTEE_SIZE`] providers if the pool doesn't
/// have enough distinct families.
pub fn select_providers(pool: &[ProviderDescriptor], seed: u64) -> Vec<ProviderDescriptor> {
    let shuffled = deterministic_shuffle(pool, seed);
    let mut selected: Vec<ProviderDescriptor> = Vec::with_capacity(COMMITTEE_SIZE);
    for candidate in shuffled {
        if selected.len() == COMMITTEE_SIZE {
            break;
        }
        if !selected.iter().any(|p| p.family == candidate.family) {
            selected.push(candidate);
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Vec<ProviderDescriptor> {
        vec![
            ProviderDescriptor { id: "a1".to_string(), family: "vendor-a".to_string() },
            ProviderDescriptor { id: "a2".to_string(), family: "vendor-a".to_string() },
            ProviderDescriptor { id: "b1".to_string(), family: "vendor-b".to_string() },
            ProviderDescriptor { id: "c1".to_string(), family: "vendor-c".to_string() },
            ProviderDescriptor { id: "d1".to_string(), family: "vendor-d".to_string() },
        ]
    }

    #[test]
    fn selects_three_distinct_families() {
        let selected = select_providers(&pool(), 42);
        assert_eq!(selected.len(), COMMITTEE_SIZE);
        let families: std::collections::BTreeSet<&str> = selected.iter().map(|p| p.family.as_str()).collect();
        assert_eq!(families.len(), COMMITTEE_SIZE);
    }

    #[test]
    fn same_seed_is_reproducible() {
        assert_eq!(select_providers(&pool(), 7), select_providers(&pool(), 7));
    }

    #[test]
    fn different_seeds_can_select_differently() {
        let selections: std::collections::BTreeSet<Vec<String>> =
            (0..20).map(|seed| select_providers(&pool(), seed).into_iter().map(|p| p.id).collect()).collect();
        assert!(selections.len() > 1);
    }

    #[test]
    fn fewer_families_than_committee_size_yields_partial_selection() {
        let small_pool = vec![
            ProviderDescriptor { id: "a1".to_string(), family: "vendor-a".to_string() },
            ProviderDescriptor { id: "b1".to_string(), family: "vendor-b".to_string() },
        ];
        let selected = select_providers(&small_pool, 1);
        assert_eq!(selected.len(), 2);
    }
}
