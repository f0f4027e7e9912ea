//! GTIN validation: length and check-digit.

use crate::digits::normalize_digits;

/// Lengths a GTIN may legally take: UPC-A/GTIN-8 family, GTIN-12, GTIN-13
/// (EAN-13), GTIN-14.
const VALID_LENGTHS: [usize; 4] = [8, 12, 13, 14];

/// Validates `candidate` as a GTIN: normalizes digits, checks the length
/// is one of the four legal GTIN lengths, and verifies the trailing
/// check digit using the standard alternating 3/1 weighting (from the
/// rightmost digit).
///
/// Returns `false` for anything that isn't all-digit after normalization.
pub fn is_valid_gtin(candidate: &str) -> bool {
    let normalized = normalize_digits(candidate.trim());
    if !normalized.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    if !VALID_LENGTHS.contains(&normalized.len()) {
        return false;
    }
    check_digit_valid(&normalized)
}

fn check_digit_valid(digits: &str) -> bool {
    let values: Vec<u32> = digits.chars().map(|c| c.to_digit(10).unwrap()).collect();
    let (body, check) = values.split_at(values.len() - 1);
    let check = check[0];

    // Weighting alternates 3/1 starting from the rightmost digit of the body.
    let sum: u32 = body
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &digit)| if i % 2 == 0 { digit * 3 } else { digit })
        .sum();
    let computed = (10 - (sum % 10)) % 10;
    computed == check
}
