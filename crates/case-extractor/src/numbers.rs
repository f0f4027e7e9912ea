//! Locale-tolerant number parsing.

use crate::digits::normalize_digits;

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥', '₹'];

fn strip_currency_and_whitespace(s: &str) -> String {
    s.chars().filter(|c| !CURRENCY_SYMBOLS.contains(c) && !c.is_whitespace()).collect()
}

/// Which separator convention a numeric string was parsed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberStyle {
    /// `,` thousands separator, `.` decimal point.
    UsStyle,
    /// `.` thousands separator, `,` decimal point.
    EuropeanStyle,
    /// No thousands separator present.
    NoSeparators,
}

fn try_us_style(stripped: &str) -> Option<f64> {
    if stripped.matches('.').count() > 1 {
        return None;
    }
    stripped.replace(',', "").parse().ok()
}

fn try_european_style(stripped: &str) -> Option<f64> {
    if stripped.matches(',').count() > 1 {
        return None;
    }
    stripped.replace('.', "").replace(',', ".").parse().ok()
}

fn try_no_separators(stripped: &str) -> Option<f64> {
    if stripped.contains(',') || stripped.matches('.').count() > 1 {
        return None;
    }
    stripped.parse().ok()
}

/// Parses a spreadsheet numeric string, first normalizing Persian/Arabic-
/// Indic digits and stripping currency symbols and whitespace.
///
/// Tries US-style, then European-style, then no-separators, returning the
/// first that yields a finite value. Callers that need to verify the
/// chosen style is consistent with a column's majority pattern should use
/// [`parse_number_with_style`] instead.
pub fn parse_number(s: &str) -> Option<f64> {
    parse_number_with_style(s).map(|(value, _style)| value)
}

/// As [`parse_number`], but also reports which separator convention
/// succeeded, so callers can check the result against a column's majority
/// style.
pub fn parse_number_with_style(s: &str) -> Option<(f64, NumberStyle)> {
    let normalized = normalize_digits(s);
    let stripped = strip_currency_and_whitespace(&normalized);
    if stripped.is_empty() {
        return None;
    }

    for (parser, style) in [
        (try_us_style as fn(&str) -> Option<f64>, NumberStyle::UsStyle),
        (try_european_style, NumberStyle::EuropeanStyle),
        (try_no_separators, NumberStyle::NoSeparators),
    ] {
        if let Some(value) = parser(&stripped) {
            if value.is_finite() {
                return Some((value, style));
            }
        }
    }
    None
}
