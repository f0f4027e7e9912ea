//! Digit normalization: Persian and Arabic-Indic digits to ASCII.

/// Converts Persian (U+06F0-U+06F9) and Arabic-Indic (U+0660-U+0669)
/// digits in `input` to ASCII digits, leaving everything else untouched.
///
/// Idempotent: `normalize_digits(&normalize_digits(x)) == normalize_digits(x)`,
/// since the output never contains characters in either source range.
pub fn normalize_digits(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            let code = c as u32;
            if (0x06F0..=0x06F9).contains(&code) {
                char::from_digit(code - 0x06F0, 10).unwrap_or(c)
            } else if (0x0660..=0x0669).contains(&code) {
                char::from_digit(code - 0x0660, 10).unwrap_or(c)
            } else {
                c
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_persian_digits() {
        assert_eq!(normalize_digits("\u{06f1}\u{06f5}"), "15");
    }

    #[test]
    fn converts_arabic_indic_digits() {
        assert_eq!(normalize_digits("\u{0662}\u{0660}"), "20");
    }

    #[test]
    fn leaves_ascii_and_other_text_untouched() {
        assert_eq!(normalize_digits("SKU-001 x10"), "SKU-001 x10");
    }

    #[test]
    fn is_idempotent() {
        let input = "\u{06f1}\u{06f2} units";
        let once = normalize_digits(input);
        let twice = normalize_digits(&once);
        assert_eq!(once, twice);
    }

    proptest::proptest! {
        #[test]
        fn idempotent_over_arbitrary_strings(s in ".*") {
            let once = normalize_digits(&s);
            let twice = normalize_digits(&once);
            proptest::prop_assert_eq!(once, twice);
        }
    }
}
