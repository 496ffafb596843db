//! Phone number normalization
//!
//! Provider webhooks, the directory and the AI platform all report numbers in
//! different shapes (`0412 345 678`, `+61412345678`, `61412345678`). Every
//! comparison in the engine goes through [`normalize`] so they can be matched.
//!
//! Australian numbers canonicalize to E.164 (`+61` followed by the 9-digit
//! national significant number). Other `+`-prefixed numbers keep their digits.
//! Anything that is not a phone number at all, such as a browser endpoint
//! `client:alice`, comes back unchanged as its own sole variant.

use serde::Serialize;

const AU_COUNTRY_CODE: &str = "61";
const AU_NSN_LEN: usize = 9;

/// Shortest digit run that may match by suffix
const MIN_SUFFIX_MATCH_DIGITS: usize = 8;

/// A normalized phone number and the textual forms it is known by
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedPhone {
    pub canonical: String,
    pub variants: Vec<String>,
}

impl NormalizedPhone {
    fn opaque(input: &str) -> Self {
        Self {
            canonical: input.to_string(),
            variants: vec![input.to_string()],
        }
    }

    /// Whether the input was understood as a phone number
    pub fn is_phone_number(&self) -> bool {
        self.canonical.strip_prefix('+').unwrap_or(&self.canonical).chars().all(|c| c.is_ascii_digit())
            && !self.canonical.is_empty()
    }

    fn digit_forms(&self) -> impl Iterator<Item = &str> {
        self.variants
            .iter()
            .map(|v| v.strip_prefix('+').unwrap_or(v))
            .filter(|v| !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()))
    }
}

/// Normalize a free-form phone string. Never fails.
///
/// # Examples
///
/// ```
/// use careline_call_engine::phone::normalize;
///
/// let a = normalize("0412 345 678");
/// let b = normalize("+61412345678");
/// assert_eq!(a.canonical, "+61412345678");
/// assert_eq!(a.canonical, b.canonical);
/// assert_eq!(normalize(&a.canonical), a);
/// ```
pub fn normalize(input: &str) -> NormalizedPhone {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return NormalizedPhone::opaque(input);
    }

    let has_plus = trimmed.starts_with('+');
    let body = if has_plus { &trimmed[1..] } else { trimmed };
    if !body
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')' | '.'))
    {
        return NormalizedPhone::opaque(input);
    }

    let digits: String = body.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return NormalizedPhone::opaque(input);
    }

    if let Some(nsn) = au_national_significant_number(&digits, has_plus) {
        return NormalizedPhone {
            canonical: format!("+{}{}", AU_COUNTRY_CODE, nsn),
            variants: vec![
                format!("+{}{}", AU_COUNTRY_CODE, nsn),
                format!("{}{}", AU_COUNTRY_CODE, nsn),
                format!("0{}", nsn),
                nsn.to_string(),
            ],
        };
    }

    if has_plus {
        NormalizedPhone {
            canonical: format!("+{}", digits),
            variants: vec![format!("+{}", digits), digits],
        }
    } else {
        NormalizedPhone {
            canonical: digits.clone(),
            variants: vec![digits],
        }
    }
}

/// Canonical form only
pub fn canonical(input: &str) -> String {
    normalize(input).canonical
}

fn au_national_significant_number(digits: &str, has_plus: bool) -> Option<&str> {
    let nsn = if has_plus {
        let rest = digits.strip_prefix(AU_COUNTRY_CODE)?;
        // "+61 (0)4..." style trunk prefix
        if rest.len() == AU_NSN_LEN + 1 && rest.starts_with('0') {
            &rest[1..]
        } else {
            rest
        }
    } else if let Some(rest) = digits.strip_prefix("0061") {
        rest
    } else if digits.len() == AU_NSN_LEN + 2 && digits.starts_with(AU_COUNTRY_CODE) {
        &digits[2..]
    } else if digits.len() == AU_NSN_LEN + 1 && digits.starts_with('0') {
        &digits[1..]
    } else if digits.len() == AU_NSN_LEN && matches!(digits.as_bytes()[0], b'2' | b'3' | b'4' | b'7' | b'8') {
        digits
    } else {
        return None;
    };

    (nsn.len() == AU_NSN_LEN && !nsn.starts_with('0')).then_some(nsn)
}

/// Whether two raw numbers refer to the same line
///
/// Equal canonical forms match. Otherwise digit forms match by suffix so a
/// number reported without its country code still lines up, provided the
/// shorter side has at least eight digits.
pub fn phones_match(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    normalized_match(&a, &b)
}

/// [`phones_match`] for values that are already normalized
pub fn normalized_match(a: &NormalizedPhone, b: &NormalizedPhone) -> bool {
    if a.canonical == b.canonical {
        return true;
    }
    for da in a.digit_forms() {
        for db in b.digit_forms() {
            let (short, long) = if da.len() <= db.len() { (da, db) } else { (db, da) };
            if short.len() >= MIN_SUFFIX_MATCH_DIGITS && long.ends_with(short) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_au_mobile_forms_share_canonical() {
        let forms = ["0412345678", "+61412345678", "61412345678", "0412 345 678", "+61 (0)412 345 678", "0061412345678", "412345678"];
        for form in forms {
            assert_eq!(canonical(form), "+61412345678", "form {form}");
        }
    }

    #[test]
    fn test_au_variants() {
        let phone = normalize("(02) 9876 5432");
        assert_eq!(phone.canonical, "+61298765432");
        assert_eq!(
            phone.variants,
            vec!["+61298765432", "61298765432", "0298765432", "298765432"]
        );
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "0412345678",
            "+61412345678",
            "+1 (415) 555-0100",
            "1300 123 456",
            "client:alice",
            "",
            "   ",
            "anonymous",
            "+",
            "12",
        ];
        for input in inputs {
            let once = normalize(input);
            let twice = normalize(&once.canonical);
            assert_eq!(once.canonical, twice.canonical, "input {input:?}");
        }
    }

    #[test]
    fn test_unparseable_input_is_returned_unchanged() {
        let phone = normalize("client:alice");
        assert_eq!(phone.canonical, "client:alice");
        assert_eq!(phone.variants, vec!["client:alice"]);
        assert!(!phone.is_phone_number());

        let blank = normalize("");
        assert_eq!(blank.canonical, "");
        assert_eq!(blank.variants, vec![""]);
    }

    #[test]
    fn test_international_numbers_keep_digits() {
        let phone = normalize("+1 415-555-0100");
        assert_eq!(phone.canonical, "+14155550100");
        assert_eq!(phone.variants, vec!["+14155550100", "14155550100"]);
    }

    #[test]
    fn test_phones_match_across_formats() {
        assert!(phones_match("0412345678", "+61412345678"));
        assert!(phones_match("61412345678", "0412 345 678"));
        assert!(phones_match("+14155550100", "4155550100"));
        assert!(!phones_match("0412345678", "0412345679"));
        assert!(!phones_match("client:alice", "client:bob"));
        assert!(phones_match("client:alice", "client:alice"));
    }

    #[test]
    fn test_short_numbers_do_not_suffix_match() {
        assert!(!phones_match("5678", "0412345678"));
        assert!(!phones_match("000", "+61000"));
    }
}
