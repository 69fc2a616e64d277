//! Pure checks for everything the requester types in.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::ValidationError;

pub const USER_CONFIRM_PHRASE: &str = "delete all";
pub const ADMIN_CONFIRM_PHRASE: &str = "confirm admin delete";

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?[1-9]\d{7,14}$").expect("static phone regex"))
}

/// Optional leading `+`, first digit 1-9, 8 to 15 digits in total.
pub fn validate_phone(s: &str) -> bool {
    phone_re().is_match(s.trim())
}

pub fn validate_channel_id(s: &str) -> Result<i64, ValidationError> {
    let id = s
        .trim()
        .parse::<i64>()
        .map_err(|_| ValidationError::BadFormat)?;
    if id >= 0 {
        return Err(ValidationError::NotNegative);
    }
    Ok(id)
}

pub fn validate_api_id(s: &str) -> Result<i32, ValidationError> {
    let id = s
        .trim()
        .parse::<i32>()
        .map_err(|_| ValidationError::BadFormat)?;
    if id <= 0 {
        return Err(ValidationError::NotPositive);
    }
    Ok(id)
}

/// Exactly 32 lowercase hex characters. No trimming: a pasted hash with
/// stray characters is rejected.
pub fn validate_api_hash(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Login codes are often pasted as `12 345`; whitespace anywhere is ignored.
pub fn normalize_code(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

pub fn validate_code(s: &str) -> bool {
    let code = normalize_code(s);
    code.len() == 5 && code.bytes().all(|b| b.is_ascii_digit())
}

pub fn validate_confirmation(s: &str, expected_phrase: &str) -> bool {
    s.trim().to_lowercase() == expected_phrase.to_lowercase()
}

/// Highest message id for the dense-range strategy.
pub fn validate_max_id(s: &str) -> Result<i32, ValidationError> {
    let id = s
        .trim()
        .parse::<i32>()
        .map_err(|_| ValidationError::BadFormat)?;
    if id <= 0 {
        return Err(ValidationError::NotPositive);
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phone_pattern() {
        assert!(validate_phone("+14155552671"));
        assert!(validate_phone("4915112345678"));
        assert!(validate_phone(" +12345678 "));
        assert!(!validate_phone("+01234567890"));
        assert!(!validate_phone("+1234567"));
        assert!(!validate_phone("+1234567890123456"));
        assert!(!validate_phone("+1 415 555 2671"));
        assert!(!validate_phone(""));
    }

    #[test]
    fn malformed_channel_ids_are_rejected() {
        for bad in ["", "abc", "-100abc", "12.5", "--5", "-"] {
            assert_eq!(
                validate_channel_id(bad),
                Err(ValidationError::BadFormat),
                "{bad}"
            );
        }
        for non_negative in ["0", "5", "100123456789", "+7"] {
            assert_eq!(
                validate_channel_id(non_negative),
                Err(ValidationError::NotNegative),
                "{non_negative}"
            );
        }
        assert_eq!(validate_channel_id(" -100123456789 "), Ok(-100123456789));
    }

    #[test]
    fn api_hash_is_32_lowercase_hex() {
        assert!(validate_api_hash("0123456789abcdef0123456789abcdef"));
        assert!(!validate_api_hash("0123456789ABCDEF0123456789abcdef"));
        assert!(!validate_api_hash("0123456789abcdef0123456789abcde"));
        assert!(!validate_api_hash("0123456789abcdef0123456789abcdef0"));
        assert!(!validate_api_hash("0123456789abcdeg0123456789abcdef"));
        assert!(!validate_api_hash(""));
    }

    #[test]
    fn api_hash_matches_definition_for_generated_inputs() {
        let alphabet: Vec<char> = "0123456789abcdefABCXYZ -_g".chars().collect();
        for len in [0usize, 1, 31, 32, 33] {
            for seed in 0..alphabet.len() {
                let s: String = (0..len)
                    .map(|i| alphabet[(seed * 7 + i * 3) % alphabet.len()])
                    .collect();
                let expected =
                    s.len() == 32 && s.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
                assert_eq!(validate_api_hash(&s), expected, "{s:?}");
            }
        }
    }

    #[test]
    fn code_is_five_digits_ignoring_whitespace() {
        assert!(validate_code("12345"));
        assert!(validate_code("12 345"));
        assert!(validate_code(" 1 2 3 4 5 "));
        assert!(!validate_code("12a45"));
        assert!(!validate_code("1234"));
        assert!(!validate_code("123456"));
        assert_eq!(normalize_code("12 3\t45"), "12345");
    }

    #[test]
    fn confirmation_is_case_insensitive_exact() {
        assert!(validate_confirmation("DELETE ALL", USER_CONFIRM_PHRASE));
        assert!(validate_confirmation("  Confirm Admin Delete ", ADMIN_CONFIRM_PHRASE));
        assert!(!validate_confirmation("delete all please", USER_CONFIRM_PHRASE));
        assert!(!validate_confirmation("no", ADMIN_CONFIRM_PHRASE));
    }

    #[test]
    fn api_id_and_max_id_are_positive() {
        assert_eq!(validate_api_id("123456"), Ok(123456));
        assert_eq!(validate_api_id("0"), Err(ValidationError::NotPositive));
        assert_eq!(validate_api_id("x1"), Err(ValidationError::BadFormat));
        assert_eq!(validate_max_id("150"), Ok(150));
        assert_eq!(validate_max_id("-3"), Err(ValidationError::NotPositive));
    }
}
