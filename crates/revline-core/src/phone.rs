//! Phone number normalization and masking.
//!
//! Callers arrive as whatever the telephony provider sends (`+1 (555)
//! 123-4567`, `5551234567`, ...). Everything downstream — DB uniqueness,
//! cache keys, customer lookup — operates on the normalized E.164 form.

use crate::error::{CoreError, Result};

/// Normalize a phone number to E.164.
///
/// Strips formatting, prepends the US country code to bare 10-digit
/// numbers, and rejects anything with fewer than 10 or more than 15
/// digits. Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> Result<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.len() < 10 || digits.len() > 15 {
        return Err(CoreError::Validation(format!(
            "phone number must have 10-15 digits, got {}",
            digits.len()
        )));
    }

    // Bare national US numbers get the country code.
    if digits.len() == 10 {
        return Ok(format!("+1{digits}"));
    }

    Ok(format!("+{digits}"))
}

/// Mask a phone number for logs: keep the last four digits.
///
/// `+15551234567` → `+1******4567`. Never fails; malformed input is
/// masked wholesale.
pub fn mask(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 4 {
        return "****".to_string();
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    let prefix = if phone.starts_with("+1") { "+1" } else { "+" };
    format!("{prefix}{}{}", "*".repeat(digits.len().saturating_sub(5)), tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_us_formats() {
        assert_eq!(normalize("(555) 123-4567").unwrap(), "+15551234567");
        assert_eq!(normalize("555.123.4567").unwrap(), "+15551234567");
        assert_eq!(normalize("+1 555 123 4567").unwrap(), "+15551234567");
        assert_eq!(normalize("15551234567").unwrap(), "+15551234567");
    }

    #[test]
    fn idempotent() {
        let once = normalize("+1 (555) 123-4567").unwrap();
        assert_eq!(normalize(&once).unwrap(), once);
    }

    #[test]
    fn rejects_out_of_range_digit_counts() {
        assert!(normalize("555-1234").is_err());
        assert!(normalize("1234567890123456").is_err());
        assert!(normalize("").is_err());
    }

    #[test]
    fn keeps_international_numbers() {
        assert_eq!(normalize("+44 20 7946 0958").unwrap(), "+442079460958");
    }

    #[test]
    fn masks_all_but_last_four() {
        let masked = mask("+15551234567");
        assert!(masked.ends_with("4567"));
        assert!(!masked.contains("123"));
    }
}
