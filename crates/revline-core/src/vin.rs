//! VIN validation.
//!
//! A VIN is exactly 17 alphanumeric characters; the letters I, O, and Q
//! are excluded to avoid confusion with 1 and 0. VINs are uppercased on
//! write so round-trips compare equal.

use crate::error::{CoreError, Result};

/// Validate and canonicalize a VIN. Returns the uppercased form.
pub fn normalize(raw: &str) -> Result<String> {
    let vin = raw.trim().to_ascii_uppercase();

    if vin.len() != 17 {
        return Err(CoreError::Validation(format!(
            "VIN must be exactly 17 characters, got {}",
            vin.len()
        )));
    }

    for c in vin.chars() {
        if !c.is_ascii_alphanumeric() || matches!(c, 'I' | 'O' | 'Q') {
            return Err(CoreError::Validation(format!(
                "VIN contains invalid character '{c}'"
            )));
        }
    }

    Ok(vin)
}

pub fn is_valid(raw: &str) -> bool {
    normalize(raw).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uppercases_on_normalize() {
        assert_eq!(
            normalize("1hgcm82633a004352").unwrap(),
            "1HGCM82633A004352"
        );
    }

    #[test]
    fn idempotent() {
        let once = normalize("1hgcm82633a004352").unwrap();
        assert_eq!(normalize(&once).unwrap(), once);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(normalize("1HGCM82633A00435").is_err());
        assert!(normalize("1HGCM82633A0043521").is_err());
    }

    #[test]
    fn rejects_forbidden_letters() {
        assert!(normalize("1HGCM82633A00435I").is_err());
        assert!(normalize("1HGCM82633A00435O").is_err());
        assert!(normalize("1HGCM82633A00435Q").is_err());
    }
}
