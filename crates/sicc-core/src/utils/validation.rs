//! Validation Utilities
//!
//! Input checks that produce [`SiccError::Validation`] naming the offending
//! field and value.

use crate::error::{SiccError, SiccResult};

/// Reject empty or whitespace-only text
pub fn validate_non_empty(field: &str, value: &str) -> SiccResult<()> {
    if value.trim().is_empty() {
        return Err(SiccError::validation(
            field,
            format!("must not be empty (got {:?})", value),
        ));
    }
    Ok(())
}

/// Reject NaN and infinite values
pub fn validate_finite(field: &str, value: f64) -> SiccResult<()> {
    if !value.is_finite() {
        return Err(SiccError::validation(
            field,
            format!("must be finite (got {})", value),
        ));
    }
    Ok(())
}

/// Require a finite value in `[0, 1]`
pub fn validate_unit_interval(field: &str, value: f64) -> SiccResult<()> {
    validate_finite(field, value)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(SiccError::validation(
            field,
            format!("must be between 0 and 1 (got {})", value),
        ));
    }
    Ok(())
}

/// Require `min <= value <= max`
pub fn validate_limit(field: &str, value: usize, min: usize, max: usize) -> SiccResult<()> {
    if value < min || value > max {
        return Err(SiccError::validation(
            field,
            format!("must be between {} and {} (got {})", min, max, value),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_non_empty() {
        assert!(validate_non_empty("text", "hello").is_ok());
        assert!(validate_non_empty("text", "").is_err());

        let err = validate_non_empty("text", "   \n\t").unwrap_err();
        assert!(err.is_validation());
        assert!(err.to_string().contains("text"));
    }

    #[test]
    fn test_validate_unit_interval() {
        assert!(validate_unit_interval("confidence", 0.0).is_ok());
        assert!(validate_unit_interval("confidence", 1.0).is_ok());
        assert!(validate_unit_interval("confidence", 1.01).is_err());
        assert!(validate_unit_interval("confidence", -0.01).is_err());
        assert!(validate_unit_interval("confidence", f64::NAN).is_err());
        assert!(validate_unit_interval("confidence", f64::INFINITY).is_err());
    }

    #[test]
    fn test_validate_limit() {
        assert!(validate_limit("limit", 1, 1, 100).is_ok());
        assert!(validate_limit("limit", 100, 1, 100).is_ok());

        let err = validate_limit("limit", 0, 1, 100).unwrap_err();
        assert!(err.to_string().contains("limit"));
        assert!(err.to_string().contains("got 0"));
        assert!(validate_limit("limit", 101, 1, 100).is_err());
    }
}
