//! Validation utilities.

use crate::RelayError;
use validator::{Validate, ValidationErrors};

/// Extension trait for validation.
pub trait ValidateExt: Validate {
    /// Validates the struct and returns a `RelayError` on failure.
    fn validate_request(&self) -> Result<(), RelayError> {
        self.validate().map_err(validation_errors_to_relay_error)
    }
}

impl<T: Validate> ValidateExt for T {}

/// Converts `validator::ValidationErrors` to `RelayError`.
#[must_use]
pub fn validation_errors_to_relay_error(errors: ValidationErrors) -> RelayError {
    let mut messages: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errors)| {
            errors.iter().map(move |error| {
                let message = error
                    .message
                    .as_ref()
                    .map_or_else(|| error.code.to_string(), ToString::to_string);
                format!("{}: {}", field, message)
            })
        })
        .collect();
    messages.sort();

    RelayError::Validation(messages.join("; "))
}

/// Common validation functions.
pub mod rules {
    use validator::{ValidateEmail, ValidationError};

    /// Validates that a string is not blank (not empty after trimming).
    pub fn not_blank(value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new("not_blank"));
        }
        Ok(())
    }

    /// Validates that every entry of an address list is an email address.
    pub fn email_list(values: &[String]) -> Result<(), ValidationError> {
        if values.iter().all(|v| v.validate_email()) {
            Ok(())
        } else {
            Err(ValidationError::new("invalid_email"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::rules::*;

    #[test]
    fn test_not_blank() {
        assert!(not_blank("hello").is_ok());
        assert!(not_blank("   ").is_err());
    }

    #[test]
    fn test_email_list() {
        assert!(email_list(&["a@example.com".into(), "b@example.org".into()]).is_ok());
        assert!(email_list(&["a@example.com".into(), "nope".into()]).is_err());
        assert!(email_list(&[]).is_ok());
    }
}
