//! Password policy enforcement
//!
//! Registration and recovery both funnel through `validate_password`.
//! Rejections carry a field-level message so the client can surface them
//! next to the password input.

use crate::error::FieldError;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Check a candidate password against the site policy: at least eight
/// characters, one digit, one uppercase letter and one punctuation or
/// symbol character.
pub fn validate_password(password: &str) -> Result<(), FieldError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(field_error(format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters long"
        )));
    }

    let mut has_digit = false;
    let mut has_upper = false;
    let mut has_special = false;

    for ch in password.chars() {
        if ch.is_ascii_digit() {
            has_digit = true;
        } else if ch.is_uppercase() {
            has_upper = true;
        } else if ch.is_ascii_punctuation() || (!ch.is_alphanumeric() && !ch.is_whitespace()) {
            has_special = true;
        }
    }

    if !has_digit {
        return Err(field_error("Password must contain at least one digit"));
    }
    if !has_upper {
        return Err(field_error(
            "Password must contain at least one uppercase letter",
        ));
    }
    if !has_special {
        return Err(field_error(
            "Password must contain at least one special character",
        ));
    }

    Ok(())
}

fn field_error(message: impl Into<String>) -> FieldError {
    FieldError {
        field: "password".to_string(),
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_compliant_password() {
        assert!(validate_password("Str0ng-pass").is_ok());
    }

    #[test]
    fn rejects_short_password() {
        let err = validate_password("S1!a").unwrap_err();
        assert!(err.message.contains("at least 8"));
    }

    #[test]
    fn rejects_missing_digit() {
        let err = validate_password("Strong-pass").unwrap_err();
        assert!(err.message.contains("digit"));
    }

    #[test]
    fn rejects_missing_uppercase() {
        let err = validate_password("str0ng-pass").unwrap_err();
        assert!(err.message.contains("uppercase"));
    }

    #[test]
    fn rejects_missing_special() {
        let err = validate_password("Str0ngpass").unwrap_err();
        assert!(err.message.contains("special"));
    }

    #[test]
    fn every_rejection_is_a_password_field_error() {
        for candidate in ["short", "nodigits!A", "noupper1!", "NoSpecial1"] {
            if let Err(err) = validate_password(candidate) {
                assert_eq!(err.field, "password");
            }
        }
    }
}
