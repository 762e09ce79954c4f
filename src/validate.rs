//! Input checks that run before any backend round-trip.

#[cfg(test)]
#[path = "validate_test.rs"]
mod tests;

use crate::error::ErrorCode;

/// Minimum accepted length for a new password.
pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid email")]
    InvalidEmail,
    #[error("password must be at least {min} characters")]
    PasswordTooShort { min: usize },
    #[error("{0} cannot be blank")]
    BlankField(&'static str),
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
}

impl ErrorCode for ValidationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidEmail => "E_INVALID_EMAIL",
            Self::PasswordTooShort { .. } => "E_PASSWORD_TOO_SHORT",
            Self::BlankField(_) => "E_BLANK_FIELD",
            Self::MissingFields(_) => "E_MISSING_FIELDS",
        }
    }
}

/// Trim and lowercase an email, rejecting anything without exactly one `@`
/// between non-empty parts.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(normalized)
}

/// Like [`normalize_email`] but reporting a [`ValidationError`].
pub fn require_email(email: &str) -> Result<String, ValidationError> {
    normalize_email(email).ok_or(ValidationError::InvalidEmail)
}

pub fn validate_new_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::PasswordTooShort { min: MIN_PASSWORD_LEN });
    }
    Ok(())
}

/// Whether a required text field has any non-whitespace content.
#[must_use]
pub fn is_filled(value: &str) -> bool {
    !value.trim().is_empty()
}
