//! Scan field validation for security and wire compatibility.
//!
//! The orchestrator rejects malformed identifiers server-side, but anything
//! that slips into the durable queue gets retried forever, so every field is
//! validated before a scan enters the delivery path.

use thiserror::Error;

/// Maximum length for token and device identifiers.
pub const MAX_ID_LENGTH: usize = 100;

/// Team identifiers are exactly this many digits.
pub const TEAM_ID_LENGTH: usize = 3;

/// Field validation errors with helpful messages
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldError {
    #[error("{field} is empty")]
    Empty { field: &'static str },

    #[error("{field} is too long (maximum {max} characters)")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} contains invalid characters (allowed: A-Z, a-z, 0-9, _)")]
    InvalidCharacters { field: &'static str },

    #[error("team id must be exactly 3 digits (e.g. \"001\")")]
    InvalidTeamId,
}

fn check_identifier(field: &'static str, value: &str) -> Result<(), FieldError> {
    if value.is_empty() {
        return Err(FieldError::Empty { field });
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(FieldError::TooLong {
            field,
            max: MAX_ID_LENGTH,
        });
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(FieldError::InvalidCharacters { field });
    }
    Ok(())
}

/// Validate a token identifier: `[A-Za-z0-9_]{1,100}`.
pub fn validate_token_id(value: &str) -> Result<(), FieldError> {
    check_identifier("token id", value)
}

/// Validate a device identifier. Same character class as token ids.
pub fn validate_device_id(value: &str) -> Result<(), FieldError> {
    check_identifier("device id", value)
}

/// Validate a team identifier: exactly three ASCII digits.
pub fn validate_team_id(value: &str) -> Result<(), FieldError> {
    if value.len() != TEAM_ID_LENGTH || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(FieldError::InvalidTeamId);
    }
    Ok(())
}
