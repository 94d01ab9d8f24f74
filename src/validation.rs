//! Field checks run before any request reaches the store or the identity provider.

use serde::Serialize;
use thiserror::Error;

/// A rejected form field. Shown next to the field, never logged.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_group_name(name: &str) -> Result<String, FieldError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FieldError::new("groupName", "Group name cannot be empty."));
    }
    Ok(name.to_string())
}

/// Largest amount a single expense or settlement may carry.
pub const MAX_AMOUNT: f64 = 1_000_000_000.0;

/// Parses a money amount typed by a user. Only finite, non-negative numbers up
/// to [`MAX_AMOUNT`] pass.
pub fn parse_amount(input: &str) -> Result<f64, FieldError> {
    let invalid = || FieldError::new("amount", "Please enter a valid amount.");
    let amount: f64 = input.trim().parse().map_err(|_| invalid())?;
    if !amount.is_finite() || (amount.is_sign_negative() && amount != 0.0) {
        return Err(invalid());
    }
    if amount > MAX_AMOUNT {
        return Err(FieldError::new("amount", "Amount cannot exceed 1,000,000,000."));
    }
    // Normalizes "-0"
    Ok(amount.abs())
}

pub fn validate_join(group_id: &str, signed_in: bool) -> Result<String, FieldError> {
    let group_id = group_id.trim();
    if group_id.is_empty() || !signed_in {
        return Err(FieldError::new("groupId", "Missing group ID or not logged in."));
    }
    Ok(group_id.to_string())
}

pub fn validate_display_name(name: &str) -> Result<String, FieldError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FieldError::new("displayName", "Display name is required."));
    }
    Ok(name.to_string())
}

pub fn validate_credentials(email: &str, password: &str) -> Result<(), FieldError> {
    if email.trim().is_empty() {
        return Err(FieldError::new("email", "Email is required."));
    }
    if password.is_empty() {
        return Err(FieldError::new("password", "Password is required."));
    }
    Ok(())
}
