//! Helpers shared by the document aggregates.

use crate::error::{DomainError, DomainResult};

/// Maximum length of a document number, in characters.
pub const MAX_NUMBER_LEN: usize = 64;

/// Trim and validate a document number.
pub fn normalize_number(raw: &str) -> DomainResult<String> {
    let number = raw.trim();
    if number.is_empty() {
        return Err(DomainError::validation("document number cannot be empty"));
    }
    if number.chars().count() > MAX_NUMBER_LEN {
        return Err(DomainError::validation(format!(
            "document number cannot exceed {MAX_NUMBER_LEN} characters"
        )));
    }
    Ok(number.to_string())
}
