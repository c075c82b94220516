//! Domain error model.

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). None of these are retried; infrastructure failures
/// belong to the store layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced resource/unit/client/document does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A document number is already used by another document of the same kind.
    #[error("document number already exists: {0}")]
    DuplicateNumber(String),

    /// A reference entity name is already taken within its kind.
    #[error("name already exists: {0}")]
    DuplicateName(String),

    /// A referenced resource/unit/client exists but is archived.
    #[error("archived: {0}")]
    Archived(String),

    /// A decreasing batch would drive a balance below zero.
    #[error(
        "insufficient balance for {resource} ({unit}): requested {requested}, available {available}"
    )]
    InsufficientBalance {
        resource: String,
        unit: String,
        requested: Decimal,
        available: Decimal,
    },

    /// The requested action is not allowed in the document's current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// A reference entity cannot be deleted while documents or balances use it.
    #[error("in use: {0}")]
    InUse(String),

    /// A conflict occurred (e.g. concurrent modification).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn duplicate_number(number: impl Into<String>) -> Self {
        Self::DuplicateNumber(number.into())
    }

    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName(name.into())
    }

    pub fn archived(what: impl Into<String>) -> Self {
        Self::Archived(what.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn in_use(msg: impl Into<String>) -> Self {
        Self::InUse(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_balance_message_names_resource_and_unit() {
        let err = DomainError::InsufficientBalance {
            resource: "Bolts".to_string(),
            unit: "box".to_string(),
            requested: Decimal::new(100, 0),
            available: Decimal::new(50, 0),
        };
        assert_eq!(
            err.to_string(),
            "insufficient balance for Bolts (box): requested 100, available 50"
        );
    }
}
