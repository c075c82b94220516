//! Fixed-point line quantities.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Number of fractional digits a quantity may carry.
///
/// Matches the `NUMERIC(20, 6)` columns of the balance and line tables.
pub const QUANTITY_SCALE: u32 = 6;

/// Integer digits the `NUMERIC(20, 6)` columns leave room for.
pub const QUANTITY_INTEGER_DIGITS: u32 = 14;

/// Exclusive upper bound of every stored quantity, line or balance (10^14).
pub fn quantity_limit() -> Decimal {
    Decimal::from(10u64.pow(QUANTITY_INTEGER_DIGITS))
}

/// Strictly positive document line quantity.
///
/// Stored normalized, so `1.50` and `1.5` are the same value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    pub fn new(value: Decimal) -> DomainResult<Self> {
        let value = value.normalize();
        if value <= Decimal::ZERO {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if value.scale() > QUANTITY_SCALE {
            return Err(DomainError::validation(format!(
                "quantity {value} has more than {QUANTITY_SCALE} fractional digits"
            )));
        }
        if value >= quantity_limit() {
            return Err(DomainError::validation(format!(
                "quantity {value} exceeds {QUANTITY_INTEGER_DIGITS} integer digits"
            )));
        }
        Ok(Self(value))
    }

    /// Whole-number convenience constructor.
    pub fn units(value: u32) -> DomainResult<Self> {
        Self::new(Decimal::from(value))
    }

    pub fn value(self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl core::fmt::Display for Quantity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl ValueObject for Quantity {}
