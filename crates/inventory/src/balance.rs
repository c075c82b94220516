use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockroom_core::{
    quantity_limit, DomainError, DomainResult, Quantity, ResourceId, UnitId, ValueObject,
};

/// Identity of a balance row: one per (resource, unit) pair.
///
/// `Ord` sorts by resource then unit, which is the lock acquisition order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BalanceKey {
    pub resource_id: ResourceId,
    pub unit_id: UnitId,
}

impl BalanceKey {
    pub fn new(resource_id: ResourceId, unit_id: UnitId) -> Self {
        Self {
            resource_id,
            unit_id,
        }
    }
}

impl core::fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.resource_id, self.unit_id)
    }
}

impl ValueObject for BalanceKey {}

/// On-hand quantity for one (resource, unit) pair. Never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    key: BalanceKey,
    quantity: Decimal,
}

impl Balance {
    pub fn zero(key: BalanceKey) -> Self {
        Self {
            key,
            quantity: Decimal::ZERO,
        }
    }

    /// Rebuild a balance from persisted fields.
    pub fn from_parts(key: BalanceKey, quantity: Decimal) -> DomainResult<Self> {
        if quantity < Decimal::ZERO {
            return Err(DomainError::invariant(format!(
                "stored balance for {key} is negative ({quantity})"
            )));
        }
        Ok(Self { key, quantity })
    }

    pub fn key(&self) -> BalanceKey {
        self.key
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    /// Apply a signed delta, refusing to go below zero or past the stored
    /// quantity range.
    pub fn apply(&mut self, delta: Decimal) -> DomainResult<()> {
        let next = self
            .quantity
            .checked_add(delta)
            .filter(|next| *next < quantity_limit())
            .ok_or_else(|| DomainError::validation(format!("balance overflow for {}", self.key)))?;
        if next < Decimal::ZERO {
            return Err(DomainError::invariant(format!(
                "balance for {} cannot go negative",
                self.key
            )));
        }
        self.quantity = next;
        Ok(())
    }
}

/// A pending signed change to one balance.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub key: BalanceKey,
    pub quantity: Decimal,
}

impl BalanceDelta {
    pub fn new(key: BalanceKey, quantity: Decimal) -> Self {
        Self { key, quantity }
    }

    pub fn increase(key: BalanceKey, quantity: Quantity) -> Self {
        Self::new(key, quantity.value())
    }

    pub fn decrease(key: BalanceKey, quantity: Quantity) -> Self {
        Self::new(key, -quantity.value())
    }

    pub fn is_zero(&self) -> bool {
        self.quantity.is_zero()
    }
}

impl ValueObject for BalanceDelta {}
