//! Balance Ledger: the only writer of balance rows.
//!
//! Every mutating operation runs the same batch algorithm inside the caller's
//! transaction:
//!
//! 1. Zero deltas are dropped (`DeltaBatch` nets them away).
//! 2. All touched keys are read and locked in one round trip, in key order.
//! 3. Every negative delta is checked against that snapshot; one shortfall
//!    aborts the whole batch before anything is written.
//! 4. Deltas are applied to the snapshot and the touched rows are staged.
//!
//! The ledger never commits; the Transaction Coordinator does.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use stockroom_core::DomainError;
use stockroom_inventory::{Balance, BalanceKey, DeltaBatch, LedgerEffect, Shortfall};
use stockroom_reference::{ReferenceEntity, Resource, UnitOfMeasure};

use crate::context::CommandContext;
use crate::error::CommandError;
use crate::store::{ReferenceRepository, StoreTransaction};

/// A shortfall described with human-readable names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShortfallReport {
    pub resource: String,
    pub unit: String,
    pub requested: Decimal,
    pub available: Decimal,
}

impl From<ShortfallReport> for DomainError {
    fn from(report: ShortfallReport) -> Self {
        DomainError::InsufficientBalance {
            resource: report.resource,
            unit: report.unit,
            requested: report.requested,
            available: report.available,
        }
    }
}

/// Ledger operations bound to one open transaction and command context.
pub struct BalanceLedger<'a, T> {
    tx: &'a mut T,
    ctx: &'a CommandContext,
}

impl<'a, T: StoreTransaction> BalanceLedger<'a, T> {
    pub fn new(tx: &'a mut T, ctx: &'a CommandContext) -> Self {
        Self { tx, ctx }
    }

    /// Add positive amounts, creating rows that do not exist yet.
    #[instrument(skip(self, amounts), fields(key_count = amounts.len()), err)]
    pub async fn increase(&mut self, amounts: &DeltaBatch) -> Result<(), CommandError> {
        ensure_amounts(amounts)?;
        self.apply(amounts).await
    }

    /// Remove positive amounts; fails as a whole if any key is short.
    #[instrument(skip(self, amounts), fields(key_count = amounts.len()), err)]
    pub async fn decrease(&mut self, amounts: &DeltaBatch) -> Result<(), CommandError> {
        ensure_amounts(amounts)?;
        self.apply(&amounts.negated()).await
    }

    /// Apply signed deltas; the negative subset is validated like `decrease`.
    #[instrument(skip(self, deltas), fields(key_count = deltas.len()), err)]
    pub async fn adjust(&mut self, deltas: &DeltaBatch) -> Result<(), CommandError> {
        self.apply(deltas).await
    }

    /// Read-only check that every amount is available.
    ///
    /// Uses `snapshot` when given, otherwise an unlocked read. Fails with the
    /// first shortfall in key order.
    pub async fn validate_availability(
        &mut self,
        amounts: &DeltaBatch,
        snapshot: Option<&BTreeMap<BalanceKey, Balance>>,
    ) -> Result<(), CommandError> {
        let first = self.shortfalls(amounts, snapshot).await?.into_iter().next();
        match first {
            Some(shortfall) => Err(DomainError::from(self.describe(shortfall).await?).into()),
            None => Ok(()),
        }
    }

    /// Every amount the current balances cannot cover, with names. Never fails
    /// on insufficiency.
    pub async fn check_availability(
        &mut self,
        amounts: &DeltaBatch,
    ) -> Result<Vec<ShortfallReport>, CommandError> {
        let mut reports = Vec::new();
        for shortfall in self.shortfalls(amounts, None).await? {
            reports.push(self.describe(shortfall).await?);
        }
        Ok(reports)
    }

    /// Carry out what a document event asks of the ledger.
    pub async fn apply_effect(&mut self, effect: &LedgerEffect) -> Result<(), CommandError> {
        match effect {
            LedgerEffect::None => Ok(()),
            LedgerEffect::Increase(amounts) => self.increase(amounts).await,
            LedgerEffect::Decrease(amounts) => self.decrease(amounts).await,
            LedgerEffect::Adjust(deltas) => self.adjust(deltas).await,
            LedgerEffect::CheckAvailability(amounts) => {
                self.validate_availability(amounts, None).await
            }
        }
    }

    async fn shortfalls(
        &mut self,
        amounts: &DeltaBatch,
        snapshot: Option<&BTreeMap<BalanceKey, Balance>>,
    ) -> Result<Vec<Shortfall>, CommandError> {
        ensure_amounts(amounts)?;
        if amounts.is_empty() {
            return Ok(Vec::new());
        }
        let wanted = amounts.negated();
        if let Some(snapshot) = snapshot {
            return Ok(wanted.shortfalls(snapshot));
        }
        self.ctx.check()?;
        let current = self.tx.read_balances(&wanted.keys()).await?;
        Ok(wanted.shortfalls(&current))
    }

    async fn apply(&mut self, deltas: &DeltaBatch) -> Result<(), CommandError> {
        if deltas.is_empty() {
            return Ok(());
        }
        self.ctx.check()?;

        let snapshot = self.tx.locked_read(&deltas.keys()).await?;
        if let Some(shortfall) = deltas.first_shortfall(&snapshot) {
            return Err(DomainError::from(self.describe(shortfall).await?).into());
        }

        let updated = deltas.apply_to(&snapshot)?;
        self.ctx.check()?;
        self.tx.upsert_balances(&updated).await?;
        debug!(rows = updated.len(), "balances staged");
        Ok(())
    }

    /// Look up display names only once a shortfall needs reporting.
    async fn describe(&mut self, shortfall: Shortfall) -> Result<ShortfallReport, CommandError> {
        let key = shortfall.key;
        let resource = ReferenceRepository::<Resource>::find(&mut *self.tx, key.resource_id)
            .await?
            .map(|r| r.name().to_string())
            .unwrap_or_else(|| key.resource_id.to_string());
        let unit = ReferenceRepository::<UnitOfMeasure>::find(&mut *self.tx, key.unit_id)
            .await?
            .map(|u| u.name().to_string())
            .unwrap_or_else(|| key.unit_id.to_string());

        Ok(ShortfallReport {
            resource,
            unit,
            requested: shortfall.requested,
            available: shortfall.available,
        })
    }
}

fn ensure_amounts(amounts: &DeltaBatch) -> Result<(), CommandError> {
    if amounts.is_increase_only() {
        Ok(())
    } else {
        Err(DomainError::validation("ledger amounts must be positive").into())
    }
}
