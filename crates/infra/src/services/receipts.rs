use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use stockroom_core::{Aggregate, DomainError, Event, ReceiptId};
use stockroom_inventory::DocumentLine;
use stockroom_receipts::{
    CreateReceipt, DeleteReceipt, ReceiptCommand, ReceiptDocument, ReceiptEvent, UpdateReceipt,
};

use super::evolve;
use crate::context::CommandContext;
use crate::coordinator::TransactionCoordinator;
use crate::error::CommandError;
use crate::ledger::BalanceLedger;
use crate::store::{Store, StoreTransaction};
use crate::validator;

/// Header and lines of a receipt as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptDraft {
    pub number: String,
    pub date: NaiveDate,
    pub lines: Vec<DocumentLine>,
}

pub struct ReceiptService<S> {
    coordinator: TransactionCoordinator<S>,
}

impl<S> Clone for ReceiptService<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: Store> ReceiptService<S> {
    pub fn new(coordinator: TransactionCoordinator<S>) -> Self {
        Self { coordinator }
    }

    /// Record inbound stock: every line increases its balance.
    #[instrument(skip(self, ctx, draft), fields(command = "receipt.create", number = %draft.number), err)]
    pub async fn create(
        &self,
        ctx: &CommandContext,
        draft: ReceiptDraft,
    ) -> Result<ReceiptId, CommandError> {
        let mut uow = self.coordinator.begin(ctx, "receipt.create").await?;
        let outcome = ctx.guard(create_receipt(uow.tx(), ctx, draft)).await;
        uow.finish(outcome).await
    }

    /// Replace header and lines; balances move by the per-key difference.
    #[instrument(skip(self, ctx, draft), fields(command = "receipt.update", receipt_id = %id), err)]
    pub async fn update(
        &self,
        ctx: &CommandContext,
        id: ReceiptId,
        draft: ReceiptDraft,
    ) -> Result<(), CommandError> {
        let mut uow = self.coordinator.begin(ctx, "receipt.update").await?;
        let outcome = ctx.guard(update_receipt(uow.tx(), ctx, id, draft)).await;
        uow.finish(outcome).await
    }

    /// Remove the receipt and take its stock back out of the ledger.
    ///
    /// Fails with `InsufficientBalance` when the received stock has already
    /// been shipped.
    #[instrument(skip(self, ctx), fields(command = "receipt.delete", receipt_id = %id), err)]
    pub async fn delete(&self, ctx: &CommandContext, id: ReceiptId) -> Result<(), CommandError> {
        let mut uow = self.coordinator.begin(ctx, "receipt.delete").await?;
        let outcome = ctx.guard(delete_receipt(uow.tx(), ctx, id)).await;
        uow.finish(outcome).await
    }
}

async fn create_receipt<T: StoreTransaction>(
    tx: &mut T,
    ctx: &CommandContext,
    draft: ReceiptDraft,
) -> Result<ReceiptId, CommandError> {
    let id = ReceiptId::new();
    let receipt = ReceiptDocument::empty(id);
    let events = receipt.handle(&ReceiptCommand::CreateReceipt(CreateReceipt {
        receipt_id: id,
        number: draft.number,
        date: draft.date,
        lines: draft.lines,
        occurred_at: Utc::now(),
    }))?;
    let receipt = evolve(receipt, &events);

    ensure_number_free(tx, receipt.number(), None).await?;
    validator::require_line_references(tx, receipt.lines()).await?;
    apply_effects(tx, ctx, &events).await?;
    tx.insert_receipt(&receipt).await?;
    Ok(id)
}

async fn update_receipt<T: StoreTransaction>(
    tx: &mut T,
    ctx: &CommandContext,
    id: ReceiptId,
    draft: ReceiptDraft,
) -> Result<(), CommandError> {
    let current = load(tx, id).await?;
    let events = current.handle(&ReceiptCommand::UpdateReceipt(UpdateReceipt {
        receipt_id: id,
        number: draft.number,
        date: draft.date,
        lines: draft.lines,
        occurred_at: Utc::now(),
    }))?;
    let previous_lines = current.lines().to_vec();
    let receipt = evolve(current, &events);

    ensure_number_free(tx, receipt.number(), Some(id)).await?;
    validator::require_new_line_references(tx, &previous_lines, receipt.lines()).await?;
    apply_effects(tx, ctx, &events).await?;
    tx.update_receipt(&receipt).await?;
    Ok(())
}

async fn delete_receipt<T: StoreTransaction>(
    tx: &mut T,
    ctx: &CommandContext,
    id: ReceiptId,
) -> Result<(), CommandError> {
    let current = load(tx, id).await?;
    let events = current.handle(&ReceiptCommand::DeleteReceipt(DeleteReceipt {
        receipt_id: id,
        occurred_at: Utc::now(),
    }))?;

    apply_effects(tx, ctx, &events).await?;
    tx.delete_receipt(id).await?;
    Ok(())
}

async fn load<T: StoreTransaction>(
    tx: &mut T,
    id: ReceiptId,
) -> Result<ReceiptDocument, CommandError> {
    tx.load_receipt_for_update(id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("receipt {id}")).into())
}

async fn ensure_number_free<T: StoreTransaction>(
    tx: &mut T,
    number: &str,
    exclude: Option<ReceiptId>,
) -> Result<(), CommandError> {
    if tx.receipt_number_exists(number, exclude).await? {
        return Err(DomainError::duplicate_number(format!("receipt {number}")).into());
    }
    Ok(())
}

async fn apply_effects<T: StoreTransaction>(
    tx: &mut T,
    ctx: &CommandContext,
    events: &[ReceiptEvent],
) -> Result<(), CommandError> {
    let mut ledger = BalanceLedger::new(tx, ctx);
    for event in events {
        debug!(event = event.event_type(), "applying ledger effect");
        ledger.apply_effect(&event.ledger_effect()).await?;
    }
    Ok(())
}
