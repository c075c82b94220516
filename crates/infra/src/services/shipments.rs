use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use stockroom_core::{Aggregate, ClientId, DomainError, Event, ShipmentId};
use stockroom_inventory::{DocumentLine, LedgerEffect};
use stockroom_reference::Client;
use stockroom_shipments::{
    CreateShipment, DeleteShipment, RevokeShipment, ShipmentCommand, ShipmentDocument,
    ShipmentEvent, SignShipment, UpdateShipment,
};

use super::evolve;
use crate::context::CommandContext;
use crate::coordinator::TransactionCoordinator;
use crate::error::CommandError;
use crate::ledger::{BalanceLedger, ShortfallReport};
use crate::store::{Store, StoreTransaction};
use crate::validator;

/// Header and lines of a shipment as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentDraft {
    pub number: String,
    pub client_id: ClientId,
    pub date: NaiveDate,
    pub lines: Vec<DocumentLine>,
}

/// Result of a create or update.
///
/// `warnings` lists the lines current stock could not cover. It is only
/// filled for drafts; a signed shipment either had enough stock or failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentOutcome {
    pub id: ShipmentId,
    pub signed: bool,
    pub warnings: Vec<ShortfallReport>,
}

pub struct ShipmentService<S> {
    coordinator: TransactionCoordinator<S>,
}

impl<S> Clone for ShipmentService<S> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: Store> ShipmentService<S> {
    pub fn new(coordinator: TransactionCoordinator<S>) -> Self {
        Self { coordinator }
    }

    /// Create a draft, or create and sign in one step when `sign` is set.
    #[instrument(skip(self, ctx, draft), fields(command = "shipment.create", number = %draft.number), err)]
    pub async fn create(
        &self,
        ctx: &CommandContext,
        draft: ShipmentDraft,
        sign: bool,
    ) -> Result<ShipmentOutcome, CommandError> {
        let mut uow = self.coordinator.begin(ctx, "shipment.create").await?;
        let outcome = ctx.guard(create_shipment(uow.tx(), ctx, draft, sign)).await;
        uow.finish(outcome).await
    }

    /// Edit a draft, optionally signing it. Signed shipments are rejected.
    #[instrument(skip(self, ctx, draft), fields(command = "shipment.update", shipment_id = %id), err)]
    pub async fn update(
        &self,
        ctx: &CommandContext,
        id: ShipmentId,
        draft: ShipmentDraft,
        sign: bool,
    ) -> Result<ShipmentOutcome, CommandError> {
        let mut uow = self.coordinator.begin(ctx, "shipment.update").await?;
        let outcome = ctx.guard(update_shipment(uow.tx(), ctx, id, draft, sign)).await;
        uow.finish(outcome).await
    }

    /// Sign a draft as it stands.
    #[instrument(skip(self, ctx), fields(command = "shipment.sign", shipment_id = %id), err)]
    pub async fn sign(&self, ctx: &CommandContext, id: ShipmentId) -> Result<(), CommandError> {
        self.transition(ctx, "shipment.sign", id, |shipment_id| {
            ShipmentCommand::SignShipment(SignShipment {
                shipment_id,
                occurred_at: Utc::now(),
            })
        })
        .await
    }

    /// Return a signed shipment's stock and make it editable again.
    #[instrument(skip(self, ctx), fields(command = "shipment.revoke", shipment_id = %id), err)]
    pub async fn revoke(&self, ctx: &CommandContext, id: ShipmentId) -> Result<(), CommandError> {
        self.transition(ctx, "shipment.revoke", id, |shipment_id| {
            ShipmentCommand::RevokeShipment(RevokeShipment {
                shipment_id,
                occurred_at: Utc::now(),
            })
        })
        .await
    }

    /// Delete a draft. Signed shipments must be revoked first.
    #[instrument(skip(self, ctx), fields(command = "shipment.delete", shipment_id = %id), err)]
    pub async fn delete(&self, ctx: &CommandContext, id: ShipmentId) -> Result<(), CommandError> {
        let mut uow = self.coordinator.begin(ctx, "shipment.delete").await?;
        let outcome = ctx.guard(delete_shipment(uow.tx(), ctx, id)).await;
        uow.finish(outcome).await
    }

    async fn transition(
        &self,
        ctx: &CommandContext,
        command: &'static str,
        id: ShipmentId,
        decide: impl FnOnce(ShipmentId) -> ShipmentCommand,
    ) -> Result<(), CommandError> {
        let mut uow = self.coordinator.begin(ctx, command).await?;
        let outcome = ctx
            .guard(transition_shipment(uow.tx(), ctx, id, decide(id)))
            .await;
        uow.finish(outcome).await
    }
}

async fn create_shipment<T: StoreTransaction>(
    tx: &mut T,
    ctx: &CommandContext,
    draft: ShipmentDraft,
    sign: bool,
) -> Result<ShipmentOutcome, CommandError> {
    let id = ShipmentId::new();
    let shipment = ShipmentDocument::empty(id);
    let events = shipment.handle(&ShipmentCommand::CreateShipment(CreateShipment {
        shipment_id: id,
        number: draft.number,
        client_id: draft.client_id,
        date: draft.date,
        lines: draft.lines,
        sign,
        occurred_at: Utc::now(),
    }))?;
    let shipment = evolve(shipment, &events);

    ensure_number_free(tx, shipment.number(), None).await?;
    validator::require_active::<Client, T>(tx, shipment.client_id()).await?;
    validator::require_line_references(tx, shipment.lines()).await?;
    let warnings = apply_effects(tx, ctx, &events).await?;
    tx.insert_shipment(&shipment).await?;

    Ok(outcome(&shipment, warnings))
}

async fn update_shipment<T: StoreTransaction>(
    tx: &mut T,
    ctx: &CommandContext,
    id: ShipmentId,
    draft: ShipmentDraft,
    sign: bool,
) -> Result<ShipmentOutcome, CommandError> {
    let current = load(tx, id).await?;
    let events = current.handle(&ShipmentCommand::UpdateShipment(UpdateShipment {
        shipment_id: id,
        number: draft.number,
        client_id: draft.client_id,
        date: draft.date,
        lines: draft.lines,
        sign,
        occurred_at: Utc::now(),
    }))?;
    let previous_client = current.client_id();
    let previous_lines = current.lines().to_vec();
    let shipment = evolve(current, &events);

    ensure_number_free(tx, shipment.number(), Some(id)).await?;
    if shipment.client_id() != previous_client {
        validator::require_active::<Client, T>(tx, shipment.client_id()).await?;
    }
    validator::require_new_line_references(tx, &previous_lines, shipment.lines()).await?;
    let warnings = apply_effects(tx, ctx, &events).await?;
    tx.update_shipment(&shipment).await?;

    Ok(outcome(&shipment, warnings))
}

/// Sign or revoke: decide on the locked document, move stock, save the state.
async fn transition_shipment<T: StoreTransaction>(
    tx: &mut T,
    ctx: &CommandContext,
    id: ShipmentId,
    command: ShipmentCommand,
) -> Result<(), CommandError> {
    let current = load(tx, id).await?;
    let events = current.handle(&command)?;
    let shipment = evolve(current, &events);

    apply_effects(tx, ctx, &events).await?;
    tx.update_shipment(&shipment).await?;
    info!(signed = shipment.is_signed(), "shipment state changed");
    Ok(())
}

async fn delete_shipment<T: StoreTransaction>(
    tx: &mut T,
    ctx: &CommandContext,
    id: ShipmentId,
) -> Result<(), CommandError> {
    let current = load(tx, id).await?;
    let events = current.handle(&ShipmentCommand::DeleteShipment(DeleteShipment {
        shipment_id: id,
        occurred_at: Utc::now(),
    }))?;

    apply_effects(tx, ctx, &events).await?;
    tx.delete_shipment(id).await?;
    Ok(())
}

async fn load<T: StoreTransaction>(
    tx: &mut T,
    id: ShipmentId,
) -> Result<ShipmentDocument, CommandError> {
    tx.load_shipment_for_update(id)
        .await?
        .ok_or_else(|| DomainError::not_found(format!("shipment {id}")).into())
}

async fn ensure_number_free<T: StoreTransaction>(
    tx: &mut T,
    number: &str,
    exclude: Option<ShipmentId>,
) -> Result<(), CommandError> {
    if tx.shipment_number_exists(number, exclude).await? {
        return Err(DomainError::duplicate_number(format!("shipment {number}")).into());
    }
    Ok(())
}

/// Apply every event's ledger effect and collect draft warnings.
///
/// The advisory check on the content event is skipped when a sign follows
/// in the same command; the binding decrease covers it.
async fn apply_effects<T: StoreTransaction>(
    tx: &mut T,
    ctx: &CommandContext,
    events: &[ShipmentEvent],
) -> Result<Vec<ShortfallReport>, CommandError> {
    let signing = events.iter().any(ShipmentEvent::is_signed);
    let mut ledger = BalanceLedger::new(tx, ctx);
    let mut warnings = Vec::new();

    for event in events {
        debug!(event = event.event_type(), "applying ledger effect");
        match event.ledger_effect() {
            LedgerEffect::CheckAvailability(_) if signing => {}
            LedgerEffect::CheckAvailability(amounts) => {
                warnings.extend(ledger.check_availability(&amounts).await?);
            }
            effect => ledger.apply_effect(&effect).await?,
        }
    }
    Ok(warnings)
}

fn outcome(shipment: &ShipmentDocument, warnings: Vec<ShortfallReport>) -> ShipmentOutcome {
    ShipmentOutcome {
        id: shipment.id_typed(),
        signed: shipment.is_signed(),
        warnings,
    }
}
