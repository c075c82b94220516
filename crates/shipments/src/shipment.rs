use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{
    Aggregate, AggregateRoot, ClientId, DomainError, Event, ShipmentId, normalize_number,
};
use stockroom_inventory::{DeltaBatch, DocumentLine, LedgerEffect, ensure_unique_line_ids};

/// Shipment lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentState {
    Draft,
    Signed,
}

/// Aggregate root: ShipmentDocument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentDocument {
    id: ShipmentId,
    number: String,
    client_id: ClientId,
    date: NaiveDate,
    state: ShipmentState,
    lines: Vec<DocumentLine>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl ShipmentDocument {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: ShipmentId) -> Self {
        Self {
            id,
            number: String::new(),
            client_id: ClientId::default(),
            date: NaiveDate::MIN,
            state: ShipmentState::Draft,
            lines: Vec::new(),
            version: 0,
            created: false,
            deleted: false,
        }
    }

    /// Rebuild a persisted shipment.
    pub fn restore(
        id: ShipmentId,
        number: String,
        client_id: ClientId,
        date: NaiveDate,
        is_signed: bool,
        lines: Vec<DocumentLine>,
        version: u64,
    ) -> Self {
        Self {
            id,
            number,
            client_id,
            date,
            state: if is_signed {
                ShipmentState::Signed
            } else {
                ShipmentState::Draft
            },
            lines,
            version,
            created: true,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> ShipmentId {
        self.id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn state(&self) -> ShipmentState {
        self.state
    }

    pub fn is_signed(&self) -> bool {
        self.state == ShipmentState::Signed
    }

    pub fn lines(&self) -> &[DocumentLine] {
        &self.lines
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

impl AggregateRoot for ShipmentDocument {
    type Id = ShipmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateShipment. With `sign` set the document is created signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateShipment {
    pub shipment_id: ShipmentId,
    pub number: String,
    pub client_id: ClientId,
    pub date: NaiveDate,
    pub lines: Vec<DocumentLine>,
    pub sign: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateShipment (full line-set replacement, drafts only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateShipment {
    pub shipment_id: ShipmentId,
    pub number: String,
    pub client_id: ClientId,
    pub date: NaiveDate,
    pub lines: Vec<DocumentLine>,
    pub sign: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SignShipment (sign a draft as it stands).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignShipment {
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RevokeShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeShipment {
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteShipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteShipment {
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentCommand {
    CreateShipment(CreateShipment),
    UpdateShipment(UpdateShipment),
    SignShipment(SignShipment),
    RevokeShipment(RevokeShipment),
    DeleteShipment(DeleteShipment),
}

/// Event: ShipmentCreated (always as a draft).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentCreated {
    pub shipment_id: ShipmentId,
    pub number: String,
    pub client_id: ClientId,
    pub date: NaiveDate,
    pub lines: Vec<DocumentLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentUpdated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentUpdated {
    pub shipment_id: ShipmentId,
    pub number: String,
    pub client_id: ClientId,
    pub date: NaiveDate,
    pub lines: Vec<DocumentLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentSigned. `lines` is the line set that leaves the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentSigned {
    pub shipment_id: ShipmentId,
    pub lines: Vec<DocumentLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentRevoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentRevoked {
    pub shipment_id: ShipmentId,
    pub lines: Vec<DocumentLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentDeleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentDeleted {
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShipmentEvent {
    ShipmentCreated(ShipmentCreated),
    ShipmentUpdated(ShipmentUpdated),
    ShipmentSigned(ShipmentSigned),
    ShipmentRevoked(ShipmentRevoked),
    ShipmentDeleted(ShipmentDeleted),
}

impl ShipmentEvent {
    /// Drafts only get an advisory availability check; signing and revoking
    /// are the events that move stock.
    pub fn ledger_effect(&self) -> LedgerEffect {
        match self {
            ShipmentEvent::ShipmentCreated(e) => {
                LedgerEffect::CheckAvailability(DeltaBatch::from_document_lines(&e.lines))
            }
            ShipmentEvent::ShipmentUpdated(e) => {
                LedgerEffect::CheckAvailability(DeltaBatch::from_document_lines(&e.lines))
            }
            ShipmentEvent::ShipmentSigned(e) => {
                LedgerEffect::Decrease(DeltaBatch::from_document_lines(&e.lines))
            }
            ShipmentEvent::ShipmentRevoked(e) => {
                LedgerEffect::Increase(DeltaBatch::from_document_lines(&e.lines))
            }
            ShipmentEvent::ShipmentDeleted(_) => LedgerEffect::None,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, ShipmentEvent::ShipmentSigned(_))
    }
}

impl Event for ShipmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShipmentEvent::ShipmentCreated(_) => "shipments.document.created",
            ShipmentEvent::ShipmentUpdated(_) => "shipments.document.updated",
            ShipmentEvent::ShipmentSigned(_) => "shipments.document.signed",
            ShipmentEvent::ShipmentRevoked(_) => "shipments.document.revoked",
            ShipmentEvent::ShipmentDeleted(_) => "shipments.document.deleted",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ShipmentEvent::ShipmentCreated(e) => e.occurred_at,
            ShipmentEvent::ShipmentUpdated(e) => e.occurred_at,
            ShipmentEvent::ShipmentSigned(e) => e.occurred_at,
            ShipmentEvent::ShipmentRevoked(e) => e.occurred_at,
            ShipmentEvent::ShipmentDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ShipmentDocument {
    type Command = ShipmentCommand;
    type Event = ShipmentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ShipmentEvent::ShipmentCreated(e) => {
                self.id = e.shipment_id;
                self.number = e.number.clone();
                self.client_id = e.client_id;
                self.date = e.date;
                self.lines = e.lines.clone();
                self.state = ShipmentState::Draft;
                self.created = true;
            }
            ShipmentEvent::ShipmentUpdated(e) => {
                self.number = e.number.clone();
                self.client_id = e.client_id;
                self.date = e.date;
                self.lines = e.lines.clone();
            }
            ShipmentEvent::ShipmentSigned(_) => {
                self.state = ShipmentState::Signed;
            }
            ShipmentEvent::ShipmentRevoked(_) => {
                self.state = ShipmentState::Draft;
            }
            ShipmentEvent::ShipmentDeleted(_) => {
                self.deleted = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ShipmentCommand::CreateShipment(cmd) => self.handle_create(cmd),
            ShipmentCommand::UpdateShipment(cmd) => self.handle_update(cmd),
            ShipmentCommand::SignShipment(cmd) => self.handle_sign(cmd),
            ShipmentCommand::RevokeShipment(cmd) => self.handle_revoke(cmd),
            ShipmentCommand::DeleteShipment(cmd) => self.handle_delete(cmd),
        }
    }
}

fn ensure_signable(lines: &[DocumentLine]) -> Result<(), DomainError> {
    if lines.is_empty() {
        return Err(DomainError::invalid_transition(
            "cannot sign a shipment without lines",
        ));
    }
    Ok(())
}

impl ShipmentDocument {
    fn ensure_live(&self, shipment_id: ShipmentId) -> Result<(), DomainError> {
        if !self.created || self.deleted {
            return Err(DomainError::not_found(format!("shipment {shipment_id}")));
        }
        if self.id != shipment_id {
            return Err(DomainError::invariant("shipment_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("shipment already exists"));
        }
        let number = normalize_number(&cmd.number)?;
        ensure_unique_line_ids(&cmd.lines)?;
        if cmd.sign {
            ensure_signable(&cmd.lines)?;
        }

        let mut events = vec![ShipmentEvent::ShipmentCreated(ShipmentCreated {
            shipment_id: cmd.shipment_id,
            number,
            client_id: cmd.client_id,
            date: cmd.date,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })];
        if cmd.sign {
            events.push(ShipmentEvent::ShipmentSigned(ShipmentSigned {
                shipment_id: cmd.shipment_id,
                lines: cmd.lines.clone(),
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    fn handle_update(&self, cmd: &UpdateShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_live(cmd.shipment_id)?;
        if self.is_signed() {
            return Err(DomainError::invalid_transition(
                "signed document cannot be edited; revoke first",
            ));
        }
        let number = normalize_number(&cmd.number)?;
        ensure_unique_line_ids(&cmd.lines)?;
        if cmd.sign {
            ensure_signable(&cmd.lines)?;
        }

        let mut events = vec![ShipmentEvent::ShipmentUpdated(ShipmentUpdated {
            shipment_id: cmd.shipment_id,
            number,
            client_id: cmd.client_id,
            date: cmd.date,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })];
        if cmd.sign {
            events.push(ShipmentEvent::ShipmentSigned(ShipmentSigned {
                shipment_id: cmd.shipment_id,
                lines: cmd.lines.clone(),
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    fn handle_sign(&self, cmd: &SignShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_live(cmd.shipment_id)?;
        if self.is_signed() {
            return Err(DomainError::invalid_transition("document already signed"));
        }
        ensure_signable(&self.lines)?;

        Ok(vec![ShipmentEvent::ShipmentSigned(ShipmentSigned {
            shipment_id: cmd.shipment_id,
            lines: self.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revoke(&self, cmd: &RevokeShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_live(cmd.shipment_id)?;
        if !self.is_signed() {
            return Err(DomainError::invalid_transition("document not signed"));
        }

        Ok(vec![ShipmentEvent::ShipmentRevoked(ShipmentRevoked {
            shipment_id: cmd.shipment_id,
            lines: self.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteShipment) -> Result<Vec<ShipmentEvent>, DomainError> {
        self.ensure_live(cmd.shipment_id)?;
        if self.is_signed() {
            return Err(DomainError::invalid_transition(
                "signed document cannot be deleted; revoke first",
            ));
        }

        Ok(vec![ShipmentEvent::ShipmentDeleted(ShipmentDeleted {
            shipment_id: cmd.shipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
