use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{
    Aggregate, AggregateRoot, DomainError, Event, ReceiptId, normalize_number,
};
use stockroom_inventory::{
    DeltaBatch, DocumentLine, LedgerEffect, ensure_unique_line_ids, keyed_quantities,
};

/// Aggregate root: ReceiptDocument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptDocument {
    id: ReceiptId,
    number: String,
    date: NaiveDate,
    lines: Vec<DocumentLine>,
    version: u64,
    created: bool,
    deleted: bool,
}

impl ReceiptDocument {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: ReceiptId) -> Self {
        Self {
            id,
            number: String::new(),
            date: NaiveDate::MIN,
            lines: Vec::new(),
            version: 0,
            created: false,
            deleted: false,
        }
    }

    /// Rebuild a persisted receipt.
    pub fn restore(
        id: ReceiptId,
        number: String,
        date: NaiveDate,
        lines: Vec<DocumentLine>,
        version: u64,
    ) -> Self {
        Self {
            id,
            number,
            date,
            lines,
            version,
            created: true,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> ReceiptId {
        self.id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn lines(&self) -> &[DocumentLine] {
        &self.lines
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

impl AggregateRoot for ReceiptDocument {
    type Id = ReceiptId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateReceipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReceipt {
    pub receipt_id: ReceiptId,
    pub number: String,
    pub date: NaiveDate,
    pub lines: Vec<DocumentLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateReceipt (full line-set replacement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReceipt {
    pub receipt_id: ReceiptId,
    pub number: String,
    pub date: NaiveDate,
    pub lines: Vec<DocumentLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteReceipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReceipt {
    pub receipt_id: ReceiptId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptCommand {
    CreateReceipt(CreateReceipt),
    UpdateReceipt(UpdateReceipt),
    DeleteReceipt(DeleteReceipt),
}

/// Event: ReceiptCreated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptCreated {
    pub receipt_id: ReceiptId,
    pub number: String,
    pub date: NaiveDate,
    pub lines: Vec<DocumentLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptUpdated.
///
/// Carries both line sets so the ledger adjustment can be derived from the
/// event alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptUpdated {
    pub receipt_id: ReceiptId,
    pub number: String,
    pub date: NaiveDate,
    pub previous_lines: Vec<DocumentLine>,
    pub lines: Vec<DocumentLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReceiptDeleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptDeleted {
    pub receipt_id: ReceiptId,
    pub lines: Vec<DocumentLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptEvent {
    ReceiptCreated(ReceiptCreated),
    ReceiptUpdated(ReceiptUpdated),
    ReceiptDeleted(ReceiptDeleted),
}

impl ReceiptEvent {
    pub fn ledger_effect(&self) -> LedgerEffect {
        match self {
            ReceiptEvent::ReceiptCreated(e) => {
                LedgerEffect::Increase(DeltaBatch::from_document_lines(&e.lines))
            }
            ReceiptEvent::ReceiptUpdated(e) => LedgerEffect::Adjust(DeltaBatch::between(
                keyed_quantities(&e.previous_lines),
                keyed_quantities(&e.lines),
            )),
            ReceiptEvent::ReceiptDeleted(e) => {
                LedgerEffect::Decrease(DeltaBatch::from_document_lines(&e.lines))
            }
        }
    }
}

impl Event for ReceiptEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReceiptEvent::ReceiptCreated(_) => "receipts.document.created",
            ReceiptEvent::ReceiptUpdated(_) => "receipts.document.updated",
            ReceiptEvent::ReceiptDeleted(_) => "receipts.document.deleted",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReceiptEvent::ReceiptCreated(e) => e.occurred_at,
            ReceiptEvent::ReceiptUpdated(e) => e.occurred_at,
            ReceiptEvent::ReceiptDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ReceiptDocument {
    type Command = ReceiptCommand;
    type Event = ReceiptEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReceiptEvent::ReceiptCreated(e) => {
                self.id = e.receipt_id;
                self.number = e.number.clone();
                self.date = e.date;
                self.lines = e.lines.clone();
                self.created = true;
            }
            ReceiptEvent::ReceiptUpdated(e) => {
                self.number = e.number.clone();
                self.date = e.date;
                self.lines = e.lines.clone();
            }
            ReceiptEvent::ReceiptDeleted(_) => {
                self.deleted = true;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReceiptCommand::CreateReceipt(cmd) => self.handle_create(cmd),
            ReceiptCommand::UpdateReceipt(cmd) => self.handle_update(cmd),
            ReceiptCommand::DeleteReceipt(cmd) => self.handle_delete(cmd),
        }
    }
}

impl ReceiptDocument {
    fn ensure_live(&self, receipt_id: ReceiptId) -> Result<(), DomainError> {
        if !self.created || self.deleted {
            return Err(DomainError::not_found(format!("receipt {receipt_id}")));
        }
        if self.id != receipt_id {
            return Err(DomainError::invariant("receipt_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("receipt already exists"));
        }
        let number = normalize_number(&cmd.number)?;
        ensure_unique_line_ids(&cmd.lines)?;

        Ok(vec![ReceiptEvent::ReceiptCreated(ReceiptCreated {
            receipt_id: cmd.receipt_id,
            number,
            date: cmd.date,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_live(cmd.receipt_id)?;
        let number = normalize_number(&cmd.number)?;
        ensure_unique_line_ids(&cmd.lines)?;

        Ok(vec![ReceiptEvent::ReceiptUpdated(ReceiptUpdated {
            receipt_id: cmd.receipt_id,
            number,
            date: cmd.date,
            previous_lines: self.lines.clone(),
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteReceipt) -> Result<Vec<ReceiptEvent>, DomainError> {
        self.ensure_live(cmd.receipt_id)?;

        Ok(vec![ReceiptEvent::ReceiptDeleted(ReceiptDeleted {
            receipt_id: cmd.receipt_id,
            lines: self.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
