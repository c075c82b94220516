use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use stockroom_core::{ReceiptId, ShipmentId};
use stockroom_inventory::{Balance, BalanceKey};
use stockroom_receipts::ReceiptDocument;
use stockroom_reference::{Client, ReferenceEntity, Resource, UnitOfMeasure};
use stockroom_shipments::ShipmentDocument;

use super::query::{BalanceFilter, DocumentFilter};

/// Store operation error.
///
/// These are **infrastructure errors** as opposed to domain errors. The
/// application layer translates the unique violations it knows about (document
/// numbers, reference names) back into domain errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    #[error("foreign key violated: {0}")]
    ForeignKeyViolation(String),

    /// The backing store cannot be reached or the transaction was aborted.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded into a valid domain value.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("lock poisoned")]
    Poisoned,
}

/// Balance Store: locked and unlocked access to balance rows.
#[async_trait]
pub trait BalanceRepository: Send {
    /// Read and lock every key for the rest of the transaction, in one round trip.
    ///
    /// Keys must be sorted (the `DeltaBatch` order) so that overlapping
    /// batches always lock in the same order. Keys without a row come back as
    /// zero balances.
    async fn locked_read(
        &mut self,
        keys: &[BalanceKey],
    ) -> Result<BTreeMap<BalanceKey, Balance>, StoreError>;

    /// Unlocked snapshot, used by advisory availability checks.
    async fn read_balances(
        &mut self,
        keys: &[BalanceKey],
    ) -> Result<BTreeMap<BalanceKey, Balance>, StoreError>;

    /// Write rows previously obtained through `locked_read`.
    async fn upsert_balances(&mut self, balances: &[Balance]) -> Result<(), StoreError>;

    async fn list_balances(&mut self, filter: &BalanceFilter) -> Result<Vec<Balance>, StoreError>;
}

#[async_trait]
pub trait ReceiptRepository: Send {
    /// True if another receipt (not `exclude`) already uses `number`.
    async fn receipt_number_exists(
        &mut self,
        number: &str,
        exclude: Option<ReceiptId>,
    ) -> Result<bool, StoreError>;

    /// Load a receipt with its lines and lock it until the transaction ends.
    async fn load_receipt_for_update(
        &mut self,
        id: ReceiptId,
    ) -> Result<Option<ReceiptDocument>, StoreError>;

    async fn get_receipt(&mut self, id: ReceiptId) -> Result<Option<ReceiptDocument>, StoreError>;

    async fn insert_receipt(&mut self, receipt: &ReceiptDocument) -> Result<(), StoreError>;

    /// Replace the header and the full line set.
    async fn update_receipt(&mut self, receipt: &ReceiptDocument) -> Result<(), StoreError>;

    async fn delete_receipt(&mut self, id: ReceiptId) -> Result<(), StoreError>;

    async fn list_receipts(
        &mut self,
        filter: &DocumentFilter,
    ) -> Result<Vec<ReceiptDocument>, StoreError>;
}

#[async_trait]
pub trait ShipmentRepository: Send {
    async fn shipment_number_exists(
        &mut self,
        number: &str,
        exclude: Option<ShipmentId>,
    ) -> Result<bool, StoreError>;

    /// Load a shipment with its lines and lock it until the transaction ends.
    ///
    /// Two commands on the same shipment (e.g. concurrent signs) serialize here.
    async fn load_shipment_for_update(
        &mut self,
        id: ShipmentId,
    ) -> Result<Option<ShipmentDocument>, StoreError>;

    async fn get_shipment(&mut self, id: ShipmentId)
    -> Result<Option<ShipmentDocument>, StoreError>;

    async fn insert_shipment(&mut self, shipment: &ShipmentDocument) -> Result<(), StoreError>;

    async fn update_shipment(&mut self, shipment: &ShipmentDocument) -> Result<(), StoreError>;

    async fn delete_shipment(&mut self, id: ShipmentId) -> Result<(), StoreError>;

    async fn list_shipments(
        &mut self,
        filter: &DocumentFilter,
    ) -> Result<Vec<ShipmentDocument>, StoreError>;
}

/// Storage for one kind of reference entity.
///
/// Implemented once per entity type, so call sites name the entity:
/// `ReferenceRepository::<Resource>::find(&mut *tx, id)`.
#[async_trait]
pub trait ReferenceRepository<E: ReferenceEntity>: Send {
    async fn find(&mut self, id: E::Id) -> Result<Option<E>, StoreError>;

    /// Find and share-lock the row until the transaction ends.
    ///
    /// Documents take this lock on every entity they reference, so the
    /// entity cannot be deleted, archived or renamed until they commit.
    async fn find_for_share(&mut self, id: E::Id) -> Result<Option<E>, StoreError>;

    /// Find and exclusively lock the row until the transaction ends.
    ///
    /// Waits for every transaction holding a share lock on it.
    async fn find_for_update(&mut self, id: E::Id) -> Result<Option<E>, StoreError>;

    async fn find_by_name(&mut self, name: &str) -> Result<Option<E>, StoreError>;

    async fn insert(&mut self, entity: &E) -> Result<(), StoreError>;

    async fn update(&mut self, entity: &E) -> Result<(), StoreError>;

    async fn delete(&mut self, id: E::Id) -> Result<(), StoreError>;

    async fn list(&mut self, include_archived: bool) -> Result<Vec<E>, StoreError>;

    /// True while any balance, document line or document points at the entity.
    async fn is_referenced(&mut self, id: E::Id) -> Result<bool, StoreError>;
}

/// One open unit of work against the store.
///
/// Dropping a transaction without committing discards every staged write and
/// releases every lock it holds.
#[async_trait]
pub trait StoreTransaction:
    BalanceRepository
    + ReceiptRepository
    + ShipmentRepository
    + ReferenceRepository<Resource>
    + ReferenceRepository<UnitOfMeasure>
    + ReferenceRepository<Client>
    + Send
    + Sized
{
    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

/// Factory for transactions.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: StoreTransaction + 'static;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}
