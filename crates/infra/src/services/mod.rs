//! Application services: one method per warehouse command or query.
//!
//! Every command follows the same shape:
//!
//! ```text
//! begin unit of work
//!   load (and lock) the document      -> repository
//!   decide                            -> aggregate.handle(command) -> events
//!   check references and numbers      -> validator, repository
//!   apply each event's LedgerEffect   -> BalanceLedger
//!   persist the evolved document      -> repository
//! finish (commit, or roll back on any error)
//! ```

pub mod queries;
pub mod receipts;
pub mod reference;
pub mod shipments;

use std::sync::Arc;

use stockroom_core::Aggregate;
use stockroom_reference::{Client, Resource, UnitOfMeasure};

use crate::coordinator::TransactionCoordinator;
use crate::store::Store;

pub use queries::QueryService;
pub use receipts::{ReceiptDraft, ReceiptService};
pub use reference::ReferenceService;
pub use shipments::{ShipmentDraft, ShipmentOutcome, ShipmentService};

/// Fold decided events into the document they were decided on.
pub(crate) fn evolve<A: Aggregate>(mut aggregate: A, events: &[A::Event]) -> A {
    for event in events {
        aggregate.apply(event);
    }
    aggregate
}

/// Every service over one shared store.
pub struct Warehouse<S> {
    pub receipts: ReceiptService<S>,
    pub shipments: ShipmentService<S>,
    pub resources: ReferenceService<S, Resource>,
    pub units: ReferenceService<S, UnitOfMeasure>,
    pub clients: ReferenceService<S, Client>,
    pub queries: QueryService<S>,
}

impl<S: Store> Warehouse<S> {
    pub fn new(store: Arc<S>) -> Self {
        let coordinator = TransactionCoordinator::new(store);
        Self {
            receipts: ReceiptService::new(coordinator.clone()),
            shipments: ShipmentService::new(coordinator.clone()),
            resources: ReferenceService::new(coordinator.clone()),
            units: ReferenceService::new(coordinator.clone()),
            clients: ReferenceService::new(coordinator.clone()),
            queries: QueryService::new(coordinator),
        }
    }
}

impl<S> Clone for Warehouse<S> {
    fn clone(&self) -> Self {
        Self {
            receipts: self.receipts.clone(),
            shipments: self.shipments.clone(),
            resources: self.resources.clone(),
            units: self.units.clone(),
            clients: self.clients.clone(),
            queries: self.queries.clone(),
        }
    }
}
