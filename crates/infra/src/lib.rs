//! Infrastructure layer: stores, the balance ledger, command orchestration and config.
//!
//! Domain crates decide; this crate carries their decisions out. Each
//! command runs in one [`UnitOfWork`] opened by the [`TransactionCoordinator`]:
//! the document aggregate handles the command, the [`BalanceLedger`] applies
//! the resulting ledger effects under row locks, the document is persisted,
//! and everything commits or rolls back together.

pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod services;
pub mod store;
pub mod validator;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, StoreConfig};
pub use context::{CancelHandle, CommandContext};
pub use coordinator::{TransactionCoordinator, UnitOfWork};
pub use error::CommandError;
pub use ledger::{BalanceLedger, ShortfallReport};
pub use services::{
    QueryService, ReceiptDraft, ReceiptService, ReferenceService, ShipmentDraft, ShipmentOutcome,
    ShipmentService, Warehouse,
};
pub use store::{InMemoryStore, PostgresStore, Store, StoreError, StoreTransaction};
