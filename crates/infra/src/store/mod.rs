//! Persistence boundary.
//!
//! One [`StoreTransaction`] exposes the Balance Store, the document
//! repositories and the reference repositories over a single transaction, so
//! a command's document write and balance write commit or roll back together.
//!
//! Two implementations:
//! - [`InMemoryStore`]: tests and local development.
//! - [`PostgresStore`]: production (sqlx).

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::{InMemoryStore, InMemoryTransaction};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use query::{BalanceFilter, DocumentFilter};
pub use r#trait::{
    BalanceRepository, ReceiptRepository, ReferenceRepository, ShipmentRepository, Store,
    StoreError, StoreTransaction,
};
