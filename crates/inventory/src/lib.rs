//! Inventory balance domain.
//!
//! Balances per (resource, unit) pair, signed deltas, and the pure
//! validate-then-apply planning the ledger runs over a locked snapshot
//! (no IO, no storage).

pub mod balance;
pub mod batch;
pub mod effect;
pub mod line;

pub use balance::{Balance, BalanceDelta, BalanceKey};
pub use batch::{DeltaBatch, Shortfall};
pub use effect::LedgerEffect;
pub use line::{DocumentLine, ensure_unique_line_ids, keyed_quantities};
