//! Receipt documents (inbound stock).
//!
//! Business rules for receipts, implemented purely as deterministic domain
//! logic (no IO, no storage). Every receipt event states its ledger effect:
//! creation increases balances, an edit adjusts them by the per-key
//! difference, deletion decreases them by the full line quantities.

pub mod receipt;

pub use receipt::{
    CreateReceipt, DeleteReceipt, ReceiptCommand, ReceiptCreated, ReceiptDeleted, ReceiptDocument,
    ReceiptEvent, ReceiptUpdated, UpdateReceipt,
};
