use chrono::{DateTime, Utc};

/// Domain event emitted by an aggregate decision.
///
/// Events are not published anywhere; they are the record of what a command
/// decided and are used for logging and for deriving the ledger effect.
pub trait Event: Clone + core::fmt::Debug {
    /// Stable, dotted event name (e.g. `shipments.document.signed`).
    fn event_type(&self) -> &'static str;

    fn occurred_at(&self) -> DateTime<Utc>;
}
