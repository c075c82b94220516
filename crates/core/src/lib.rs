//! `stockroom-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, fixed-point quantities, the domain error model and the
//! aggregate/entity/value-object traits the warehouse crates build on.

pub mod aggregate;
pub mod document;
pub mod entity;
pub mod error;
pub mod event;
pub mod id;
pub mod quantity;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot};
pub use document::normalize_number;
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use event::Event;
pub use id::{ClientId, LineId, ReceiptId, ResourceId, ShipmentId, UnitId};
pub use quantity::{quantity_limit, Quantity, QUANTITY_INTEGER_DIGITS, QUANTITY_SCALE};
pub use value_object::ValueObject;
