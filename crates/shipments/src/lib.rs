//! Shipment documents: outbound stock and the sign/revoke state machine.
//!
//! A draft never moves inventory. Signing is the single gate that decreases
//! balances; revoking restores them and makes the document editable again.

pub mod shipment;

pub use shipment::{
    CreateShipment, DeleteShipment, RevokeShipment, ShipmentCommand, ShipmentCreated,
    ShipmentDeleted, ShipmentDocument, ShipmentEvent, ShipmentRevoked, ShipmentSigned,
    ShipmentState, ShipmentUpdated, SignShipment, UpdateShipment,
};
