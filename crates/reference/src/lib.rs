//! Reference data: resources, units of measure and clients.
//!
//! All three are "named, archivable" entities. They share one capability
//! trait, [`ReferenceEntity`], so the infrastructure layer can validate,
//! archive and delete them through a single generic code path; each concrete
//! type only supplies its factory and its uniqueness key (the name).

pub mod client;
pub mod entity;
pub mod resource;
pub mod unit;

pub use client::{Client, ClientDraft};
pub use entity::{ReferenceEntity, ReferenceKind, ReferenceStatus, normalize_name};
pub use resource::{Resource, ResourceDraft};
pub use unit::{UnitDraft, UnitOfMeasure};
