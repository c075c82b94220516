//! Identity for reference data.

/// Something that keeps its identity while its attributes change.
///
/// A resource renamed or archived is still the same resource as long as its
/// id is unchanged; documents and balances only ever point at the id.
pub trait Entity {
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;
}
