//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: two balance keys
/// naming the same (resource, unit) pair are the same key, and a `Quantity` of
/// `1.500000` equals one of `1.5`. To "modify" a value object, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
