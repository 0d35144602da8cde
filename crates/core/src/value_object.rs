//! Value objects: compared by value, no identity.

/// Marker trait for immutable values such as [`crate::Money`] or a payment term.
///
/// To "change" a value object, build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
