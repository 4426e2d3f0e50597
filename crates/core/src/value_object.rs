//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects have no identity; two instances with the same attributes are
/// the same value (a SKU, an order line).
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
