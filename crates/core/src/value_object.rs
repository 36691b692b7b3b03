//! Value object trait: equality by value, not identity.

/// Marker trait for immutable values compared by their attributes.
///
/// A ledger reference `(document, line, operation)` is a value object: two
/// references with the same ids point at the same cause.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
