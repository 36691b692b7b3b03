//! Entity trait: identity + continuity across state changes.

/// Entity marker + minimal interface.
///
/// Line items and ledger rows are entities: two of them with equal values but
/// different ids are still different records.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}
