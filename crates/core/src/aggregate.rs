//! Aggregate root trait and optimistic concurrency expectations.

/// Aggregate root marker + minimal interface.
///
/// Stock items and reservations are persisted as state (not event streams),
/// so `version` is a row version used for optimistic concurrency.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the persisted state (0 = never stored).
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Require the stored row to be absent.
    NoRow,
    /// Require the stored row to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation derived from the version an aggregate was loaded at.
    pub fn from_loaded(version: u64) -> Self {
        if version == 0 {
            ExpectedVersion::NoRow
        } else {
            ExpectedVersion::Exact(version)
        }
    }

    /// `actual` is `None` when there is no stored row.
    pub fn matches(self, actual: Option<u64>) -> bool {
        match (self, actual) {
            (ExpectedVersion::NoRow, None) => true,
            (ExpectedVersion::Exact(v), Some(a)) => v == a,
            _ => false,
        }
    }
}
