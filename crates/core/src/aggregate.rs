//! Versioned aggregate roots and the optimistic concurrency expectation.

use crate::entity::Entity;

/// Aggregate root: an entity whose every accepted mutation bumps `version()`.
pub trait AggregateRoot: Entity {
    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Starts at 1 on creation and grows by exactly one per accepted mutation.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation supplied by a caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ExpectedVersion(pub u64);

/// Mismatch between the version a caller read and the stored one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
#[error("version conflict (expected: {expected}, actual: {actual})")]
pub struct VersionConflict {
    pub expected: u64,
    pub actual: u64,
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        self.0 == actual
    }

    pub fn check(self, actual: u64) -> Result<(), VersionConflict> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(VersionConflict {
                expected: self.0,
                actual,
            })
        }
    }

    /// Check against the current version of an aggregate.
    pub fn check_against<A: AggregateRoot>(self, aggregate: &A) -> Result<(), VersionConflict> {
        self.check(aggregate.version())
    }
}
