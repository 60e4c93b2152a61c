//! Status transition rules.
//!
//! Pure and deterministic: the caller passes the report as stored plus the
//! entries it *would* have after the pending patch, so a single update that
//! changes both `entries` and `status` is judged on the new entries.

use thiserror::Error;

use crate::report::{Entry, Priority, Report, ReportStatus};

/// Minimum number of high-priority entries a published report needs before it
/// may be archived.
pub const MIN_HIGH_PRIORITY_FOR_ARCHIVE: usize = 3;

/// Business-rule rejection of a status change.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error(
        "archiving a published report requires at least {MIN_HIGH_PRIORITY_FOR_ARCHIVE} high-priority entries (found {count})"
    )]
    InsufficientHighPriorityEntries { count: usize },

    #[error("cannot publish a report without entries")]
    NoEntries,
}

impl TransitionError {
    /// Stable machine-readable rule name.
    pub fn kind(&self) -> &'static str {
        match self {
            TransitionError::InsufficientHighPriorityEntries { .. } => {
                "insufficient_high_priority_entries"
            }
            TransitionError::NoEntries => "no_entries",
        }
    }
}

/// Decide whether `current` may move to `requested` given the candidate entries.
///
/// Rules are evaluated in order and the first failure wins. Requesting the
/// current status is always legal.
pub fn validate_transition(
    current: &Report,
    candidate_entries: &[Entry],
    requested: ReportStatus,
) -> Result<(), TransitionError> {
    if requested == current.status() {
        return Ok(());
    }

    if requested == ReportStatus::Archived && current.status() == ReportStatus::Published {
        let count = count_high_priority(candidate_entries);
        if count < MIN_HIGH_PRIORITY_FOR_ARCHIVE {
            return Err(TransitionError::InsufficientHighPriorityEntries { count });
        }
    }

    if requested == ReportStatus::Published && candidate_entries.is_empty() {
        return Err(TransitionError::NoEntries);
    }

    Ok(())
}

fn count_high_priority(entries: &[Entry]) -> usize {
    entries
        .iter()
        .filter(|e| e.priority == Priority::High)
        .count()
}
