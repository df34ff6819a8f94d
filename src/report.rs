//! End-of-run summary.

use crate::model::{Identifier, PlacementWrite};

/// Terminal state of one identifier after a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentifierOutcome {
    /// A placement was accepted and handed to the update worker.
    /// `retries` counts write re-attempts made for this identifier.
    Placed { retries: u32 },

    /// The reviewer rejected every candidate they were shown.
    /// `candidates_seen` counts the presentations before they gave up.
    Abandoned { candidates_seen: usize },

    /// No candidate was found on any sheet; the reviewer was never
    /// consulted. Follow-up differs from a rejection: the identifier may be
    /// missing from the drawing set entirely.
    NothingFound,

    /// No search result arrived within the result wait window.
    SkippedTimeout,

    /// Every sheet search failed; candidate absence was not verified.
    SearchFailed,
}

/// Summary of a complete pipeline run.
///
/// Outcomes are listed in work-item input order, regardless of the
/// order identifiers were actually adjudicated in.
#[derive(Debug)]
pub struct RunReport {
    /// Per-identifier terminal outcome, in input order.
    pub outcomes: Vec<(Identifier, IdentifierOutcome)>,

    /// Writes acknowledged by the persistence backend.
    pub writes_succeeded: u64,

    /// Total write re-attempts across all identifiers.
    pub write_retries: u64,

    /// Writes that exhausted retries or failed permanently.
    pub writes_failed: u64,

    /// The failed writes themselves, for operator follow-up.
    pub failed_writes: Vec<PlacementWrite>,
}

impl RunReport {
    /// Number of identifiers that ended in a placement.
    pub fn placed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, IdentifierOutcome::Placed { .. }))
            .count()
    }

    /// Number of identifiers whose candidates the reviewer all rejected.
    pub fn abandoned_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, IdentifierOutcome::Abandoned { .. }))
            .count()
    }

    /// Number of identifiers with no candidate on any sheet.
    pub fn nothing_found_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == IdentifierOutcome::NothingFound)
            .count()
    }

    /// Number of identifiers that timed out or whose searches all failed.
    pub fn unresolved_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| {
                matches!(
                    o,
                    IdentifierOutcome::SkippedTimeout | IdentifierOutcome::SearchFailed
                )
            })
            .count()
    }

    /// Outcome for a specific identifier, if it was part of the run.
    pub fn outcome_for(&self, identifier: &Identifier) -> Option<&IdentifierOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == identifier)
            .map(|(_, o)| o)
    }
}
