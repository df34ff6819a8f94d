//! Error types for the placement pipeline.
//!
//! Errors are split by collaborator so each pipeline component can apply its
//! own handling strategy: per-sheet search errors degrade to zero candidates,
//! transient persistence errors are retried with a bounded counter, and only
//! startup failures are fatal to a run.

use thiserror::Error;

/// Errors returned by the remote search collaborator.
///
/// The search producer never retries these; the affected sheet simply
/// contributes zero candidates for that identifier (a later full re-run can
/// re-search).
#[derive(Debug, Error)]
pub enum SearchError {
    /// Transport-level failure (connection, timeout, 5xx).
    #[error("search transport error: {0}")]
    Transport(String),

    /// The remote store rejected the search request.
    #[error("search rejected: {0}")]
    Rejected(String),
}

/// Errors returned by the remote persistence collaborator.
///
/// The split between transient and permanent drives the update worker's
/// retry decision: transient failures are re-queued up to the configured
/// retry limit, permanent failures are reported immediately.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Likely to succeed on retry (connection, timeout, 5xx).
    #[error("transient persistence failure: {0}")]
    Transient(String),

    /// Will not succeed on retry (validation, missing entity).
    #[error("permanent persistence failure: {0}")]
    Permanent(String),
}

impl PersistError {
    /// Returns true if the failure is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, PersistError::Transient(_))
    }
}

/// Fatal errors that abort an entire run before any work starts.
///
/// Per-identifier failures never surface here; they are aggregated into the
/// run report instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The caller supplied no sheets to search.
    #[error("no sheets to search")]
    NoSheets,
}
