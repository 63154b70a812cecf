//! Errors surfaced through view statuses.

use crate::ledger::Record;

/// Error produced by one fetch cycle of a view.
///
/// Fetch errors never tear a view down: the error is published to
/// subscribers as [`Status::Error`](crate::view::Status::Error) and the
/// next poll tick retries.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The requested record does not exist on the ledger, or has not
    /// propagated to any reachable peer yet.
    #[error("record not found")]
    NotFound,
    /// Multiple concurrent, non-deleted updates exist for the same record.
    ///
    /// Detecting the conflict is up to the caller's fetch function; views
    /// only propagate it, carrying the colliding candidate revisions.
    #[error("{} conflicting updates for the same record", .candidates.len())]
    ConflictingUpdates {
        /// The colliding candidate revisions.
        candidates: Vec<Record>,
    },
    /// The ledger client failed to perform the read.
    #[error("fetch failed: {0}")]
    Client(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl FetchError {
    /// Wraps an arbitrary client error.
    pub fn client(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Client(err.into())
    }
}
