use thiserror::Error;

use crate::protocol::ResolveError;

/// Errors surfaced by the blocking accessors of a promise cell.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The cell resolved to an error; carries the recorded cause.
    ///
    /// Every accessor call and every subscriber observes the same cause.
    #[error("promise resolved to an error: {cause}")]
    Failed {
        /// The cause recorded when the cell entered its errored state.
        cause: ResolveError,
    },

    /// The bounded wait was cancelled because the deadline elapsed before
    /// the cell resolved. The cell itself is unaffected and can still
    /// resolve later.
    #[error("wait for promise resolution was cancelled before a result arrived")]
    Cancelled,
}

/// Cause recorded when a subscriber requests non-positive demand.
///
/// Backpressure protocol violations are not recoverable for a single-value
/// cell, so invalid demand resolves the cell itself to an error carrying
/// this cause.
#[derive(Debug, Error)]
#[error("demand must be positive (got {requested})")]
pub struct InvalidDemand {
    requested: u64,
}

impl InvalidDemand {
    pub(crate) fn new(requested: u64) -> Self {
        Self { requested }
    }

    /// The demand amount the offending request carried.
    #[must_use]
    pub fn requested(&self) -> u64 {
        self.requested
    }
}
