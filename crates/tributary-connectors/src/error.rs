//! Connector error types.

use thiserror::Error;
use tributary_store::StoreError;

/// Result alias for source and sink operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Errors surfaced by sources, sinks and consumers.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A malformed stream-set or configuration argument, rejected before
    /// any store call is made.
    #[error("validation error: {0}")]
    Validation(String),

    /// A store command failed. Fatal for the loop that issued it; an
    /// unacknowledged entry affected by the failure stays pending and is
    /// replayed or claimed later.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An operation was called in the wrong lifecycle state.
    #[error("invalid state: expected {expected}, was {actual}")]
    InvalidState {
        /// The state the operation requires.
        expected: String,
        /// The state the component was in.
        actual: String,
    },

    /// The downstream channel closed while a record was being emitted.
    #[error("downstream channel closed")]
    Downstream,
}
