//! Store error types.

use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by [`StoreClient`](crate::StoreClient) implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The consumer group already exists on the stream.
    ///
    /// Expected during idempotent group creation; consumers swallow it.
    #[error("consumer group '{group}' already exists on stream '{stream}'")]
    GroupAlreadyExists {
        /// Stream name.
        stream: String,
        /// Group name.
        group: String,
    },

    /// A group-scoped command referenced a group that was never created.
    #[error("no such consumer group '{group}' on stream '{stream}'")]
    NoSuchGroup {
        /// Stream name.
        stream: String,
        /// Group name.
        group: String,
    },

    /// The store connection is down or the request could not be delivered.
    ///
    /// Fatal at the consumption layer: the affected loop or monitor
    /// terminates rather than retrying.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store returned a malformed or unexpected response.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl StoreError {
    /// Whether this error is the expected idempotent-creation signal.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::GroupAlreadyExists { .. })
    }
}
