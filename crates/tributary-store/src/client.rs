//! The [`StoreClient`] trait: every command Tributary needs from a store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::StoreResult;
use crate::types::{Entry, EntryId, ListEnd, StartId, StreamBatch};

/// Per-stream cursor for a group read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupCursor {
    /// Deliver entries never delivered to any consumer in the group,
    /// assigning them to the reading consumer in the PEL.
    New,
    /// Re-deliver the reading consumer's own pending entries, starting at
    /// the given id. No new PEL ownership is created.
    Pending(EntryId),
}

/// Command surface of an append-log stream store.
///
/// Implementations must be safe to share across tasks; each Tributary
/// component holds its own handle and never shares one across scheduling
/// contexts beyond what the implementation itself guarantees.
#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Creates a consumer group on a stream, with its delivery cursor at
    /// `start`. With `mkstream`, a missing stream is created empty.
    ///
    /// # Errors
    ///
    /// [`StoreError::GroupAlreadyExists`](crate::StoreError::GroupAlreadyExists)
    /// if the group exists; callers performing idempotent setup swallow it.
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartId,
        mkstream: bool,
    ) -> StoreResult<()>;

    /// Reads entries after each stream's cursor, outside any group.
    ///
    /// Blocks up to `block` waiting for new entries when none are
    /// available; returns one (possibly empty) batch per requested stream.
    async fn read(
        &self,
        cursors: &[(String, StartId)],
        count: Option<usize>,
        block: Duration,
    ) -> StoreResult<Vec<StreamBatch>>;

    /// Reads entries on behalf of `consumer` within `group`.
    ///
    /// [`GroupCursor::New`] delivers never-delivered entries and records
    /// them in the PEL as owned by `consumer`; [`GroupCursor::Pending`]
    /// re-reads the consumer's own PEL without blocking.
    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[(String, GroupCursor)],
        count: Option<usize>,
        block: Duration,
    ) -> StoreResult<Vec<StreamBatch>>;

    /// Removes ids from the group's PEL for `stream`. Ids that are not
    /// pending are ignored. Returns the number actually removed.
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> StoreResult<u64>;

    /// Ids in the group's PEL for `stream` currently owned by `consumer`,
    /// in id order, at most `count`.
    async fn pending_owned(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> StoreResult<Vec<EntryId>>;

    /// Atomically reassigns the given PEL ids to `claimant`, resetting
    /// their delivery timestamps, and returns the claimed entries.
    ///
    /// Ids no longer pending, or pending for less than `min_idle`, are
    /// skipped.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        claimant: &str,
        ids: &[EntryId],
        min_idle: Duration,
    ) -> StoreResult<Vec<Entry>>;

    /// Consumers currently holding at least one PEL entry for the group on
    /// `stream`, with their pending counts.
    async fn pending_summary(
        &self,
        stream: &str,
        group: &str,
    ) -> StoreResult<HashMap<String, u64>>;

    /// Broadcasts `payload` on a channel. Returns the number of
    /// subscribers that received it.
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<u64>;

    /// Subscribes to a broadcast channel.
    async fn subscribe(&self, channel: &str) -> StoreResult<broadcast::Receiver<String>>;

    /// Appends a field map as a new entry on `stream`, creating the stream
    /// if missing, and returns the assigned id. With `maxlen`, the stream
    /// is trimmed (approximately) to that many entries.
    async fn append(
        &self,
        stream: &str,
        fields: HashMap<String, String>,
        maxlen: Option<usize>,
    ) -> StoreResult<EntryId>;

    /// Pushes a value onto a list. Returns the resulting list length.
    async fn push_list(&self, key: &str, value: &str, end: ListEnd) -> StoreResult<u64>;

    /// Pops a value from the given `end` of the first non-empty list among
    /// `keys`, blocking up to `timeout`. `None` on timeout.
    async fn pop_list(
        &self,
        keys: &[String],
        end: ListEnd,
        timeout: Duration,
    ) -> StoreResult<Option<(String, String)>>;
}
