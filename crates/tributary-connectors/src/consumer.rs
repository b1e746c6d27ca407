//! Stateful consumption wrappers over the store's read commands.
//!
//! [`StreamConsumer`] wraps the plain read command, tracking a per-stream
//! cursor so successive calls only return new entries. [`GroupConsumer`]
//! wraps the group read/ack/claim protocol under one `(group, consumer)`
//! identity; all durable-delivery state lives in the store, so the wrapper
//! itself can be recreated freely after a crash.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use tributary_store::{
    EntryId, GroupCursor, StartId, StoreClient, StreamBatch,
};

use crate::config::{StreamSet, DEFAULT_CLAIM_BATCH};
use crate::error::SourceResult;

/// Consumes entries from streams outside any group.
///
/// Keeps its cursors in memory only; persistence of the read position
/// across runs is up to the caller.
pub struct StreamConsumer {
    store: Arc<dyn StoreClient>,
    cursors: Vec<(String, StartId)>,
    count: Option<usize>,
    block: Duration,
}

impl StreamConsumer {
    /// Creates a consumer positioned at each stream's configured start.
    #[must_use]
    pub fn new(
        store: Arc<dyn StoreClient>,
        streams: &StreamSet,
        count: Option<usize>,
        block: Duration,
    ) -> Self {
        Self {
            store,
            cursors: streams.iter().cloned().collect(),
            count,
            block,
        }
    }

    /// Reads the next entries from every stream, blocking up to the
    /// configured timeout when none are available, and advances the
    /// cursors past everything returned.
    pub async fn consume(&mut self) -> SourceResult<Vec<StreamBatch>> {
        let batches = self
            .store
            .read(&self.cursors, self.count, self.block)
            .await?;
        for batch in &batches {
            if let Some(max) = batch.entries.iter().map(|e| e.id).max() {
                for (name, start) in &mut self.cursors {
                    if *name == batch.stream {
                        *start = StartId::After(max);
                    }
                }
            }
        }
        Ok(batches)
    }
}

/// Consumes entries from streams as a member of a consumer group.
pub struct GroupConsumer {
    store: Arc<dyn StoreClient>,
    streams: StreamSet,
    group: String,
    name: String,
    count: Option<usize>,
    block: Duration,
}

impl GroupConsumer {
    /// Creates a consumer identity. No store calls are made until
    /// [`ensure_group`](Self::ensure_group) or a read.
    #[must_use]
    pub fn new(
        store: Arc<dyn StoreClient>,
        streams: StreamSet,
        group: impl Into<String>,
        name: impl Into<String>,
        count: Option<usize>,
        block: Duration,
    ) -> Self {
        Self {
            store,
            streams,
            group: group.into(),
            name: name.into(),
            count,
            block,
        }
    }

    /// Streams this consumer reads from.
    #[must_use]
    pub fn streams(&self) -> &StreamSet {
        &self.streams
    }

    /// The consumer's name within the group.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The group name.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Idempotently creates the group on every configured stream, creating
    /// missing streams. A group that already exists is left untouched; any
    /// other store error propagates.
    pub async fn ensure_group(&self) -> SourceResult<()> {
        for (stream, start) in self.streams.iter() {
            match self.store.create_group(stream, &self.group, *start, true).await {
                Ok(()) => debug!(stream, group = %self.group, "created consumer group"),
                Err(e) if e.is_already_exists() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Reads entries from every configured stream.
    ///
    /// With `pending = false`, requests up to `count` never-delivered
    /// entries per stream, blocking up to the configured timeout, and
    /// takes PEL ownership of them. With `pending = true`, re-reads this
    /// consumer's whole own PEL without blocking; this is the startup
    /// replay path.
    pub async fn read(&self, pending: bool) -> SourceResult<Vec<StreamBatch>> {
        let cursor = if pending {
            GroupCursor::Pending(EntryId::ZERO)
        } else {
            GroupCursor::New
        };
        let cursors: Vec<(String, GroupCursor)> = self
            .streams
            .names()
            .map(|n| (n.to_string(), cursor))
            .collect();
        let (count, block) = if pending {
            (None, Duration::ZERO)
        } else {
            (self.count, self.block)
        };
        Ok(self
            .store
            .read_group(&self.group, &self.name, &cursors, count, block)
            .await?)
    }

    /// Acknowledges entry ids on one stream, removing them from the PEL.
    /// Ids no longer pending are ignored.
    pub async fn ack(&self, stream: &str, ids: &[EntryId]) -> SourceResult<u64> {
        Ok(self.store.ack(stream, &self.group, ids).await?)
    }

    /// Up to `count` PEL ids on `stream` currently owned by `consumer`.
    pub async fn get_pending(
        &self,
        stream: &str,
        consumer: &str,
        count: usize,
    ) -> SourceResult<Vec<EntryId>> {
        Ok(self
            .store
            .pending_owned(stream, &self.group, consumer, count)
            .await?)
    }

    /// Atomically claims up to `count` of `consumer`'s pending entries on
    /// `stream` for this consumer, returning them as a normal read-shaped
    /// batch. Empty batch when `consumer` owns nothing there.
    ///
    /// Liveness is decided by the caller (via the heart), so the claim
    /// itself uses no idle-time filter.
    pub async fn claim_pending(
        &self,
        stream: &str,
        consumer: &str,
        count: Option<usize>,
    ) -> SourceResult<StreamBatch> {
        let count = count.or(self.count).unwrap_or(DEFAULT_CLAIM_BATCH);
        let ids = self.get_pending(stream, consumer, count).await?;
        if ids.is_empty() {
            return Ok(StreamBatch::new(stream, Vec::new()));
        }
        let entries = self
            .store
            .claim(stream, &self.group, &self.name, &ids, Duration::ZERO)
            .await?;
        debug!(
            stream,
            from = consumer,
            to = %self.name,
            claimed = entries.len(),
            "claimed pending entries"
        );
        Ok(StreamBatch::new(stream, entries))
    }

    /// Applies [`claim_pending`](Self::claim_pending) across every
    /// configured stream.
    pub async fn steal_pending(
        &self,
        consumer: &str,
        count: Option<usize>,
    ) -> SourceResult<Vec<StreamBatch>> {
        let mut batches = Vec::with_capacity(self.streams.len());
        for (stream, _) in self.streams.iter() {
            batches.push(self.claim_pending(stream, consumer, count).await?);
        }
        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tributary_store::MemoryStore;

    fn fields(n: u32) -> HashMap<String, String> {
        HashMap::from([("n".to_string(), n.to_string())])
    }

    fn group_consumer(store: &MemoryStore, name: &str) -> GroupConsumer {
        let streams = StreamSet::normalize("s", StartId::Beginning).unwrap();
        GroupConsumer::new(
            Arc::new(store.clone()),
            streams,
            "g",
            name,
            None,
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn ensure_group_is_idempotent() {
        let store = MemoryStore::new();
        let consumer = group_consumer(&store, "c1");
        consumer.ensure_group().await.unwrap();
        // Put something in the PEL, then ensure again: contents untouched.
        store.append("s", fields(1), None).await.unwrap();
        consumer.read(false).await.unwrap();
        consumer.ensure_group().await.unwrap();
        let summary = store.pending_summary("s", "g").await.unwrap();
        assert_eq!(summary.get("c1"), Some(&1));
    }

    #[tokio::test]
    async fn read_new_then_replay_pending() {
        let store = MemoryStore::new();
        let consumer = group_consumer(&store, "c1");
        consumer.ensure_group().await.unwrap();
        store.append("s", fields(1), None).await.unwrap();
        store.append("s", fields(2), None).await.unwrap();

        let batches = consumer.read(false).await.unwrap();
        assert_eq!(batches[0].entries.len(), 2);

        // Unacknowledged entries come back on the replay path.
        let replay = consumer.read(true).await.unwrap();
        assert_eq!(replay[0].entries.len(), 2);

        let ids: Vec<EntryId> = replay[0].entries.iter().map(|e| e.id).collect();
        consumer.ack("s", &ids).await.unwrap();
        let replay = consumer.read(true).await.unwrap();
        assert!(replay[0].is_empty());
    }

    #[tokio::test]
    async fn ack_with_stale_ids_is_noop() {
        let store = MemoryStore::new();
        let consumer = group_consumer(&store, "c1");
        consumer.ensure_group().await.unwrap();
        let removed = consumer.ack("s", &[EntryId::new(99, 0)]).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn claim_pending_moves_ownership_in_batches() {
        let store = MemoryStore::new();
        let dead = group_consumer(&store, "dead");
        dead.ensure_group().await.unwrap();
        for n in 0..5 {
            store.append("s", fields(n), None).await.unwrap();
        }
        dead.read(false).await.unwrap();

        let thief = group_consumer(&store, "thief");
        // Batch size 2 over 5 pending entries: 2 + 2 + 1, then empty.
        let mut total = 0;
        let mut calls = 0;
        loop {
            let batch = thief.claim_pending("s", "dead", Some(2)).await.unwrap();
            calls += 1;
            if batch.is_empty() {
                break;
            }
            total += batch.entries.len();
        }
        assert_eq!(total, 5);
        assert_eq!(calls, 4);

        let summary = store.pending_summary("s", "g").await.unwrap();
        assert_eq!(summary.get("thief"), Some(&5));
        assert_eq!(summary.get("dead"), None);
    }

    #[tokio::test]
    async fn steal_pending_covers_all_streams() {
        let store = MemoryStore::new();
        let streams = StreamSet::normalize(vec!["a", "b"], StartId::Beginning).unwrap();
        let dead = GroupConsumer::new(
            Arc::new(store.clone()),
            streams.clone(),
            "g",
            "dead",
            None,
            Duration::ZERO,
        );
        dead.ensure_group().await.unwrap();
        store.append("a", fields(1), None).await.unwrap();
        store.append("b", fields(2), None).await.unwrap();
        dead.read(false).await.unwrap();

        let thief = GroupConsumer::new(
            Arc::new(store.clone()),
            streams,
            "g",
            "thief",
            None,
            Duration::ZERO,
        );
        let batches = thief.steal_pending("dead", None).await.unwrap();
        let total: usize = batches.iter().map(|b| b.entries.len()).sum();
        assert_eq!(total, 2);
    }

    #[tokio::test]
    async fn steal_from_consumer_with_nothing_is_empty() {
        let store = MemoryStore::new();
        let consumer = group_consumer(&store, "c1");
        consumer.ensure_group().await.unwrap();
        let batches = consumer.steal_pending("ghost", None).await.unwrap();
        assert!(batches.iter().all(StreamBatch::is_empty));
    }

    #[tokio::test]
    async fn stream_consumer_advances_cursor() {
        let store = MemoryStore::new();
        store.append("s", fields(1), None).await.unwrap();
        let streams = StreamSet::normalize("s", StartId::Beginning).unwrap();
        let mut consumer =
            StreamConsumer::new(Arc::new(store.clone()), &streams, None, Duration::ZERO);

        let batches = consumer.consume().await.unwrap();
        assert_eq!(batches[0].entries.len(), 1);

        // Nothing new: the cursor moved past the first entry.
        let batches = consumer.consume().await.unwrap();
        assert!(batches[0].is_empty());

        store.append("s", fields(2), None).await.unwrap();
        let batches = consumer.consume().await.unwrap();
        assert_eq!(batches[0].entries.len(), 1);
        assert_eq!(batches[0].entries[0].fields["n"], "2");
    }
}
