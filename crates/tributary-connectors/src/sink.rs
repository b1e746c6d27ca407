//! Stream and list sinks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;
use tributary_store::{EntryId, ListEnd, StoreClient};

use crate::error::SourceResult;

/// Appends field maps as new entries on one stream.
pub struct StreamSink {
    store: Arc<dyn StoreClient>,
    stream: String,
    /// When set, the stream is trimmed (approximately) to this many
    /// entries on each append.
    maxlen: Option<usize>,
}

impl StreamSink {
    /// Creates a sink writing to `stream`.
    #[must_use]
    pub fn new(store: Arc<dyn StoreClient>, stream: impl Into<String>, maxlen: Option<usize>) -> Self {
        Self {
            store,
            stream: stream.into(),
            maxlen,
        }
    }

    /// Appends one entry, returning its assigned id.
    pub async fn write(&self, fields: HashMap<String, String>) -> SourceResult<EntryId> {
        let id = self.store.append(&self.stream, fields, self.maxlen).await?;
        trace!(stream = %self.stream, id = %id, "appended entry");
        Ok(id)
    }
}

/// Pushes serialized values onto one list.
pub struct ListSink {
    store: Arc<dyn StoreClient>,
    key: String,
    end: ListEnd,
}

impl ListSink {
    /// Creates a sink pushing to `key` at the given end. Pushing to the
    /// tail with head pops makes the list a FIFO queue.
    #[must_use]
    pub fn new(store: Arc<dyn StoreClient>, key: impl Into<String>, end: ListEnd) -> Self {
        Self {
            store,
            key: key.into(),
            end,
        }
    }

    /// Pushes one value, returning the resulting list length.
    pub async fn write(&self, value: &str) -> SourceResult<u64> {
        Ok(self.store.push_list(&self.key, value, self.end).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tributary_store::{MemoryStore, StartId};

    #[tokio::test]
    async fn stream_sink_appends_and_trims() {
        let store = MemoryStore::new();
        let sink = StreamSink::new(Arc::new(store.clone()), "s", Some(2));
        for n in 0..4 {
            sink.write(HashMap::from([("n".to_string(), n.to_string())]))
                .await
                .unwrap();
        }
        assert_eq!(store.stream_len("s"), 2);
    }

    #[tokio::test]
    async fn stream_sink_entries_are_readable() {
        let store = MemoryStore::new();
        let sink = StreamSink::new(Arc::new(store.clone()), "s", None);
        let id = sink
            .write(HashMap::from([("k".to_string(), "v".to_string())]))
            .await
            .unwrap();
        let batches = store
            .read(
                &[("s".to_string(), StartId::Beginning)],
                None,
                Duration::ZERO,
            )
            .await
            .unwrap();
        assert_eq!(batches[0].entries[0].id, id);
        assert_eq!(batches[0].entries[0].fields["k"], "v");
    }

    #[tokio::test]
    async fn list_sink_pushes_to_tail() {
        let store = MemoryStore::new();
        let sink = ListSink::new(Arc::new(store.clone()), "q", ListEnd::Tail);
        sink.write("a").await.unwrap();
        let len = sink.write("b").await.unwrap();
        assert_eq!(len, 2);
        let popped = store
            .pop_list(&["q".to_string()], ListEnd::Head, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(popped.unwrap().1, "a");
    }
}
