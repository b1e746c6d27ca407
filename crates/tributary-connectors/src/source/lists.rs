//! Volatile list-queue source.
//!
//! Pops items from one or more lists, treating them as a volatile queue
//! (FIFO or LIFO depending on how producers push and which end is
//! popped). A pop removes the item from the store immediately: an item
//! popped and lost before processing is gone, so this mode is
//! **at-most-once**. For durable consumption use
//! [`GroupSource`](super::GroupSource).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};
use tributary_store::{ListEnd, StoreClient};

use crate::config::DEFAULT_BLOCK;
use crate::error::{SourceError, SourceResult};

use super::SourceState;

/// One item popped from a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    /// The list the item came from.
    pub key: String,
    /// The popped value.
    pub value: String,
}

/// Configuration for [`ListSource`].
#[derive(Debug, Clone)]
pub struct ListSourceConfig {
    /// Maximum time one pop blocks waiting for an item.
    pub block: Duration,
    /// Which end of the lists to pop from. Defaults to the head.
    pub end: ListEnd,
}

impl Default for ListSourceConfig {
    fn default() -> Self {
        Self {
            block: DEFAULT_BLOCK,
            end: ListEnd::Head,
        }
    }
}

/// Emits items popped from lists. No redelivery on loss.
pub struct ListSource {
    store: Arc<dyn StoreClient>,
    keys: Vec<String>,
    config: ListSourceConfig,
    state_rx: watch::Receiver<SourceState>,
    state_tx: Option<watch::Sender<SourceState>>,
    running: Option<(watch::Sender<bool>, tokio::task::JoinHandle<SourceResult<()>>)>,
}

impl ListSource {
    /// Creates a list source over one or more keys.
    ///
    /// # Errors
    ///
    /// [`SourceError::Validation`] on an empty key set or an empty key.
    pub fn new(
        store: Arc<dyn StoreClient>,
        keys: Vec<String>,
        config: ListSourceConfig,
    ) -> SourceResult<Self> {
        if keys.is_empty() {
            return Err(SourceError::Validation("list key set is empty".into()));
        }
        if keys.iter().any(String::is_empty) {
            return Err(SourceError::Validation("empty list key".into()));
        }
        let (state_tx, state_rx) = watch::channel(SourceState::Created);
        Ok(Self {
            store,
            keys,
            config,
            state_rx,
            state_tx: Some(state_tx),
            running: None,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SourceState {
        *self.state_rx.borrow()
    }

    /// Spawns the pop loop.
    ///
    /// # Errors
    ///
    /// [`SourceError::InvalidState`] if already started.
    pub fn start(&mut self, tx: mpsc::Sender<ListItem>) -> SourceResult<()> {
        if self.running.is_some() {
            return Err(SourceError::InvalidState {
                expected: "created".into(),
                actual: self.state().to_string(),
            });
        }
        let state_tx = self.state_tx.take().ok_or_else(|| SourceError::InvalidState {
            expected: "created".into(),
            actual: self.state().to_string(),
        })?;
        info!(keys = self.keys.len(), "starting list source");

        let store = Arc::clone(&self.store);
        let keys = self.keys.clone();
        let config = self.config.clone();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_pop(store, keys, config, tx, stop_rx, state_tx));
        self.running = Some((stop_tx, handle));
        Ok(())
    }

    /// Stops the pop loop at its next iteration boundary.
    ///
    /// # Errors
    ///
    /// Returns the pop loop's terminal error, if it failed.
    pub async fn stop(&mut self) -> SourceResult<()> {
        let Some((stop_tx, handle)) = self.running.take() else {
            return Ok(());
        };
        let _ = stop_tx.send(true);
        match handle.await {
            Ok(res) => res,
            Err(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for ListSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListSource")
            .field("keys", &self.keys)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn run_pop(
    store: Arc<dyn StoreClient>,
    keys: Vec<String>,
    config: ListSourceConfig,
    tx: mpsc::Sender<ListItem>,
    stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<SourceState>,
) -> SourceResult<()> {
    let _ = state_tx.send(SourceState::Polling);
    while !*stop_rx.borrow() {
        let popped = match store.pop_list(&keys, config.end, config.block).await {
            Ok(popped) => popped,
            Err(e) => {
                let _ = state_tx.send(SourceState::Failed);
                error!(error = %e, "list pop failed, terminating source loop");
                return Err(e.into());
            }
        };
        if let Some((key, value)) = popped {
            if tx.send(ListItem { key, value }).await.is_err() {
                debug!("downstream dropped, stopping list source");
                break;
            }
        }
    }
    let _ = state_tx.send(SourceState::Stopped);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_store::MemoryStore;

    #[tokio::test]
    async fn pops_items_in_fifo_order() {
        let store = MemoryStore::new();
        store.push_list("q", "a", ListEnd::Tail).await.unwrap();
        store.push_list("q", "b", ListEnd::Tail).await.unwrap();

        let mut source = ListSource::new(
            Arc::new(store),
            vec!["q".to_string()],
            ListSourceConfig {
                block: Duration::from_millis(20),
                ..ListSourceConfig::default()
            },
        )
        .unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        source.start(tx).unwrap();

        assert_eq!(rx.recv().await.unwrap().value, "a");
        assert_eq!(rx.recv().await.unwrap().value, "b");
        source.stop().await.unwrap();
    }

    #[tokio::test]
    async fn rejects_empty_key_set() {
        let store = MemoryStore::new();
        let err =
            ListSource::new(Arc::new(store), Vec::new(), ListSourceConfig::default()).unwrap_err();
        assert!(matches!(err, SourceError::Validation(_)));
    }
}
