//! Plain stream source (no group, no acknowledgment).
//!
//! Reads one or more streams from a configured start position and emits
//! each entry individually. The read cursor lives only in process memory:
//! entries emitted but not processed before a crash are not redelivered.
//! For durable consumption use [`GroupSource`](super::GroupSource).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};
use tributary_store::{StartId, StoreClient};

use crate::ack::Delivery;
use crate::config::{StreamSet, StreamSpec, DEFAULT_BLOCK};
use crate::consumer::StreamConsumer;
use crate::error::{SourceError, SourceResult};

use super::{emit_batches, SourceState};

/// Configuration for [`StreamSource`].
#[derive(Debug, Clone)]
pub struct StreamSourceConfig {
    /// Maximum entries requested per stream per poll. `None` reads all
    /// available.
    pub count: Option<usize>,
    /// Maximum time one poll blocks waiting for new entries.
    pub block: Duration,
    /// Start position for streams named without one. Defaults to
    /// [`StartId::New`]: only entries appended after startup.
    pub default_start: StartId,
}

impl Default for StreamSourceConfig {
    fn default() -> Self {
        Self {
            count: None,
            block: DEFAULT_BLOCK,
            default_start: StartId::New,
        }
    }
}

/// Polls streams outside any consumer group and emits entries without
/// completion markers.
pub struct StreamSource {
    store: Arc<dyn StoreClient>,
    streams: StreamSet,
    config: StreamSourceConfig,
    state_rx: watch::Receiver<SourceState>,
    state_tx: Option<watch::Sender<SourceState>>,
    running: Option<(watch::Sender<bool>, tokio::task::JoinHandle<SourceResult<()>>)>,
}

impl StreamSource {
    /// Creates a plain stream source.
    ///
    /// # Errors
    ///
    /// [`SourceError::Validation`] on a malformed stream set.
    pub fn new(
        store: Arc<dyn StoreClient>,
        streams: impl Into<StreamSpec>,
        config: StreamSourceConfig,
    ) -> SourceResult<Self> {
        let streams = StreamSet::normalize(streams, config.default_start)?;
        let (state_tx, state_rx) = watch::channel(SourceState::Created);
        Ok(Self {
            store,
            streams,
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

    /// Spawns the poll loop; `Delivery.ack` is always `None`.
    ///
    /// # Errors
    ///
    /// [`SourceError::InvalidState`] if already started.
    pub fn start(&mut self, tx: mpsc::Sender<Delivery>) -> SourceResult<()> {
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
        info!(streams = self.streams.len(), "starting stream source");

        let consumer = StreamConsumer::new(
            Arc::clone(&self.store),
            &self.streams,
            self.config.count,
            self.config.block,
        );
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_poll(consumer, tx, stop_rx, state_tx));
        self.running = Some((stop_tx, handle));
        Ok(())
    }

    /// Stops the poll loop at its next iteration boundary.
    ///
    /// # Errors
    ///
    /// Returns the poll loop's terminal error, if it failed.
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

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("streams", &self.streams.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

async fn run_poll(
    mut consumer: StreamConsumer,
    tx: mpsc::Sender<Delivery>,
    stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<SourceState>,
) -> SourceResult<()> {
    let _ = state_tx.send(SourceState::Polling);
    while !*stop_rx.borrow() {
        let batches = match consumer.consume().await {
            Ok(batches) => batches,
            Err(e) => {
                let _ = state_tx.send(SourceState::Failed);
                error!(error = %e, "stream read failed, terminating source loop");
                return Err(e);
            }
        };
        if emit_batches(&tx, batches, None).await.is_err() {
            debug!("downstream dropped, stopping stream source");
            break;
        }
    }
    let _ = state_tx.send(SourceState::Stopped);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tributary_store::MemoryStore;

    #[tokio::test]
    async fn emits_new_entries_without_ack_tokens() {
        let store = MemoryStore::new();
        let mut source = StreamSource::new(
            Arc::new(store.clone()),
            "s",
            StreamSourceConfig {
                block: Duration::from_millis(20),
                default_start: StartId::Beginning,
                ..StreamSourceConfig::default()
            },
        )
        .unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        source.start(tx).unwrap();

        store
            .append("s", HashMap::from([("n".to_string(), "1".to_string())]), None)
            .await
            .unwrap();

        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.record.stream, "s");
        assert!(delivery.ack.is_none());

        source.stop().await.unwrap();
        assert_eq!(source.state(), SourceState::Stopped);
    }

    #[tokio::test]
    async fn double_start_is_invalid() {
        let store = MemoryStore::new();
        let mut source = StreamSource::new(
            Arc::new(store),
            "s",
            StreamSourceConfig::default(),
        )
        .unwrap();
        let (tx, _rx) = mpsc::channel(1);
        source.start(tx.clone()).unwrap();
        assert!(matches!(
            source.start(tx),
            Err(SourceError::InvalidState { .. })
        ));
        source.stop().await.unwrap();
    }
}
