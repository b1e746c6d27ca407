//! Consumer-group source orchestrator.
//!
//! [`GroupSource`] owns a [`GroupConsumer`] and, when heartbeating is
//! enabled, a [`Heart`] plus a concurrent loot task. On start it replays
//! this consumer's own pending entries, then polls for new ones; each
//! record is emitted downstream individually with a deferred
//! [`AckToken`](crate::ack::AckToken). Dead peers reported by the heart
//! have their pending entries claimed and re-emitted under this consumer's
//! name until nothing is left to claim.
//!
//! Every loop runs as its own tokio task; the tasks communicate only
//! through typed channels (deliveries out, ack requests in, dead-peer
//! notifications from the heart) and a shared stop flag checked at loop
//! boundaries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use tributary_store::{StartId, StoreClient};

use crate::ack::{AckRequest, Delivery};
use crate::config::{GroupSourceConfig, StreamSet, StreamSpec};
use crate::consumer::GroupConsumer;
use crate::error::{SourceError, SourceResult};
use crate::heart::{DeadPeer, Heart, HeartConfig};
use crate::metrics::SourceMetrics;

use super::{emit_batches, SourceState};

/// Handles owned while the source is running.
struct Running {
    stop_tx: watch::Sender<bool>,
    heart: Option<Heart>,
    poll: tokio::task::JoinHandle<SourceResult<()>>,
    loot: Option<tokio::task::JoinHandle<()>>,
    acks: tokio::task::JoinHandle<()>,
}

/// Durable, at-least-once consumer-group source.
///
/// # Lifecycle
///
/// 1. Create with [`GroupSource::new`]
/// 2. Call [`start`](Self::start) with the downstream delivery channel
/// 3. Receive [`Delivery`] records; release each ack token when done
/// 4. Call [`stop`](Self::stop) for clean shutdown
///
/// The lifecycle is one-shot: a stopped source cannot be started again;
/// create a new one under the same `(group, consumer)` identity instead.
pub struct GroupSource {
    store: Arc<dyn StoreClient>,
    streams: StreamSet,
    config: GroupSourceConfig,
    metrics: Arc<SourceMetrics>,
    state_rx: watch::Receiver<SourceState>,
    state_tx: Option<watch::Sender<SourceState>>,
    running: Option<Running>,
}

impl GroupSource {
    /// Creates a group source.
    ///
    /// The streams argument is normalized immediately; group-mode streams
    /// default to [`StartId::Beginning`] so a newly created group covers
    /// the stream's existing backlog.
    ///
    /// # Errors
    ///
    /// [`SourceError::Validation`] on a malformed stream set or config,
    /// before any store interaction.
    pub fn new(
        store: Arc<dyn StoreClient>,
        streams: impl Into<StreamSpec>,
        config: GroupSourceConfig,
    ) -> SourceResult<Self> {
        config.validate()?;
        let streams = StreamSet::normalize(streams, StartId::Beginning)?;
        let (state_tx, state_rx) = watch::channel(SourceState::Created);
        Ok(Self {
            store,
            streams,
            config,
            metrics: Arc::new(SourceMetrics::default()),
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

    /// Shared metrics handle.
    #[must_use]
    pub fn metrics(&self) -> Arc<SourceMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Creates a consumer wrapper bound to this source's identity.
    fn consumer(&self) -> GroupConsumer {
        GroupConsumer::new(
            Arc::clone(&self.store),
            self.streams.clone(),
            self.config.group.clone(),
            self.config.consumer.clone(),
            self.config.count,
            self.config.block,
        )
    }

    /// Ensures the group exists, then spawns the poll, ack, and (with
    /// heartbeating) heart and loot tasks. Deliveries flow to `tx`.
    ///
    /// # Errors
    ///
    /// [`SourceError::InvalidState`] if already started; store errors from
    /// group creation or heart subscription propagate.
    pub async fn start(&mut self, tx: mpsc::Sender<Delivery>) -> SourceResult<()> {
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

        let consumer = self.consumer();
        consumer.ensure_group().await?;

        info!(
            group = %self.config.group,
            consumer = %self.config.consumer,
            streams = self.streams.len(),
            heartbeat = self.config.heartbeat_interval.is_some(),
            "starting group source"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();

        let acks = tokio::spawn(run_acks(
            self.consumer(),
            ack_rx,
            Arc::clone(&self.metrics),
        ));

        let (heart, loot) = match self.config.heartbeat_interval {
            Some(interval) => {
                let heart_config =
                    HeartConfig::new(interval).with_timeout(self.config.claim_timeout);
                let (heart, dead_rx) = Heart::spawn(
                    Arc::clone(&self.store),
                    self.streams.names().map(str::to_string).collect(),
                    self.config.group.clone(),
                    self.config.consumer.clone(),
                    heart_config,
                )
                .await?;
                let loot = tokio::spawn(run_loot(
                    self.consumer(),
                    tx.clone(),
                    ack_tx.clone(),
                    dead_rx,
                    stop_rx.clone(),
                    self.config.claim_timeout,
                    self.config.claim_batch,
                    Arc::clone(&self.metrics),
                ));
                (Some(heart), Some(loot))
            }
            None => (None, None),
        };

        let poll = tokio::spawn(run_poll(
            consumer,
            tx,
            ack_tx,
            stop_rx,
            state_tx,
            Arc::clone(&self.metrics),
            self.config.replay_pending,
        ));

        self.running = Some(Running {
            stop_tx,
            heart,
            poll,
            loot,
            acks,
        });
        Ok(())
    }

    /// Signals every loop to stop at its next iteration boundary and waits
    /// for them. An in-flight blocked read returns at latest after the
    /// configured `block` timeout.
    ///
    /// # Errors
    ///
    /// Returns the poll loop's terminal error, if it failed.
    pub async fn stop(&mut self) -> SourceResult<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        debug!(group = %self.config.group, consumer = %self.config.consumer, "stopping group source");
        let _ = running.stop_tx.send(true);
        if let Some(heart) = running.heart {
            heart.shutdown().await;
        }
        if let Some(loot) = running.loot {
            let _ = loot.await;
        }
        let result = match running.poll.await {
            Ok(res) => res,
            Err(_) => Ok(()), // poll task cancelled or panicked; nothing to report
        };
        // The ack task drains once every outstanding token is released;
        // don't wait forever on a downstream that never completes.
        let _ = tokio::time::timeout(Duration::from_secs(5), running.acks).await;
        result
    }
}

impl std::fmt::Debug for GroupSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupSource")
            .field("group", &self.config.group)
            .field("consumer", &self.config.consumer)
            .field("streams", &self.streams.len())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Replay own pending entries, then poll for new ones until stopped.
async fn run_poll(
    consumer: GroupConsumer,
    tx: mpsc::Sender<Delivery>,
    ack_tx: mpsc::UnboundedSender<AckRequest>,
    stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<SourceState>,
    metrics: Arc<SourceMetrics>,
    replay: bool,
) -> SourceResult<()> {
    if replay {
        let _ = state_tx.send(SourceState::Replaying);
        let batches = match consumer.read(true).await {
            Ok(batches) => batches,
            Err(e) => {
                metrics.record_error();
                let _ = state_tx.send(SourceState::Failed);
                error!(error = %e, "replay read failed");
                return Err(e);
            }
        };
        match emit_batches(&tx, batches, Some(&ack_tx)).await {
            Ok(n) => {
                if n > 0 {
                    info!(records = n, "replayed pending entries");
                }
                metrics.record_replayed(n as u64);
            }
            Err(_) => {
                let _ = state_tx.send(SourceState::Stopped);
                return Ok(());
            }
        }
    }

    let _ = state_tx.send(SourceState::Polling);
    while !*stop_rx.borrow() {
        let batches = match consumer.read(false).await {
            Ok(batches) => batches,
            Err(e) => {
                metrics.record_error();
                let _ = state_tx.send(SourceState::Failed);
                error!(error = %e, "poll read failed, terminating source loop");
                return Err(e);
            }
        };
        match emit_batches(&tx, batches, Some(&ack_tx)).await {
            Ok(n) => metrics.record_emitted(n as u64),
            Err(_) => {
                debug!("downstream dropped, stopping poll loop");
                break;
            }
        }
    }
    let _ = state_tx.send(SourceState::Stopped);
    Ok(())
}

/// Acknowledges entries whose completion markers have been fully released.
async fn run_acks(
    consumer: GroupConsumer,
    mut ack_rx: mpsc::UnboundedReceiver<AckRequest>,
    metrics: Arc<SourceMetrics>,
) {
    while let Some(req) = ack_rx.recv().await {
        match consumer.ack(&req.stream, &[req.id]).await {
            Ok(removed) => metrics.record_acks(removed),
            Err(e) => {
                // The entry stays pending and will be replayed or claimed;
                // that is the recovery path, not a special case.
                metrics.record_error();
                error!(stream = %req.stream, id = %req.id, error = %e, "ack failed, stopping ack loop");
                break;
            }
        }
    }
}

/// Claims and re-emits the pending entries of peers the heart reports
/// dead.
#[allow(clippy::too_many_arguments)]
async fn run_loot(
    consumer: GroupConsumer,
    tx: mpsc::Sender<Delivery>,
    ack_tx: mpsc::UnboundedSender<AckRequest>,
    mut dead_rx: mpsc::UnboundedReceiver<DeadPeer>,
    mut stop_rx: watch::Receiver<bool>,
    claim_timeout: Duration,
    claim_batch: usize,
    metrics: Arc<SourceMetrics>,
) {
    let mut dead: HashMap<String, DeadPeer> = HashMap::new();

    loop {
        if *stop_rx.borrow() {
            break;
        }

        if dead.is_empty() {
            // Nothing to loot: block until the heart reports a death or we
            // are stopped. A closed channel means the heart died and
            // heartbeating is disabled; no further claims are attempted.
            tokio::select! {
                res = stop_rx.changed() => {
                    if res.is_err() || *stop_rx.borrow() {
                        break;
                    }
                    continue;
                }
                peer = dead_rx.recv() => match peer {
                    Some(peer) => {
                        dead.insert(peer.consumer.clone(), peer);
                    }
                    None => {
                        warn!("heart terminated, dead-peer claiming disabled");
                        break;
                    }
                },
            }
        }
        while let Ok(peer) = dead_rx.try_recv() {
            dead.insert(peer.consumer.clone(), peer);
        }

        let mut drained = Vec::new();
        for peer in dead.keys() {
            match drain_peer(&consumer, peer, claim_batch, &tx, &ack_tx, &metrics).await {
                // A check that claims nothing retires the peer; anything
                // claimed earns it one more check after the pause below.
                Ok(0) => drained.push(peer.clone()),
                Ok(n) => {
                    info!(peer = %peer, records = n, "reclaimed entries from dead peer");
                }
                Err(SourceError::Downstream) => return,
                Err(e) => {
                    metrics.record_error();
                    error!(peer = %peer, error = %e, "claim failed, stopping loot loop");
                    return;
                }
            }
        }
        for peer in drained {
            dead.remove(&peer);
        }

        if !dead.is_empty() {
            // The peer may still have been producing unacknowledged work
            // while dying; re-check after a pause.
            tokio::select! {
                () = tokio::time::sleep(claim_timeout) => {}
                res = stop_rx.changed() => {
                    if res.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// Repeatedly steals a peer's pending entries until a pass claims nothing,
/// emitting everything claimed. Returns the total claimed.
async fn drain_peer(
    consumer: &GroupConsumer,
    peer: &str,
    claim_batch: usize,
    tx: &mpsc::Sender<Delivery>,
    ack_tx: &mpsc::UnboundedSender<AckRequest>,
    metrics: &SourceMetrics,
) -> SourceResult<u64> {
    let mut total = 0u64;
    loop {
        let batches = consumer.steal_pending(peer, Some(claim_batch)).await?;
        let n = emit_batches(tx, batches, Some(ack_tx)).await?;
        if n == 0 {
            return Ok(total);
        }
        metrics.record_claimed(n as u64);
        total += n as u64;
    }
}
