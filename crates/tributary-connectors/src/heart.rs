//! Peer liveness monitoring for consumer groups.
//!
//! A [`Heart`] runs beside a group consumer as its own task. Every
//! `interval` it broadcasts the consumer's name on the group's pub/sub
//! channel and scans the group's pending-ownership table to discover
//! peers. Scan-based discovery sees peers that joined before this heart
//! subscribed, which broadcast-only discovery would miss. A peer that
//! stays silent longer than `timeout` while still owning pending entries
//! is reported dead, once, through a one-way channel; the orchestrator
//! then claims its work.
//!
//! The heartbeat map lives only inside the heart and is rebuilt from
//! scratch on every start; a peer first observed via the scan is treated
//! as alive as of that observation, never as already timed out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, trace, warn};
use tributary_store::StoreClient;

use crate::error::{SourceError, SourceResult};

/// Heart cadence configuration.
#[derive(Debug, Clone, Copy)]
pub struct HeartConfig {
    /// Time between liveness broadcasts and PEL scans.
    pub interval: Duration,
    /// Silence after which a peer holding pending entries is reported
    /// dead.
    pub timeout: Duration,
}

impl HeartConfig {
    /// Config with the default timeout of ten intervals.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            timeout: interval * 10,
        }
    }

    /// Overrides the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Notification that a peer stopped responding while owning pending
/// entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadPeer {
    /// The silent peer's consumer name.
    pub consumer: String,
    /// When the peer was last seen alive.
    pub last_seen: Instant,
}

/// Tracked liveness of one peer.
struct PeerState {
    last_seen: Instant,
    /// Set once the peer has been reported dead; cleared when it
    /// reappears, so a peer is not re-reported until it times out again.
    reported: bool,
}

/// Handle to a running liveness monitor.
pub struct Heart {
    stop_tx: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl Heart {
    /// Subscribes to the group channel and spawns the monitor loop.
    ///
    /// Returns the handle plus the receiving end of the dead-peer
    /// channel.
    ///
    /// # Errors
    ///
    /// [`SourceError::Validation`] on a zero interval; propagates the store
    /// error if the subscription cannot be created.
    pub async fn spawn(
        store: Arc<dyn StoreClient>,
        streams: Vec<String>,
        group: String,
        name: String,
        config: HeartConfig,
    ) -> SourceResult<(Self, mpsc::UnboundedReceiver<DeadPeer>)> {
        if config.interval.is_zero() {
            return Err(SourceError::Validation(
                "heart interval must be > 0".into(),
            ));
        }
        // Subscribe before the first publish so our own heartbeat (and the
        // watchdog built on it) works from the first cycle.
        let sub = store.subscribe(&group).await?;
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(run(
            store, sub, streams, group, name, config, dead_tx, stop_rx,
        ));
        Ok((Self { stop_tx, handle }, dead_rx))
    }

    /// Whether the monitor loop is still running. A terminated heart
    /// means heartbeating is disabled; the orchestrator stops claiming.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signals termination; the loop exits at the next cycle boundary.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stops the heart and waits for the loop to exit.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.handle.await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run(
    store: Arc<dyn StoreClient>,
    mut sub: tokio::sync::broadcast::Receiver<String>,
    streams: Vec<String>,
    group: String,
    name: String,
    config: HeartConfig,
    dead_tx: mpsc::UnboundedSender<DeadPeer>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut heartbeats: HashMap<String, PeerState> = HashMap::new();
    let mut last_own = None;
    let started = Instant::now();
    let mut ticker = tokio::time::interval(config.interval);

    debug!(group, consumer = %name, interval = ?config.interval, timeout = ?config.timeout, "heart started");

    loop {
        tokio::select! {
            res = stop_rx.changed() => {
                // A dropped sender also means shutdown.
                if res.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            msg = sub.recv() => {
                match msg {
                    Ok(peer) => {
                        let now = Instant::now();
                        if peer == name {
                            last_own = Some(now);
                        } else {
                            trace!(group, peer, "heartbeat received");
                            let state = heartbeats.entry(peer).or_insert(PeerState {
                                last_seen: now,
                                reported: false,
                            });
                            state.last_seen = now;
                            state.reported = false;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(group, missed, "heartbeat subscription lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        error!(group, "heartbeat channel closed, stopping heart");
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if let Err(e) = store.publish(&group, &name).await {
                    error!(group, error = %e, "heartbeat publish failed, stopping heart");
                    break;
                }
                match scan_pending_owners(store.as_ref(), &streams, &group).await {
                    Ok(owners) => {
                        check_dead(&owners, &name, &mut heartbeats, config.timeout, &dead_tx);
                    }
                    Err(e) => {
                        error!(group, error = %e, "pending scan failed, stopping heart");
                        break;
                    }
                }
                // Watchdog: if our own broadcast never comes back, the
                // pub/sub path is broken and peers cannot see us either.
                let own_ref = last_own.unwrap_or(started);
                if own_ref.elapsed() > config.timeout {
                    warn!(group, consumer = %name, "own heartbeat not observed within timeout, stopping heart");
                    break;
                }
            }
        }
    }
    debug!(group, consumer = %name, "heart stopped");
}

/// Consumers currently holding at least one pending entry anywhere in the
/// group.
async fn scan_pending_owners(
    store: &dyn StoreClient,
    streams: &[String],
    group: &str,
) -> SourceResult<HashSet<String>> {
    let mut owners = HashSet::new();
    for stream in streams {
        owners.extend(store.pending_summary(stream, group).await?.into_keys());
    }
    Ok(owners)
}

fn check_dead(
    owners: &HashSet<String>,
    own_name: &str,
    heartbeats: &mut HashMap<String, PeerState>,
    timeout: Duration,
    dead_tx: &mpsc::UnboundedSender<DeadPeer>,
) {
    let now = Instant::now();
    for peer in owners {
        if peer == own_name {
            continue;
        }
        let state = heartbeats.entry(peer.clone()).or_insert_with(|| {
            // First sighting via the PEL scan: alive as of now, not
            // already timed out.
            trace!(peer = %peer, "discovered peer via pending scan");
            PeerState {
                last_seen: now,
                reported: false,
            }
        });
        if state.reported {
            continue;
        }
        if now.duration_since(state.last_seen) > timeout {
            debug!(peer = %peer, last_seen = ?state.last_seen.elapsed(), "peer timed out, reporting dead");
            state.reported = true;
            // Receiver gone just means nobody is looting; keep
            // broadcasting our own liveness regardless.
            let _ = dead_tx.send(DeadPeer {
                consumer: peer.clone(),
                last_seen: state.last_seen,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owners(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn first_sighting_is_alive_not_dead() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hb = HashMap::new();
        check_dead(
            &owners(&["peer"]),
            "me",
            &mut hb,
            Duration::from_secs(10),
            &tx,
        );
        assert!(rx.try_recv().is_err());
        assert!(hb.contains_key("peer"));
    }

    #[test]
    fn stale_peer_reported_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hb = HashMap::new();
        let last_seen = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        hb.insert(
            "peer".to_string(),
            PeerState {
                last_seen,
                reported: false,
            },
        );
        let set = owners(&["peer"]);
        check_dead(&set, "me", &mut hb, Duration::from_millis(1), &tx);
        let dead = rx.try_recv().unwrap();
        assert_eq!(dead.consumer, "peer");

        // Second cycle: already reported, stays silent.
        check_dead(&set, "me", &mut hb, Duration::from_millis(1), &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn own_name_never_reported() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hb = HashMap::new();
        let last_seen = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        hb.insert(
            "me".to_string(),
            PeerState {
                last_seen,
                reported: false,
            },
        );
        check_dead(&owners(&["me"]), "me", &mut hb, Duration::from_millis(1), &tx);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn fresh_peer_not_reported_before_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hb = HashMap::new();
        hb.insert(
            "peer".to_string(),
            PeerState {
                last_seen: Instant::now(),
                reported: false,
            },
        );
        check_dead(
            &owners(&["peer"]),
            "me",
            &mut hb,
            Duration::from_secs(10),
            &tx,
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn zero_interval_is_rejected() {
        let store = tributary_store::MemoryStore::new();
        let res = Heart::spawn(
            Arc::new(store),
            vec!["s".to_string()],
            "g".to_string(),
            "me".to_string(),
            HeartConfig::new(Duration::ZERO),
        )
        .await;
        assert!(matches!(res, Err(SourceError::Validation(_))));
    }

    #[test]
    fn peer_without_pending_entries_not_checked() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut hb = HashMap::new();
        let last_seen = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        hb.insert(
            "peer".to_string(),
            PeerState {
                last_seen,
                reported: false,
            },
        );
        // Peer no longer owns anything: nothing to steal, no report.
        check_dead(&owners(&[]), "me", &mut hb, Duration::from_secs(10), &tx);
        assert!(rx.try_recv().is_err());
    }
}
