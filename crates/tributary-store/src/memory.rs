//! In-process [`StoreClient`] implementation.
//!
//! [`MemoryStore`] keeps streams, groups, lists and pub/sub channels in a
//! `parking_lot`-guarded table and wakes blocked readers through a shared
//! [`Notify`]. It backs the integration test suites and embedded
//! deployments that don't need a separate store server; the consumption
//! engine treats it exactly like a networked store.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tracing::debug;

use crate::client::{GroupCursor, StoreClient};
use crate::error::{StoreError, StoreResult};
use crate::types::{Entry, EntryId, ListEnd, StartId, StreamBatch};

/// Capacity of each pub/sub broadcast channel.
const CHANNEL_CAPACITY: usize = 1024;

/// One row of a group's pending entry list.
#[derive(Debug, Clone)]
struct PelRow {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

/// Per-group state: delivery cursor plus the PEL.
#[derive(Debug, Default)]
struct GroupState {
    /// Highest id ever delivered as new to any consumer in the group.
    cursor: EntryId,
    pel: BTreeMap<EntryId, PelRow>,
}

/// One append-only stream.
#[derive(Debug, Default)]
struct StreamState {
    entries: VecDeque<Entry>,
    /// Highest id ever assigned, surviving trims.
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn entry(&self, id: EntryId) -> Option<&Entry> {
        let idx = self.entries.binary_search_by_key(&id, |e| e.id).ok()?;
        self.entries.get(idx)
    }

    fn entries_after(&self, after: EntryId, count: Option<usize>) -> Vec<Entry> {
        let it = self.entries.iter().filter(|e| e.id > after).cloned();
        match count {
            Some(n) => it.take(n).collect(),
            None => it.collect(),
        }
    }
}

#[derive(Default)]
struct State {
    streams: HashMap<String, StreamState>,
    lists: HashMap<String, VecDeque<String>>,
}

struct Shared {
    state: Mutex<State>,
    /// Signalled on every append or list push; blocked reads re-check.
    data_ready: Notify,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

/// In-process append-log store.
///
/// Cloning is cheap and yields a handle to the same store.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                data_ready: Notify::new(),
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Number of entries currently held by `stream` (after trims).
    #[must_use]
    pub fn stream_len(&self, stream: &str) -> usize {
        let state = self.shared.state.lock();
        state.streams.get(stream).map_or(0, |s| s.entries.len())
    }

    /// Blocks the current task until `deadline` or a data-ready signal.
    /// Returns `false` once the deadline has passed.
    async fn wait_for_data(&self, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        let mut notified = pin!(self.shared.data_ready.notified());
        // Register before the caller's next state check to avoid a lost
        // wakeup between unlock and await.
        notified.as_mut().enable();
        tokio::time::timeout(remaining, notified).await.is_ok()
    }

    fn next_id(stream: &mut StreamState) -> EntryId {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let ms = u64::try_from(ms).unwrap_or(u64::MAX);
        let id = if ms > stream.last_id.ms {
            EntryId::new(ms, 0)
        } else {
            stream.last_id.next()
        };
        stream.last_id = id;
        id
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("MemoryStore")
            .field("streams", &state.streams.len())
            .field("lists", &state.lists.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn create_group(
        &self,
        stream: &str,
        group: &str,
        start: StartId,
        mkstream: bool,
    ) -> StoreResult<()> {
        let mut state = self.shared.state.lock();
        if !state.streams.contains_key(stream) {
            if !mkstream {
                return Err(StoreError::Protocol(format!("no such stream: {stream}")));
            }
            state.streams.insert(stream.to_string(), StreamState::default());
        }
        let s = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| StoreError::Protocol(format!("no such stream: {stream}")))?;
        if s.groups.contains_key(group) {
            return Err(StoreError::GroupAlreadyExists {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }
        let cursor = match start {
            StartId::Beginning => EntryId::ZERO,
            StartId::New => s.last_id,
            StartId::After(id) => id,
        };
        s.groups.insert(
            group.to_string(),
            GroupState {
                cursor,
                pel: BTreeMap::new(),
            },
        );
        debug!(stream, group, cursor = %cursor, "created consumer group");
        Ok(())
    }

    async fn read(
        &self,
        cursors: &[(String, StartId)],
        count: Option<usize>,
        block: Duration,
    ) -> StoreResult<Vec<StreamBatch>> {
        // Resolve `$` once, against the state at call time.
        let resolved: Vec<(String, EntryId)> = {
            let state = self.shared.state.lock();
            cursors
                .iter()
                .map(|(name, start)| {
                    let after = match start {
                        StartId::Beginning => EntryId::ZERO,
                        StartId::New => state.streams.get(name).map_or(EntryId::ZERO, |s| s.last_id),
                        StartId::After(id) => *id,
                    };
                    (name.clone(), after)
                })
                .collect()
        };

        let deadline = Instant::now() + block;
        loop {
            let batches: Vec<StreamBatch> = {
                let state = self.shared.state.lock();
                resolved
                    .iter()
                    .map(|(name, after)| {
                        let entries = state
                            .streams
                            .get(name)
                            .map(|s| s.entries_after(*after, count))
                            .unwrap_or_default();
                        StreamBatch::new(name.clone(), entries)
                    })
                    .collect()
            };
            if batches.iter().any(|b| !b.is_empty()) {
                return Ok(batches);
            }
            if !self.wait_for_data(deadline).await {
                return Ok(batches);
            }
        }
    }

    async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        cursors: &[(String, GroupCursor)],
        count: Option<usize>,
        block: Duration,
    ) -> StoreResult<Vec<StreamBatch>> {
        let blocking = cursors.iter().all(|(_, c)| matches!(c, GroupCursor::New));
        let deadline = Instant::now() + block;
        loop {
            let batches: StoreResult<Vec<StreamBatch>> = {
                let mut state = self.shared.state.lock();
                cursors
                    .iter()
                    .map(|(name, cursor)| {
                        let s = state.streams.get_mut(name).ok_or_else(|| {
                            StoreError::NoSuchGroup {
                                stream: name.clone(),
                                group: group.to_string(),
                            }
                        })?;
                        let g_cursor = {
                            let g = s.groups.get(group).ok_or_else(|| StoreError::NoSuchGroup {
                                stream: name.clone(),
                                group: group.to_string(),
                            })?;
                            g.cursor
                        };
                        let entries = match cursor {
                            GroupCursor::New => {
                                let entries = s.entries_after(g_cursor, count);
                                let now = Instant::now();
                                let g = s.groups.get_mut(group).ok_or_else(|| {
                                    StoreError::NoSuchGroup {
                                        stream: name.clone(),
                                        group: group.to_string(),
                                    }
                                })?;
                                for e in &entries {
                                    g.cursor = g.cursor.max(e.id);
                                    g.pel.insert(
                                        e.id,
                                        PelRow {
                                            consumer: consumer.to_string(),
                                            delivered_at: now,
                                            delivery_count: 1,
                                        },
                                    );
                                }
                                entries
                            }
                            GroupCursor::Pending(from) => {
                                let g = s.groups.get(group).ok_or_else(|| {
                                    StoreError::NoSuchGroup {
                                        stream: name.clone(),
                                        group: group.to_string(),
                                    }
                                })?;
                                let ids: Vec<EntryId> = g
                                    .pel
                                    .range(*from..)
                                    .filter(|(_, row)| row.consumer == consumer)
                                    .map(|(id, _)| *id)
                                    .collect();
                                ids.iter().filter_map(|id| s.entry(*id).cloned()).collect()
                            }
                        };
                        Ok(StreamBatch::new(name.clone(), entries))
                    })
                    .collect()
            };
            let batches = batches?;
            if !blocking || batches.iter().any(|b| !b.is_empty()) {
                return Ok(batches);
            }
            if !self.wait_for_data(deadline).await {
                return Ok(batches);
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> StoreResult<u64> {
        let mut state = self.shared.state.lock();
        let g = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
            .ok_or_else(|| StoreError::NoSuchGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;
        let mut removed = 0;
        for id in ids {
            if g.pel.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn pending_owned(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> StoreResult<Vec<EntryId>> {
        let state = self.shared.state.lock();
        let g = state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| StoreError::NoSuchGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;
        Ok(g.pel
            .iter()
            .filter(|(_, row)| row.consumer == consumer)
            .map(|(id, _)| *id)
            .take(count)
            .collect())
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        claimant: &str,
        ids: &[EntryId],
        min_idle: Duration,
    ) -> StoreResult<Vec<Entry>> {
        let mut state = self.shared.state.lock();
        let s = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| StoreError::NoSuchGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;
        if !s.groups.contains_key(group) {
            return Err(StoreError::NoSuchGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            });
        }
        let now = Instant::now();
        let mut claimed = Vec::new();
        let mut vanished = Vec::new();
        for id in ids {
            let entry = s.entry(*id).cloned();
            let Some(g) = s.groups.get_mut(group) else {
                break;
            };
            let Some(row) = g.pel.get_mut(id) else {
                continue; // acked or claimed away in the meantime
            };
            if now.duration_since(row.delivered_at) < min_idle {
                continue;
            }
            match entry {
                Some(entry) => {
                    row.consumer = claimant.to_string();
                    row.delivered_at = now;
                    row.delivery_count += 1;
                    claimed.push(entry);
                }
                // Entry trimmed away: the PEL row is dropped, as a real
                // store does for claims on deleted entries.
                None => vanished.push(*id),
            }
        }
        if let Some(g) = s.groups.get_mut(group) {
            for id in vanished {
                g.pel.remove(&id);
            }
        }
        Ok(claimed)
    }

    async fn pending_summary(
        &self,
        stream: &str,
        group: &str,
    ) -> StoreResult<HashMap<String, u64>> {
        let state = self.shared.state.lock();
        let g = state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| StoreError::NoSuchGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;
        let mut summary: HashMap<String, u64> = HashMap::new();
        for row in g.pel.values() {
            *summary.entry(row.consumer.clone()).or_default() += 1;
        }
        Ok(summary)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<u64> {
        let channels = self.shared.channels.lock();
        match channels.get(channel) {
            Some(tx) => Ok(tx.send(payload.to_string()).map_or(0, |n| n as u64)),
            None => Ok(0),
        }
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<broadcast::Receiver<String>> {
        let mut channels = self.shared.channels.lock();
        let tx = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(tx.subscribe())
    }

    async fn append(
        &self,
        stream: &str,
        fields: HashMap<String, String>,
        maxlen: Option<usize>,
    ) -> StoreResult<EntryId> {
        let id = {
            let mut state = self.shared.state.lock();
            let s = state.streams.entry(stream.to_string()).or_default();
            let id = Self::next_id(s);
            s.entries.push_back(Entry::new(id, fields));
            if let Some(maxlen) = maxlen {
                while s.entries.len() > maxlen {
                    s.entries.pop_front();
                }
            }
            id
        };
        self.shared.data_ready.notify_waiters();
        Ok(id)
    }

    async fn push_list(&self, key: &str, value: &str, end: ListEnd) -> StoreResult<u64> {
        let len = {
            let mut state = self.shared.state.lock();
            let list = state.lists.entry(key.to_string()).or_default();
            match end {
                ListEnd::Head => list.push_front(value.to_string()),
                ListEnd::Tail => list.push_back(value.to_string()),
            }
            list.len() as u64
        };
        self.shared.data_ready.notify_waiters();
        Ok(len)
    }

    async fn pop_list(
        &self,
        keys: &[String],
        end: ListEnd,
        timeout: Duration,
    ) -> StoreResult<Option<(String, String)>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.shared.state.lock();
                for key in keys {
                    if let Some(list) = state.lists.get_mut(key) {
                        let value = match end {
                            ListEnd::Head => list.pop_front(),
                            ListEnd::Tail => list.pop_back(),
                        };
                        if let Some(value) = value {
                            return Ok(Some((key.clone(), value)));
                        }
                    }
                }
            }
            if !self.wait_for_data(deadline).await {
                return Ok(None);
            }
        }
    }
}
