//! Source configuration and stream-set normalization.
//!
//! Callers can name the streams to consume as one name, an ordered
//! collection of names, or an explicit `name → start id` mapping
//! ([`StreamSpec`]). All three shapes are normalized at construction time
//! by [`StreamSet::normalize`] into one canonical ordered mapping; anything
//! malformed fails with [`SourceError::Validation`] before any store call.

use std::time::Duration;

use tributary_store::StartId;

use crate::error::{SourceError, SourceResult};

/// Default maximum time a read blocks waiting for new entries.
pub const DEFAULT_BLOCK: Duration = Duration::from_secs(5);

/// Default time after which a silent peer is considered dead.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-call claim batch size, bounding single-call latency when
/// reclaiming a peer with a very large backlog.
pub const DEFAULT_CLAIM_BATCH: usize = 1000;

/// The streams argument accepted by source constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSpec {
    /// One stream, consumed from the default start position.
    Single(String),
    /// Several streams, each from the default start position.
    Many(Vec<String>),
    /// Streams with explicit per-stream start positions.
    WithStart(Vec<(String, StartId)>),
}

impl From<&str> for StreamSpec {
    fn from(name: &str) -> Self {
        Self::Single(name.to_string())
    }
}

impl From<String> for StreamSpec {
    fn from(name: String) -> Self {
        Self::Single(name)
    }
}

impl From<Vec<String>> for StreamSpec {
    fn from(names: Vec<String>) -> Self {
        Self::Many(names)
    }
}

impl From<Vec<&str>> for StreamSpec {
    fn from(names: Vec<&str>) -> Self {
        Self::Many(names.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<(String, StartId)>> for StreamSpec {
    fn from(pairs: Vec<(String, StartId)>) -> Self {
        Self::WithStart(pairs)
    }
}

/// Canonical ordered mapping of stream name to start position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSet {
    entries: Vec<(String, StartId)>,
}

impl StreamSet {
    /// Normalizes a [`StreamSpec`] against a default start position.
    ///
    /// # Errors
    ///
    /// [`SourceError::Validation`] on an empty set, an empty stream name,
    /// or a duplicate stream name.
    pub fn normalize(spec: impl Into<StreamSpec>, default_start: StartId) -> SourceResult<Self> {
        let entries = match spec.into() {
            StreamSpec::Single(name) => vec![(name, default_start)],
            StreamSpec::Many(names) => {
                names.into_iter().map(|n| (n, default_start)).collect()
            }
            StreamSpec::WithStart(pairs) => pairs,
        };
        if entries.is_empty() {
            return Err(SourceError::Validation("stream set is empty".into()));
        }
        for (i, (name, _)) in entries.iter().enumerate() {
            if name.is_empty() {
                return Err(SourceError::Validation("empty stream name".into()));
            }
            if entries[..i].iter().any(|(other, _)| other == name) {
                return Err(SourceError::Validation(format!(
                    "duplicate stream name: '{name}'"
                )));
            }
        }
        Ok(Self { entries })
    }

    /// Stream names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// `(name, start)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, StartId)> {
        self.entries.iter()
    }

    /// Number of streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty. Never true for a normalized set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Configuration for [`GroupSource`](crate::source::GroupSource).
#[derive(Debug, Clone)]
pub struct GroupSourceConfig {
    /// Consumer group name. The group is created idempotently on every
    /// configured stream.
    pub group: String,
    /// This consumer's name within the group. Ephemeral; a crashed process
    /// may come back under a new name and claim the old one's work.
    pub consumer: String,
    /// Maximum entries requested per stream per poll. `None` reads all
    /// available.
    pub count: Option<usize>,
    /// Maximum time one poll blocks waiting for new entries. Also bounds
    /// worst-case `stop()` latency.
    pub block: Duration,
    /// Re-read this consumer's own pending entries once at startup.
    pub replay_pending: bool,
    /// Interval between liveness broadcasts. `None` disables heartbeating,
    /// and with it dead-peer claiming. Must be non-zero when set.
    pub heartbeat_interval: Option<Duration>,
    /// Time without a heartbeat after which a peer is considered dead, and
    /// the pause between claim re-checks of a drained peer.
    pub claim_timeout: Duration,
    /// Per-call claim batch size.
    pub claim_batch: usize,
}

impl Default for GroupSourceConfig {
    fn default() -> Self {
        Self {
            group: String::new(),
            consumer: String::new(),
            count: None,
            block: DEFAULT_BLOCK,
            replay_pending: true,
            heartbeat_interval: None,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
            claim_batch: DEFAULT_CLAIM_BATCH,
        }
    }
}

impl GroupSourceConfig {
    /// Shorthand for a config with just group and consumer names set.
    #[must_use]
    pub fn new(group: impl Into<String>, consumer: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            consumer: consumer.into(),
            ..Self::default()
        }
    }

    /// Validates the parts of the config not covered by stream-set
    /// normalization.
    pub(crate) fn validate(&self) -> SourceResult<()> {
        if self.group.is_empty() {
            return Err(SourceError::Validation("group name is empty".into()));
        }
        if self.consumer.is_empty() {
            return Err(SourceError::Validation("consumer name is empty".into()));
        }
        if self.claim_batch == 0 {
            return Err(SourceError::Validation("claim_batch must be > 0".into()));
        }
        if matches!(self.heartbeat_interval, Some(d) if d.is_zero()) {
            return Err(SourceError::Validation(
                "heartbeat_interval must be > 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_store::EntryId;

    #[test]
    fn normalize_single() {
        let set = StreamSet::normalize("events", StartId::Beginning).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["events"]);
    }

    #[test]
    fn normalize_many_keeps_order() {
        let set = StreamSet::normalize(vec!["b", "a", "c"], StartId::New).unwrap();
        assert_eq!(set.names().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert!(set.iter().all(|(_, s)| *s == StartId::New));
    }

    #[test]
    fn normalize_with_start_ids() {
        let set = StreamSet::normalize(
            vec![
                ("a".to_string(), StartId::After(EntryId::new(3, 0))),
                ("b".to_string(), StartId::Beginning),
            ],
            StartId::New,
        )
        .unwrap();
        assert_eq!(set.len(), 2);
        let starts: Vec<_> = set.iter().map(|(_, s)| *s).collect();
        assert_eq!(
            starts,
            vec![StartId::After(EntryId::new(3, 0)), StartId::Beginning]
        );
    }

    #[test]
    fn normalize_rejects_empty_set() {
        let err = StreamSet::normalize(Vec::<String>::new(), StartId::Beginning).unwrap_err();
        assert!(matches!(err, SourceError::Validation(_)));
    }

    #[test]
    fn normalize_rejects_duplicates() {
        let err = StreamSet::normalize(vec!["s", "s"], StartId::Beginning).unwrap_err();
        assert!(matches!(err, SourceError::Validation(_)));
    }

    #[test]
    fn normalize_rejects_empty_name() {
        let err = StreamSet::normalize("", StartId::Beginning).unwrap_err();
        assert!(matches!(err, SourceError::Validation(_)));
    }

    #[test]
    fn group_config_validation() {
        assert!(GroupSourceConfig::new("g", "c").validate().is_ok());
        assert!(GroupSourceConfig::new("", "c").validate().is_err());
        assert!(GroupSourceConfig::new("g", "").validate().is_err());
        let mut cfg = GroupSourceConfig::new("g", "c");
        cfg.claim_batch = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn group_config_rejects_zero_heartbeat_interval() {
        let mut cfg = GroupSourceConfig::new("g", "c");
        cfg.heartbeat_interval = Some(Duration::ZERO);
        assert!(matches!(
            cfg.validate(),
            Err(SourceError::Validation(_))
        ));
        cfg.heartbeat_interval = Some(Duration::from_millis(100));
        assert!(cfg.validate().is_ok());
    }
}
