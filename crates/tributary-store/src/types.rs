//! Data model shared between the store and its consumers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of one entry within a stream.
///
/// Ids are totally ordered and monotonically increasing per stream:
/// a millisecond timestamp plus a sequence number disambiguating entries
/// appended within the same millisecond. Rendered as `"<ms>-<seq>"`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId {
    /// Millisecond component.
    pub ms: u64,
    /// Sequence component within the millisecond.
    pub seq: u64,
}

impl EntryId {
    /// The smallest possible id (`0-0`).
    pub const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    /// Creates an id from its components.
    #[must_use]
    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// The id immediately following this one in total order.
    #[must_use]
    pub fn next(self) -> Self {
        match self.seq.checked_add(1) {
            Some(seq) => Self { ms: self.ms, seq },
            None => Self {
                ms: self.ms + 1,
                seq: 0,
            },
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = ParseEntryIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            // A bare millisecond part means sequence 0.
            None => (s, "0"),
        };
        let ms = ms.parse().map_err(|_| ParseEntryIdError(s.to_string()))?;
        let seq = seq.parse().map_err(|_| ParseEntryIdError(s.to_string()))?;
        Ok(Self { ms, seq })
    }
}

/// Error parsing an [`EntryId`] from its `"<ms>-<seq>"` form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid entry id: '{0}'")]
pub struct ParseEntryIdError(pub String);

/// One stream entry: an id plus a flat field map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Entry id, unique and monotonic within its stream.
    pub id: EntryId,
    /// Field names to values.
    pub fields: HashMap<String, String>,
}

impl Entry {
    /// Creates an entry.
    #[must_use]
    pub fn new(id: EntryId, fields: HashMap<String, String>) -> Self {
        Self { id, fields }
    }
}

/// Entries read from one stream, in id order.
///
/// Reads and claims both return this shape so downstream handling is
/// uniform regardless of how an entry reached the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamBatch {
    /// Stream name.
    pub stream: String,
    /// Entries in ascending id order. May be empty.
    pub entries: Vec<Entry>,
}

impl StreamBatch {
    /// Creates a batch.
    #[must_use]
    pub fn new(stream: impl Into<String>, entries: Vec<Entry>) -> Self {
        Self {
            stream: stream.into(),
            entries,
        }
    }

    /// Whether the batch holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where in a stream a cursor starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartId {
    /// From the first entry in the stream (`0`).
    Beginning,
    /// Only entries appended after now (`$`).
    New,
    /// After a specific id.
    After(EntryId),
}

impl fmt::Display for StartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Beginning => f.write_str("0"),
            Self::New => f.write_str("$"),
            Self::After(id) => write!(f, "{id}"),
        }
    }
}

/// Which end of a list an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListEnd {
    /// The head of the list.
    Head,
    /// The tail of the list.
    Tail,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_ordering() {
        let a = EntryId::new(1, 0);
        let b = EntryId::new(1, 1);
        let c = EntryId::new(2, 0);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(EntryId::ZERO, EntryId::new(0, 0));
        assert_eq!(EntryId::default(), EntryId::ZERO);
    }

    #[test]
    fn entry_id_next() {
        assert_eq!(EntryId::new(5, 2).next(), EntryId::new(5, 3));
        assert_eq!(EntryId::new(5, u64::MAX).next(), EntryId::new(6, 0));
    }

    #[test]
    fn entry_id_roundtrip() {
        let id: EntryId = "1526919030474-55".parse().unwrap();
        assert_eq!(id, EntryId::new(1_526_919_030_474, 55));
        assert_eq!(id.to_string(), "1526919030474-55");
    }

    #[test]
    fn entry_id_bare_millis() {
        let id: EntryId = "42".parse().unwrap();
        assert_eq!(id, EntryId::new(42, 0));
    }

    #[test]
    fn entry_id_parse_rejects_garbage() {
        assert!("".parse::<EntryId>().is_err());
        assert!("abc-0".parse::<EntryId>().is_err());
        assert!("1-2-3".parse::<EntryId>().is_err());
    }

    #[test]
    fn start_id_display() {
        assert_eq!(StartId::Beginning.to_string(), "0");
        assert_eq!(StartId::New.to_string(), "$");
        assert_eq!(StartId::After(EntryId::new(7, 1)).to_string(), "7-1");
    }
}
