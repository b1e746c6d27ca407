//! Source connectors.
//!
//! [`GroupSource`] is the durable consumer-group source. [`StreamSource`]
//! and [`ListSource`] are degenerate modes sharing the same emission
//! mechanism without PEL/claim semantics.

mod group;
mod lists;
mod streams;

use std::fmt;

use tokio::sync::mpsc;
use tributary_store::StreamBatch;

pub use group::GroupSource;
pub use lists::{ListItem, ListSource, ListSourceConfig};
pub use streams::{StreamSource, StreamSourceConfig};

use crate::ack::{AckRequest, AckToken, Delivery, Record};
use crate::error::{SourceError, SourceResult};

/// Lifecycle state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Constructed, not started.
    Created,
    /// Emitting the consumer's own pending entries from before a restart.
    Replaying,
    /// Reading and emitting new entries.
    Polling,
    /// Stopped cleanly.
    Stopped,
    /// Terminated by a fatal store error.
    Failed,
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Replaying => "replaying",
            Self::Polling => "polling",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Emits every entry of every batch downstream, individually.
///
/// Entries are never emitted as a batch: each gets its own [`Delivery`]
/// and its own completion marker, so downstream batching or splitting of
/// one entry can never block acknowledgment of an unrelated sibling read
/// in the same call. Returns the number of records emitted.
///
/// # Errors
///
/// [`SourceError::Downstream`] when the receiving side is gone.
pub(crate) async fn emit_batches(
    tx: &mpsc::Sender<Delivery>,
    batches: Vec<StreamBatch>,
    ack_tx: Option<&mpsc::UnboundedSender<AckRequest>>,
) -> SourceResult<usize> {
    let mut emitted = 0;
    for batch in batches {
        for entry in batch.entries {
            let ack = ack_tx.map(|tx| AckToken::new(batch.stream.clone(), entry.id, tx.clone()));
            let delivery = Delivery {
                record: Record {
                    stream: batch.stream.clone(),
                    id: entry.id,
                    fields: entry.fields,
                },
                ack,
            };
            tx.send(delivery).await.map_err(|_| SourceError::Downstream)?;
            emitted += 1;
        }
    }
    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tributary_store::{Entry, EntryId};

    fn batch(stream: &str, n: u64) -> StreamBatch {
        let entries = (0..n)
            .map(|i| Entry::new(EntryId::new(i + 1, 0), HashMap::new()))
            .collect();
        StreamBatch::new(stream, entries)
    }

    #[tokio::test]
    async fn emits_entries_individually_with_own_tokens() {
        let (tx, mut rx) = mpsc::channel(16);
        let (ack_tx, _ack_rx) = mpsc::unbounded_channel();

        let n = emit_batches(&tx, vec![batch("a", 2), batch("b", 1)], Some(&ack_tx))
            .await
            .unwrap();
        assert_eq!(n, 3);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.record.stream, "a");
        assert_eq!(second.record.stream, "a");
        // Sibling entries do not share a completion marker.
        assert_eq!(first.ack.unwrap().outstanding(), 1);
        assert_eq!(second.ack.unwrap().outstanding(), 1);

        let third = rx.recv().await.unwrap();
        assert_eq!(third.record.stream, "b");
    }

    #[tokio::test]
    async fn no_ack_channel_means_no_tokens() {
        let (tx, mut rx) = mpsc::channel(16);
        emit_batches(&tx, vec![batch("a", 1)], None).await.unwrap();
        assert!(rx.recv().await.unwrap().ack.is_none());
    }

    #[tokio::test]
    async fn closed_downstream_is_an_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = emit_batches(&tx, vec![batch("a", 1)], None)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Downstream));
    }
}
