//! Deferred, reference-counted acknowledgment.
//!
//! Every record a [`GroupSource`](crate::source::GroupSource) emits carries
//! an [`AckToken`]. Downstream stages that fan a record out clone the token
//! once per copy; each stage calls [`AckToken::complete`] when it is done
//! with its copy. When the last copy completes, the token enqueues an ack
//! request on a typed channel and the source's ack task removes the entry
//! from the PEL.
//!
//! Counting is explicit: a token that is dropped without completing keeps
//! its entry pending, which is exactly the at-least-once recovery path. A
//! crash between read and ack leaves the entry for later replay or claim.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::trace;
use tributary_store::EntryId;

/// One record emitted downstream: which stream it came from, its id, and
/// its field map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Stream the entry was read from.
    pub stream: String,
    /// Entry id within that stream.
    pub id: EntryId,
    /// Entry fields.
    pub fields: HashMap<String, String>,
}

/// A record plus its completion marker.
///
/// `ack` is `None` for sources without delivery guarantees (plain stream
/// and list modes).
#[derive(Debug)]
pub struct Delivery {
    /// The emitted record.
    pub record: Record,
    /// Completion marker; release it once the record is fully processed.
    pub ack: Option<AckToken>,
}

/// Request sent to the ack task when a token's count reaches zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AckRequest {
    pub stream: String,
    pub id: EntryId,
}

struct AckShared {
    remaining: AtomicUsize,
    request: AckRequest,
    tx: mpsc::UnboundedSender<AckRequest>,
}

/// Reference-counted completion marker bound to one entry.
///
/// Cloning increments the outstanding count; [`complete`](Self::complete)
/// decrements it. The acknowledgment fires exactly once, when the count
/// reaches zero.
pub struct AckToken {
    shared: Arc<AckShared>,
}

impl AckToken {
    pub(crate) fn new(
        stream: String,
        id: EntryId,
        tx: mpsc::UnboundedSender<AckRequest>,
    ) -> Self {
        Self {
            shared: Arc::new(AckShared {
                remaining: AtomicUsize::new(1),
                request: AckRequest { stream, id },
                tx,
            }),
        }
    }

    /// Marks this copy of the token as done. The entry is acknowledged
    /// once every outstanding copy has completed.
    pub fn complete(self) {
        if self.shared.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            trace!(
                stream = %self.shared.request.stream,
                id = %self.shared.request.id,
                "completion count reached zero, requesting ack"
            );
            // The ack task may already be gone during shutdown; the entry
            // then simply stays pending.
            let _ = self.shared.tx.send(self.shared.request.clone());
        }
    }

    /// Outstanding copies (test and debugging aid).
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.shared.remaining.load(Ordering::Acquire)
    }
}

impl Clone for AckToken {
    fn clone(&self) -> Self {
        self.shared.remaining.fetch_add(1, Ordering::AcqRel);
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::fmt::Debug for AckToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AckToken")
            .field("stream", &self.shared.request.stream)
            .field("id", &self.shared.request.id)
            .field("remaining", &self.outstanding())
            .finish()
    }
}
