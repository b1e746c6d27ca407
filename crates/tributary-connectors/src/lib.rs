//! # Tributary Connectors
//!
//! Sources and sinks for append-log stream stores, built for durable,
//! fault-tolerant, at-least-once consumption by a pool of independent
//! stateless workers.
//!
//! The centerpiece is [`GroupSource`](source::GroupSource): a consumer-group
//! source that replays its own unacknowledged entries on startup, polls for
//! new entries, emits each record downstream with a deferred
//! [acknowledgment token](ack::AckToken), and, when heartbeating is
//! enabled, reclaims pending entries from group peers that stop
//! responding.
//!
//! Two degenerate sources share the emission mechanism without the delivery
//! guarantee: [`StreamSource`](source::StreamSource) (plain stream reads,
//! no group, no acks) and [`ListSource`](source::ListSource) (volatile
//! blocking list pops, at-most-once).

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod ack;
pub mod config;
pub mod consumer;
pub mod error;
pub mod heart;
pub mod metrics;
pub mod sink;
pub mod source;

pub use ack::{AckToken, Delivery, Record};
pub use config::{GroupSourceConfig, StreamSet, StreamSpec};
pub use consumer::{GroupConsumer, StreamConsumer};
pub use error::{SourceError, SourceResult};
pub use heart::{DeadPeer, Heart, HeartConfig};
pub use source::{GroupSource, ListSource, SourceState, StreamSource};
