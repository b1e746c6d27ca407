//! # Tributary Store
//!
//! The command surface Tributary requires from an append-log stream store,
//! plus an in-process implementation.
//!
//! The store exposes named append-only streams of `(id, fields)` entries,
//! group-scoped delivery cursors with a per-entry pending-ownership table
//! (PEL), a broadcast pub/sub primitive, and volatile lists. Consumers in
//! [`tributary-connectors`](https://docs.rs/tributary-connectors) speak to
//! the store exclusively through the [`StoreClient`] trait; the wire
//! protocol and on-disk representation of a networked store live behind
//! that seam.
//!
//! [`MemoryStore`] implements the full surface in process. It backs the
//! integration test suites and embedded deployments that don't need a
//! separate store server.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use client::{GroupCursor, StoreClient};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use types::{Entry, EntryId, ListEnd, StartId, StreamBatch};
