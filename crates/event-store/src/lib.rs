//! Append-only, versioned event streams.
//!
//! Every record in the marketplace is a stream of events keyed by an
//! [`AggregateId`]. A stream's [`Version`] doubles as the record's revision:
//! writers state the revision they decided against and the store rejects the
//! write with [`EventStoreError::ConcurrencyConflict`] if another writer got
//! there first. [`EventStore::append_streams`] extends that check across
//! several streams so multi-record changes commit all-or-nothing.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod snapshot;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use snapshot::Snapshot;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream, StreamAppend};
