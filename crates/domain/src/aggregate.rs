//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A fact recorded on a stream.
///
/// Events are named in past tense and never change once written.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Name stored alongside the payload.
    fn event_type(&self) -> &'static str;
}

/// A record rebuilt by replaying its events.
///
/// Command methods on an aggregate inspect the current state and return the
/// events a change would produce; [`apply`](Aggregate::apply) folds an event
/// into the state and must not fail.
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors its command methods return.
    type Error: std::error::Error + Send + Sync;

    /// Stream kind recorded with every event.
    fn aggregate_type() -> &'static str;

    /// Returns None for a record that was never created.
    fn id(&self) -> Option<AggregateId>;

    /// Revision the state was rebuilt at. Zero for a new record.
    fn version(&self) -> Version;

    /// Called by the command handler after loading events.
    fn set_version(&mut self, version: Version);

    /// Folds one event into the state. Must be deterministic.
    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

/// Aggregates whose state is periodically captured to shorten replays.
pub trait SnapshotCapable: Aggregate + Serialize + DeserializeOwned {
    /// Number of events between snapshots.
    fn snapshot_interval() -> usize {
        100
    }

    fn should_snapshot(&self) -> bool {
        self.version().as_i64() > 0
            && (self.version().as_i64() as usize).is_multiple_of(Self::snapshot_interval())
    }
}
