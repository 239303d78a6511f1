use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version};

/// Revision check applied when appending to a stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendOptions {
    /// Revision the writer decided against. `None` skips the check.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no revision check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Expects the stream to be at exactly `version`.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Expects the stream not to exist yet.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }

    /// Expects `version`, treating [`Version::initial`] as "must be new".
    pub fn expect_current(version: Version) -> Self {
        if version == Version::initial() {
            Self::expect_new()
        } else {
            Self::expect_version(version)
        }
    }
}

/// Events destined for one stream within a multi-stream append.
#[derive(Debug, Clone)]
pub struct StreamAppend {
    pub events: Vec<EventEnvelope>,
    pub options: AppendOptions,
}

impl StreamAppend {
    pub fn new(events: Vec<EventEnvelope>, options: AppendOptions) -> Self {
        Self { events, options }
    }

    /// The stream targeted by this batch, if it is non-empty.
    pub fn aggregate_id(&self) -> Option<AggregateId> {
        self.events.first().map(|e| e.aggregate_id)
    }
}

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Persistence contract for versioned event streams.
///
/// Implementations must be thread-safe and must apply each call to
/// [`append_streams`](EventStore::append_streams) atomically: either every
/// batch is written or none is.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends several batches, each to its own stream, in one atomic step.
    ///
    /// Every batch's expected revision is checked before anything is written.
    /// Returns the new revision of each stream, in batch order.
    async fn append_streams(&self, batches: Vec<StreamAppend>) -> Result<Vec<Version>>;

    /// Appends events to a single stream.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        self.append_streams(vec![StreamAppend::new(events, options)])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EventStoreError::InvalidAppend("no revision returned".to_string()))
    }

    /// Retrieves all events of a stream in revision order.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Retrieves events of a stream starting at `from_version` (inclusive).
    async fn get_events_for_aggregate_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>>;

    /// Retrieves every event of one type, in log order.
    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>>;

    /// Streams the events stored past log `position`, in log order.
    ///
    /// Every yielded envelope carries its `position`. An event never becomes
    /// visible behind one that has already been read.
    async fn stream_events_after(&self, position: u64) -> Result<EventStream>;

    /// Streams the whole log.
    async fn stream_all_events(&self) -> Result<EventStream> {
        self.stream_events_after(0).await
    }

    /// Current revision of a stream, or None if it has no events.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Saves a snapshot, replacing any previous one for the stream.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()>;

    /// Latest snapshot of a stream, if any.
    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>>;
}

/// Convenience methods available on every [`EventStore`].
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Checks if a stream has any events.
    async fn aggregate_exists(&self, aggregate_id: AggregateId) -> Result<bool> {
        Ok(self.get_aggregate_version(aggregate_id).await?.is_some())
    }

    /// Loads the latest snapshot (if any) and the events recorded after it.
    async fn load_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<(Option<Snapshot>, Vec<EventEnvelope>)> {
        if let Some(snapshot) = self.get_snapshot(aggregate_id).await? {
            let events = self
                .get_events_for_aggregate_from_version(aggregate_id, snapshot.version.next())
                .await?;
            Ok((Some(snapshot), events))
        } else {
            let events = self.get_events_for_aggregate(aggregate_id).await?;
            Ok((None, events))
        }
    }
}

impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Checks the shape of a multi-stream append before any I/O.
///
/// Each batch must be non-empty, target a single stream with sequential
/// revisions, and no two batches may target the same stream.
pub fn validate_batches(batches: &[StreamAppend]) -> Result<()> {
    if batches.is_empty() {
        return Err(EventStoreError::InvalidAppend(
            "Cannot append an empty set of streams".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for batch in batches {
        validate_events_for_append(&batch.events)?;
        let aggregate_id = batch.events[0].aggregate_id;
        if !seen.insert(aggregate_id) {
            return Err(EventStoreError::InvalidAppend(format!(
                "Stream {aggregate_id} appears in more than one batch"
            )));
        }
    }

    Ok(())
}

fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "Cannot append empty event list".to_string(),
        ));
    };

    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        if event.aggregate_id != first.aggregate_id || event.aggregate_type != first.aggregate_type
        {
            return Err(EventStoreError::InvalidAppend(
                "All events of a batch must belong to the same stream".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "Event versions must be sequential. Expected {}, got {}",
                expected_version, event.version
            )));
        }
    }

    Ok(())
}
