use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Snapshot, Version,
    store::{EventStore, EventStream, StreamAppend, validate_batches},
};

#[derive(Default)]
struct Log {
    events: Vec<EventEnvelope>,
    heads: HashMap<AggregateId, Version>,
}

impl Log {
    fn head(&self, aggregate_id: AggregateId) -> Version {
        self.heads
            .get(&aggregate_id)
            .copied()
            .unwrap_or(Version::initial())
    }
}

/// In-memory event store.
///
/// Holds the whole log behind one lock, so a multi-stream append checks every
/// batch and writes them under the same guard. Used by the default server
/// configuration and by tests.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    log: Arc<RwLock<Log>>,
    snapshots: Arc<RwLock<HashMap<AggregateId, Snapshot>>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.log.read().await.events.len()
    }

    /// Clears all events and snapshots.
    pub async fn clear(&self) {
        let mut log = self.log.write().await;
        log.events.clear();
        log.heads.clear();
        self.snapshots.write().await.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_streams(&self, batches: Vec<StreamAppend>) -> Result<Vec<Version>> {
        validate_batches(&batches)?;

        let mut log = self.log.write().await;

        for batch in &batches {
            let first = &batch.events[0];
            let aggregate_id = first.aggregate_id;
            let current = log.head(aggregate_id);

            if let Some(expected) = batch.options.expected_version
                && current != expected
            {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected,
                    actual: current,
                });
            }

            // Mirrors the unique (aggregate_id, version) constraint.
            if first.version != current.next() {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected: batch.options.expected_version.unwrap_or(current),
                    actual: current,
                });
            }
        }

        let appended: usize = batches.iter().map(|b| b.events.len()).sum();
        let mut versions = Vec::with_capacity(batches.len());
        for batch in batches {
            let aggregate_id = batch.events[0].aggregate_id;
            let last = batch
                .events
                .last()
                .map(|e| e.version)
                .unwrap_or(Version::initial());
            log.heads.insert(aggregate_id, last);
            for mut event in batch.events {
                event.position = Some(log.events.len() as u64 + 1);
                log.events.push(event);
            }
            versions.push(last);
        }

        metrics::counter!("events_appended_total").increment(appended as u64);
        tracing::debug!(streams = versions.len(), events = appended, "events appended");
        Ok(versions)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        self.get_events_for_aggregate_from_version(aggregate_id, Version::initial())
            .await
    }

    async fn get_events_for_aggregate_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        let mut events: Vec<_> = log
            .events
            .iter()
            .filter(|e| e.aggregate_id == aggregate_id && e.version >= from_version)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        let log = self.log.read().await;
        Ok(log
            .events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn stream_events_after(&self, position: u64) -> Result<EventStream> {
        use futures_util::stream;

        // Positions are 1-based indexes into the log.
        let log = self.log.read().await;
        let skip = usize::try_from(position).unwrap_or(usize::MAX);
        let events: Vec<_> = log.events.iter().skip(skip).cloned().collect();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        Ok(self.log.read().await.heads.get(&aggregate_id).copied())
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<()> {
        let mut snapshots = self.snapshots.write().await;
        match snapshots.get(&snapshot.aggregate_id) {
            Some(existing) if !snapshot.supersedes(existing) => {}
            _ => {
                snapshots.insert(snapshot.aggregate_id, snapshot);
            }
        }
        Ok(())
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(&aggregate_id).cloned())
    }
}
