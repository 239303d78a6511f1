//! Catch-up delivery of the event log to projections.

use event_store::EventStore;
use futures_util::StreamExt;
use tokio::sync::Mutex;

use crate::projection::{Checkpoint, Projection};
use crate::{ProjectionError, Result};

/// Feeds the event log from a store to registered projections.
///
/// - Catch-up: hands each projection the events of its source aggregate type
///   it has not seen yet, moving its checkpoint past foreign events
/// - Rebuild: resets all projections and replays from scratch
///
/// Catch-up runs are serialized, so concurrent readers calling
/// [`run_catch_up`](Self::run_catch_up) never deliver an event twice.
pub struct ProjectionProcessor<S: EventStore> {
    store: S,
    projections: Vec<Box<dyn Projection>>,
    catch_up: Mutex<()>,
}

impl<S: EventStore> ProjectionProcessor<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            projections: Vec::new(),
            catch_up: Mutex::new(()),
        }
    }

    pub fn register(&mut self, projection: Box<dyn Projection>) {
        self.projections.push(projection);
    }

    pub fn projection_count(&self) -> usize {
        self.projections.len()
    }

    /// Streams the log from the oldest checkpoint and brings every
    /// projection up to its end.
    #[tracing::instrument(skip(self))]
    pub async fn run_catch_up(&self) -> Result<()> {
        let _guard = self.catch_up.lock().await;

        if self.projections.is_empty() {
            return Ok(());
        }
        let mut from = u64::MAX;
        for projection in &self.projections {
            from = from.min(projection.checkpoint().await.position());
        }

        let mut stream = self.store.stream_events_after(from).await?;
        let mut seen: u64 = 0;
        let mut applied: u64 = 0;

        while let Some(result) = stream.next().await {
            let event = result?;
            let position = event
                .position
                .ok_or_else(|| ProjectionError::Unpositioned {
                    event_type: event.event_type.clone(),
                })?;
            seen += 1;

            for projection in &self.projections {
                if projection.checkpoint().await.covers(position) {
                    continue;
                }
                if event.aggregate_type == projection.source() {
                    projection.apply(&event).await?;
                    applied += 1;
                    metrics::counter!("projections_events_processed").increment(1);
                }
                projection.save_checkpoint(Checkpoint::after(position)).await;
            }
        }

        tracing::debug!(from, seen, applied, "catch-up complete");

        Ok(())
    }

    /// Resets all projections and replays all events from the store.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_all(&self) -> Result<()> {
        for projection in &self.projections {
            tracing::info!(projection = projection.name(), "rebuilding projection");
            projection.reset().await?;
        }
        self.run_catch_up().await
    }
}
