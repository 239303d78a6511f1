//! Projection error types.

use thiserror::Error;

/// Failures while folding the event log into read models.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    /// A stored payload no longer matches the event schema of its stream.
    #[error("Cannot decode {event_type} for {projection}: {source}")]
    Decode {
        projection: &'static str,
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// The store handed over an event without its log position.
    #[error("{event_type} event has no log position")]
    Unpositioned { event_type: String },
}

impl ProjectionError {
    pub(crate) fn decode(
        projection: &'static str,
        event: &event_store::EventEnvelope,
        source: serde_json::Error,
    ) -> Self {
        ProjectionError::Decode {
            projection,
            event_type: event.event_type.clone(),
            source,
        }
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;
