//! Domain error types.

use event_store::EventStoreError;
use thiserror::Error;

use crate::chat::ChatError;
use crate::order::OrderError;
use crate::user::UserError;

/// Caller-facing category of a failure.
///
/// Every domain error maps onto exactly one kind; adapters translate the kind
/// into a transport status once instead of matching on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing input.
    Validation,
    /// Missing, invalid or revoked session, or a credential mismatch.
    Auth,
    /// Record absent, or the actor may not see it.
    NotFound,
    /// A state precondition does not hold.
    Conflict,
    /// Anything the caller cannot fix.
    Internal,
}

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    User(#[from] UserError),

    #[error(transparent)]
    Chat(#[from] ChatError),

    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Order(e) => e.kind(),
            DomainError::User(e) => e.kind(),
            DomainError::Chat(e) => e.kind(),
            DomainError::EventStore(e) if e.is_conflict() => ErrorKind::Conflict,
            DomainError::EventStore(_) | DomainError::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show to the caller.
    ///
    /// Internal failures collapse to a generic text; the detailed error is
    /// meant for logs only.
    pub fn public_message(&self) -> String {
        match self {
            DomainError::EventStore(e) if e.is_conflict() => {
                "The record was modified concurrently, please retry".to_string()
            }
            DomainError::EventStore(_) | DomainError::Serialization(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// True if this is a lost optimistic-concurrency race.
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, DomainError::EventStore(e) if e.is_conflict())
    }
}
