//! The projection contract and catch-up checkpoints.

use async_trait::async_trait;
use event_store::EventEnvelope;

use crate::Result;

/// The last global log position a projection has accounted for.
///
/// Events of foreign aggregate types count too: the processor moves a
/// projection's checkpoint past them without handing them over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Checkpoint(u64);

impl Checkpoint {
    pub const START: Checkpoint = Checkpoint(0);

    /// Checkpoint just past the event stored at log `position`.
    pub fn after(position: u64) -> Self {
        Self(position)
    }

    pub fn position(self) -> u64 {
        self.0
    }

    /// True if the event at log `position` is already accounted for.
    pub fn covers(self, position: u64) -> bool {
        position <= self.0
    }
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "checkpoint {}", self.0)
    }
}

/// A read model folded from the streams of one aggregate type.
#[async_trait]
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Aggregate type whose events this projection folds, e.g. `"Order"`.
    fn source(&self) -> &'static str;

    /// Folds one event of a `source` stream into the read model.
    async fn apply(&self, event: &EventEnvelope) -> Result<()>;

    async fn checkpoint(&self) -> Checkpoint;

    async fn save_checkpoint(&self, checkpoint: Checkpoint);

    /// Drops every row and rewinds to [`Checkpoint::START`].
    async fn reset(&self) -> Result<()>;
}
