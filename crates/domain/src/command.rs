//! Command handling infrastructure.
//!
//! A command is decided against the current revision of a stream and the
//! resulting events are appended with that revision as the expectation. When
//! another writer got there first the store reports a version conflict and the
//! command is decided again against fresh state, up to [`MAX_ATTEMPTS`] times.

use std::future::Future;
use std::marker::PhantomData;

use common::AggregateId;
use event_store::{
    AppendOptions, EventEnvelope, EventStore, EventStoreExt, Snapshot, StreamAppend, Version,
};
use serde::Serialize;

use crate::aggregate::{Aggregate, DomainEvent, SnapshotCapable};
use crate::error::DomainError;

/// How many times a command is decided before a version conflict is reported.
pub const MAX_ATTEMPTS: usize = 3;

/// Result of command execution.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate> {
    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The new version of the aggregate after the command.
    pub new_version: Version,
}

/// An intention aimed at one aggregate.
pub trait Command: Send + Sync {
    type Aggregate: Aggregate;

    fn aggregate_id(&self) -> AggregateId;
}

/// Runs `attempt` again while it fails with a version conflict.
///
/// Gives up after [`MAX_ATTEMPTS`] tries and returns the last conflict.
pub async fn retry_on_conflict<T, F, Fut>(mut attempt: F) -> Result<T, DomainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Err(e) if e.is_version_conflict() => {
                metrics::counter!("command_conflicts_total").increment(1);
                if tries >= MAX_ATTEMPTS {
                    tracing::warn!(attempts = tries, error = %e, "giving up after version conflicts");
                    return Err(e);
                }
                tracing::debug!(attempt = tries, "version conflict, deciding again");
            }
            other => return other,
        }
    }
}

/// Loads aggregates and persists the events commands produce.
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _phantom: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate from the event store.
    ///
    /// If the aggregate doesn't exist, returns a default instance.
    pub async fn load(&self, aggregate_id: AggregateId) -> Result<A, DomainError>
    where
        A: for<'de> serde::Deserialize<'de>,
        A::Event: for<'de> serde::Deserialize<'de>,
    {
        let (snapshot, events) = self.store.load_aggregate(aggregate_id).await?;

        let mut aggregate = if let Some(snapshot) = snapshot {
            self.restore_from_snapshot(snapshot)?
        } else {
            A::default()
        };

        for envelope in events {
            let event: A::Event = serde_json::from_value(envelope.payload)?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it doesn't exist.
    pub async fn load_existing(&self, aggregate_id: AggregateId) -> Result<Option<A>, DomainError>
    where
        A: for<'de> serde::Deserialize<'de>,
        A::Event: for<'de> serde::Deserialize<'de>,
    {
        let aggregate = self.load(aggregate_id).await?;
        if aggregate.id().is_some() {
            Ok(Some(aggregate))
        } else {
            Ok(None)
        }
    }

    /// Decides a command against the current state and persists its events.
    ///
    /// `command_fn` may run more than once: it is called again with fresh
    /// state whenever the append loses a race. Returning no events leaves the
    /// stream untouched.
    pub async fn execute<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        A: for<'de> serde::Deserialize<'de>,
        A::Event: for<'de> serde::Deserialize<'de> + Serialize,
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error> + Send + Sync,
        DomainError: From<A::Error>,
    {
        retry_on_conflict(|| self.execute_once(aggregate_id, &command_fn)).await
    }

    async fn execute_once<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: &F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        A: for<'de> serde::Deserialize<'de>,
        A::Event: for<'de> serde::Deserialize<'de> + Serialize,
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error> + Send + Sync,
        DomainError: From<A::Error>,
    {
        let mut aggregate = self.load(aggregate_id).await?;
        let current_version = aggregate.version();

        let events = command_fn(&aggregate)?;

        if events.is_empty() {
            return Ok(CommandResult {
                aggregate,
                events: vec![],
                new_version: current_version,
            });
        }

        let batch = self.stage(aggregate_id, current_version, &events)?;
        let new_version = self.store.append(batch.events, batch.options).await?;

        aggregate.apply_events(events.iter().cloned());
        aggregate.set_version(new_version);

        Ok(CommandResult {
            aggregate,
            events,
            new_version,
        })
    }

    /// Wraps decided events for a multi-stream append.
    ///
    /// The batch expects the stream to still be at `current_version`.
    pub fn stage(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<StreamAppend, DomainError>
    where
        A::Event: Serialize,
    {
        let envelopes = self.build_envelopes(aggregate_id, current_version, events)?;
        Ok(StreamAppend::new(
            envelopes,
            AppendOptions::expect_current(current_version),
        ))
    }

    fn build_envelopes(
        &self,
        aggregate_id: AggregateId,
        current_version: Version,
        events: &[A::Event],
    ) -> Result<Vec<EventEnvelope>, DomainError>
    where
        A::Event: Serialize,
    {
        let mut envelopes = Vec::with_capacity(events.len());
        let mut version = current_version;

        for event in events {
            version = version.next();
            let envelope = EventEnvelope::builder()
                .aggregate_id(aggregate_id)
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .version(version)
                .payload(event)?
                .build()?;
            envelopes.push(envelope);
        }

        Ok(envelopes)
    }

    fn restore_from_snapshot(&self, snapshot: Snapshot) -> Result<A, DomainError>
    where
        A: for<'de> serde::Deserialize<'de>,
    {
        let version = snapshot.version;
        let mut aggregate: A = snapshot.into_state()?;
        aggregate.set_version(version);
        Ok(aggregate)
    }
}

/// Decisions on several streams, committed in one atomic append.
///
/// Each stream is staged at the revision its decision was made against, so the
/// commit fails as a whole if any of them moved in the meantime.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    batches: Vec<StreamAppend>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages `events` for `aggregate`'s stream. Empty decisions are skipped.
    pub fn stage<S, A>(
        &mut self,
        handler: &CommandHandler<S, A>,
        aggregate_id: AggregateId,
        aggregate: &A,
        events: &[A::Event],
    ) -> Result<(), DomainError>
    where
        S: EventStore,
        A: Aggregate,
    {
        if events.is_empty() {
            return Ok(());
        }
        self.batches
            .push(handler.stage(aggregate_id, aggregate.version(), events)?);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Appends every staged batch, all or nothing.
    pub async fn commit<S: EventStore>(self, store: &S) -> Result<(), DomainError> {
        if self.batches.is_empty() {
            return Ok(());
        }
        store.append_streams(self.batches).await?;
        Ok(())
    }
}

/// Folds committed events into `aggregate` and moves it to the new revision.
pub fn apply_committed<A: Aggregate>(aggregate: &mut A, events: Vec<A::Event>) {
    let version = Version::new(aggregate.version().as_i64() + events.len() as i64);
    aggregate.apply_events(events);
    aggregate.set_version(version);
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: SnapshotCapable,
{
    /// Executes a command and captures a snapshot when the interval is hit.
    pub async fn execute_with_snapshot<F>(
        &self,
        aggregate_id: AggregateId,
        command_fn: F,
    ) -> Result<CommandResult<A>, DomainError>
    where
        A: for<'de> serde::Deserialize<'de>,
        A::Event: for<'de> serde::Deserialize<'de> + Serialize,
        F: Fn(&A) -> Result<Vec<A::Event>, A::Error> + Send + Sync,
        DomainError: From<A::Error>,
    {
        let result = self.execute(aggregate_id, command_fn).await?;

        if !result.events.is_empty() {
            self.snapshot_if_due(aggregate_id, &result.aggregate).await?;
        }

        Ok(result)
    }

    /// Saves a snapshot of `aggregate` when its revision hits the interval.
    ///
    /// Used after multi-stream commits, which bypass [`execute_with_snapshot`](Self::execute_with_snapshot).
    pub async fn snapshot_if_due(
        &self,
        aggregate_id: AggregateId,
        aggregate: &A,
    ) -> Result<(), DomainError> {
        if aggregate.should_snapshot() {
            let snapshot = Snapshot::from_state(
                aggregate_id,
                A::aggregate_type(),
                aggregate.version(),
                aggregate,
            )?;
            self.store.save_snapshot(snapshot).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use event_store::{EventStoreError, InMemoryEventStore};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum CounterEvent {
        Opened { id: AggregateId },
        Bumped,
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                CounterEvent::Opened { .. } => "CounterOpened",
                CounterEvent::Bumped => "CounterBumped",
            }
        }
    }

    #[derive(Debug, Default, Clone, Serialize, Deserialize)]
    struct Counter {
        id: Option<AggregateId>,
        count: u32,
        #[serde(default)]
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("counter is closed")]
    struct CounterClosed;

    impl From<CounterClosed> for DomainError {
        fn from(_: CounterClosed) -> Self {
            DomainError::EventStore(EventStoreError::InvalidAppend("closed".into()))
        }
    }

    impl Aggregate for Counter {
        type Event = CounterEvent;
        type Error = CounterClosed;

        fn aggregate_type() -> &'static str {
            "Counter"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                CounterEvent::Opened { id } => self.id = Some(id),
                CounterEvent::Bumped => self.count += 1,
            }
        }
    }

    impl SnapshotCapable for Counter {
        fn snapshot_interval() -> usize {
            3
        }
    }

    fn conflict() -> DomainError {
        DomainError::EventStore(EventStoreError::ConcurrencyConflict {
            aggregate_id: AggregateId::new(),
            expected: Version::new(1),
            actual: Version::new(2),
        })
    }

    #[tokio::test]
    async fn execute_creates_and_updates() {
        let handler: CommandHandler<_, Counter> = CommandHandler::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        let created = handler
            .execute(id, |_| Ok(vec![CounterEvent::Opened { id }]))
            .await
            .unwrap();
        assert_eq!(created.new_version, Version::first());

        let bumped = handler
            .execute(id, |_| Ok(vec![CounterEvent::Bumped, CounterEvent::Bumped]))
            .await
            .unwrap();
        assert_eq!(bumped.new_version, Version::new(3));
        assert_eq!(bumped.aggregate.count, 2);
    }

    #[tokio::test]
    async fn empty_decision_does_not_write() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Counter> = CommandHandler::new(store.clone());

        let result = handler
            .execute(AggregateId::new(), |_| Ok(vec![]))
            .await
            .unwrap();

        assert!(result.events.is_empty());
        assert_eq!(result.new_version, Version::initial());
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn load_existing_distinguishes_missing_records() {
        let handler: CommandHandler<_, Counter> = CommandHandler::new(InMemoryEventStore::new());
        let id = AggregateId::new();
        assert!(handler.load_existing(id).await.unwrap().is_none());

        handler
            .execute(id, |_| Ok(vec![CounterEvent::Opened { id }]))
            .await
            .unwrap();
        assert!(handler.load_existing(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn retry_stops_after_max_attempts() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = retry_on_conflict(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(conflict()) }
        })
        .await;

        assert!(result.unwrap_err().is_version_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let calls = AtomicUsize::new(0);
        let result = retry_on_conflict(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n == 0 { Err(conflict()) } else { Ok(n) } }
        })
        .await;

        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn unit_of_work_commits_every_stream_or_none() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Counter> = CommandHandler::new(store.clone());
        let (a, b) = (AggregateId::new(), AggregateId::new());

        handler
            .execute(b, |_| Ok(vec![CounterEvent::Opened { id: b }]))
            .await
            .unwrap();

        // b is staged as if it were still new, so the whole commit is refused
        let mut stale = UnitOfWork::new();
        let fresh = Counter::default();
        stale
            .stage(&handler, a, &fresh, &[CounterEvent::Opened { id: a }])
            .unwrap();
        stale
            .stage(&handler, b, &fresh, &[CounterEvent::Bumped])
            .unwrap();
        let err = stale.commit(&store).await.unwrap_err();
        assert!(err.is_version_conflict());
        assert!(handler.load_existing(a).await.unwrap().is_none());

        let mut work = UnitOfWork::new();
        let mut counter_b = handler.load(b).await.unwrap();
        work.stage(&handler, a, &fresh, &[CounterEvent::Opened { id: a }])
            .unwrap();
        work.stage(&handler, b, &counter_b, &[CounterEvent::Bumped])
            .unwrap();
        work.stage(&handler, b, &counter_b, &[]).unwrap();
        work.commit(&store).await.unwrap();

        apply_committed(&mut counter_b, vec![CounterEvent::Bumped]);
        let reloaded = handler.load(b).await.unwrap();
        assert_eq!(reloaded.count, counter_b.count);
        assert_eq!(reloaded.version(), counter_b.version());
    }

    #[tokio::test]
    async fn snapshot_is_used_on_reload() {
        let store = InMemoryEventStore::new();
        let handler: CommandHandler<_, Counter> = CommandHandler::new(store.clone());
        let id = AggregateId::new();

        handler
            .execute_with_snapshot(id, |_| {
                Ok(vec![
                    CounterEvent::Opened { id },
                    CounterEvent::Bumped,
                    CounterEvent::Bumped,
                ])
            })
            .await
            .unwrap();
        assert_eq!(
            store.get_snapshot(id).await.unwrap().unwrap().version,
            Version::new(3)
        );

        handler
            .execute_with_snapshot(id, |_| Ok(vec![CounterEvent::Bumped]))
            .await
            .unwrap();

        let counter = handler.load(id).await.unwrap();
        assert_eq!(counter.count, 3);
        assert_eq!(counter.version(), Version::new(4));
    }
}
