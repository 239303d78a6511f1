//! Integration tests for the order lifecycle.
//!
//! These run the services against the in-memory event store and cover the
//! full lifecycle, authorization, concurrent writers and the atomicity of
//! closing an order with a rating.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::{AggregateId, UserId};
use domain::user::UserEvent;
use domain::{
    Aggregate, ApplyForOrder, AssignDriver, CloseOrder, DeleteOrder, DomainError, DomainEvent,
    ErrorKind, FeedbackService, FinishOrder, IdentityService, MAX_ATTEMPTS, Order, OrderDetails,
    OrderError, OrderEvent, OrderService, OrderStatus, PlaceOrder, Registration,
};
use event_store::{
    EventEnvelope, EventStore, EventStream, InMemoryEventStore, Snapshot, StreamAppend, Version,
};

/// Services wired to one store, with a customer and two drivers registered.
struct Market<S: EventStore + Clone> {
    orders: OrderService<S>,
    feedback: FeedbackService<S>,
    identity: IdentityService<S>,
    c1: UserId,
    d1: UserId,
    d2: UserId,
}

async fn market<S: EventStore + Clone>(store: S) -> Market<S> {
    let identity = IdentityService::new(store.clone());
    let mut ids = Vec::new();
    for (first, phone) in [
        ("Customer", "+380000000001"),
        ("DriverOne", "+380000000002"),
        ("DriverTwo", "+380000000003"),
    ] {
        let session = identity
            .register(Registration::new(first, "Tester", phone, "secret1"))
            .await
            .unwrap();
        ids.push(session.user.user_id().unwrap());
    }

    Market {
        orders: OrderService::new(store.clone()),
        feedback: FeedbackService::new(store),
        identity,
        c1: ids[0],
        d1: ids[1],
        d2: ids[2],
    }
}

async fn place<S: EventStore + Clone>(m: &Market<S>) -> AggregateId {
    let cmd = PlaceOrder::by(
        m.c1,
        OrderDetails::new("Khreshchatyk 1", "Sahaidachnoho 10")
            .with_cities("Kyiv", "Kyiv")
            .with_package("small", "light"),
    );
    let order_id = cmd.order_id;
    m.orders.place_order(cmd).await.unwrap();
    order_id
}

async fn in_progress<S: EventStore + Clone>(m: &Market<S>) -> AggregateId {
    let order_id = place(m).await;
    m.orders
        .apply(ApplyForOrder::new(order_id, m.d1))
        .await
        .unwrap();
    m.orders
        .assign_driver(AssignDriver::new(order_id, m.c1, m.d1))
        .await
        .unwrap();
    order_id
}

async fn finished<S: EventStore + Clone>(m: &Market<S>) -> AggregateId {
    let order_id = in_progress(m).await;
    m.orders
        .finish(FinishOrder::new(order_id, m.d1))
        .await
        .unwrap();
    order_id
}

fn assert_conflict(result: Result<impl std::fmt::Debug, DomainError>) {
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict, "unexpected error: {err}");
}

mod order_lifecycle {
    use super::*;

    #[tokio::test]
    async fn c1_d1_full_lifecycle_ends_closed_with_rating() {
        let m = market(InMemoryEventStore::new()).await;
        let order_id = place(&m).await;

        let placed = m.orders.get(order_id, m.c1).await.unwrap();
        assert_eq!(placed.status(), OrderStatus::New);
        assert_eq!(placed.creator(), Some(m.c1));
        assert_eq!(placed.driver_id(), None);

        m.orders
            .apply(ApplyForOrder::new(order_id, m.d1))
            .await
            .unwrap();
        m.orders
            .apply(ApplyForOrder::new(order_id, m.d2))
            .await
            .unwrap();

        let assigned = m
            .orders
            .assign_driver(AssignDriver::new(order_id, m.c1, m.d1))
            .await
            .unwrap();
        assert_eq!(assigned.aggregate.status(), OrderStatus::InProgress);
        assert_eq!(assigned.aggregate.applicants(), &[m.d2, m.d1]);

        m.orders
            .finish(FinishOrder::new(order_id, m.d1))
            .await
            .unwrap();

        let closed = m
            .feedback
            .close_and_rate(CloseOrder::new(order_id, m.c1, 5))
            .await
            .unwrap();

        assert_eq!(closed.order.status(), OrderStatus::Closed);
        let driver = m.identity.get(m.d1).await.unwrap();
        assert!(driver.ratings().iter().any(|r| r.value() == 5));
        assert_eq!(driver.total_rating(), Some(5.0));
        assert_eq!(
            closed.driver.version(),
            driver.version(),
            "returned driver must match the stored one"
        );
    }

    #[tokio::test]
    async fn driver_rating_is_the_mean_over_closed_orders() {
        let m = market(InMemoryEventStore::new()).await;
        for rating in [5, 3] {
            let order_id = finished(&m).await;
            m.feedback
                .close_and_rate(CloseOrder::new(order_id, m.c1, rating))
                .await
                .unwrap();
        }

        let driver = m.identity.get(m.d1).await.unwrap();
        assert_eq!(driver.total_rating(), Some(4.0));
    }

    #[tokio::test]
    async fn events_are_persisted_in_order() {
        let store = InMemoryEventStore::new();
        let m = market(store.clone()).await;
        let order_id = finished(&m).await;

        let events = store.get_events_for_aggregate(order_id).await.unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "OrderPlaced",
                "ApplicantAdded",
                "DriverAssigned",
                "OrderFinished"
            ]
        );
        assert_eq!(events.last().unwrap().version, Version::new(4));
    }

    #[tokio::test]
    async fn applying_twice_is_idempotent() {
        let m = market(InMemoryEventStore::new()).await;
        let order_id = place(&m).await;

        let first = m
            .orders
            .apply(ApplyForOrder::new(order_id, m.d1))
            .await
            .unwrap();
        let second = m
            .orders
            .apply(ApplyForOrder::new(order_id, m.d1))
            .await
            .unwrap();

        assert!(second.events.is_empty());
        assert_eq!(second.new_version, first.new_version);
        assert_eq!(second.aggregate.applicants(), &[m.d1]);
    }
}

mod transitions {
    use super::*;

    #[tokio::test]
    async fn skipping_states_conflicts() {
        let m = market(InMemoryEventStore::new()).await;

        let new_order = place(&m).await;
        m.orders
            .apply(ApplyForOrder::new(new_order, m.d1))
            .await
            .unwrap();
        assert_conflict(m.orders.finish(FinishOrder::new(new_order, m.d1)).await);
        assert_conflict(
            m.feedback
                .close_and_rate(CloseOrder::new(new_order, m.c1, 5))
                .await,
        );

        let running = in_progress(&m).await;
        assert_conflict(
            m.feedback
                .close_and_rate(CloseOrder::new(running, m.c1, 5))
                .await,
        );
    }

    #[tokio::test]
    async fn moving_backwards_conflicts() {
        let m = market(InMemoryEventStore::new()).await;
        let order_id = finished(&m).await;

        assert_conflict(
            m.orders
                .assign_driver(AssignDriver::new(order_id, m.c1, m.d1))
                .await,
        );
        assert_conflict(m.orders.finish(FinishOrder::new(order_id, m.d1)).await);
        assert_conflict(m.orders.apply(ApplyForOrder::new(order_id, m.d2)).await);

        m.feedback
            .close_and_rate(CloseOrder::new(order_id, m.c1, 4))
            .await
            .unwrap();
        let err = m
            .feedback
            .close_and_rate(CloseOrder::new(order_id, m.c1, 4))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Order(OrderError::AlreadyClosed)));
    }

    #[tokio::test]
    async fn d2_not_an_applicant_conflicts() {
        let m = market(InMemoryEventStore::new()).await;
        let order_id = place(&m).await;
        m.orders
            .apply(ApplyForOrder::new(order_id, m.d1))
            .await
            .unwrap();

        let err = m
            .orders
            .assign_driver(AssignDriver::new(order_id, m.c1, m.d2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "User is not an applicant for this order");
    }

    #[tokio::test]
    async fn non_applicant_conflicts_in_every_status() {
        let m = market(InMemoryEventStore::new()).await;
        let stranger = UserId::new();

        for order_id in [
            place(&m).await,
            in_progress(&m).await,
            finished(&m).await,
        ] {
            assert_conflict(
                m.orders
                    .assign_driver(AssignDriver::new(order_id, m.c1, stranger))
                    .await,
            );
        }
    }

    #[tokio::test]
    async fn deleting_after_assignment_conflicts() {
        let m = market(InMemoryEventStore::new()).await;
        let order_id = in_progress(&m).await;

        assert_conflict(m.orders.delete(DeleteOrder::new(order_id, m.c1)).await);
        assert!(m.orders.find(order_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn bad_rating_is_a_validation_error() {
        let m = market(InMemoryEventStore::new()).await;
        let order_id = finished(&m).await;

        let err = m
            .feedback
            .close_and_rate(CloseOrder::new(order_id, m.c1, 6))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}

mod authorization {
    use super::*;

    #[tokio::test]
    async fn failures_are_reported_as_not_found() {
        let m = market(InMemoryEventStore::new()).await;
        let order_id = place(&m).await;

        let attempts = vec![
            m.orders.apply(ApplyForOrder::new(order_id, m.c1)).await.err(),
            m.orders
                .apply(ApplyForOrder::new(AggregateId::new(), m.d1))
                .await
                .err(),
            m.orders
                .assign_driver(AssignDriver::new(order_id, m.d2, m.d1))
                .await
                .err(),
            m.orders.delete(DeleteOrder::new(order_id, m.d1)).await.err(),
            m.orders.get(order_id, m.d1).await.err(),
        ];

        for err in attempts {
            let err = err.expect("operation should have been refused");
            assert_eq!(err.kind(), ErrorKind::NotFound);
            assert_eq!(err.public_message(), "Order not found!");
        }
    }

    #[tokio::test]
    async fn assigned_driver_can_view_the_order() {
        let m = market(InMemoryEventStore::new()).await;
        let order_id = in_progress(&m).await;

        assert!(m.orders.get(order_id, m.d1).await.is_ok());
        assert!(m.orders.get(order_id, m.d2).await.is_err());
    }

    #[tokio::test]
    async fn only_the_creator_closes() {
        let m = market(InMemoryEventStore::new()).await;
        let order_id = finished(&m).await;

        let err = m
            .feedback
            .close_and_rate(CloseOrder::new(order_id, m.d1, 5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}

mod account_removal {
    use super::*;

    #[tokio::test]
    async fn deleting_a_customer_removes_their_orders_in_any_status() {
        let m = market(InMemoryEventStore::new()).await;
        let fresh = place(&m).await;
        let done = finished(&m).await;

        let (_, removed) = m.identity.delete_self(m.c1, &m.orders).await.unwrap();

        assert_eq!(removed.len(), 2);
        for order_id in [fresh, done] {
            assert!(m.orders.find(order_id).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn busy_order_leaves_the_account_and_every_order_in_place() {
        let store = ContendedStore::new();
        let m = market(store.clone()).await;
        let first = place(&m).await;
        let busy = in_progress(&m).await;
        let last = place(&m).await;

        store.arm(busy, MAX_ATTEMPTS);
        let err = m.identity.delete_self(m.c1, &m.orders).await.unwrap_err();
        assert!(err.is_version_conflict());

        assert!(m.identity.get(m.c1).await.is_ok());
        for order_id in [first, busy, last] {
            assert!(m.orders.find(order_id).await.unwrap().is_some());
        }

        // Once the contention is gone the same request goes through.
        let (_, removed) = m.identity.delete_self(m.c1, &m.orders).await.unwrap();
        assert_eq!(removed.len(), 3);
        assert!(m.identity.get(m.c1).await.is_err());
        for order_id in [first, busy, last] {
            assert!(m.orders.find(order_id).await.unwrap().is_none());
        }
    }
}

mod concurrency {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_assignment_has_one_winner() {
        let m = Arc::new(market(InMemoryEventStore::new()).await);
        let order_id = place(&m).await;
        for driver in [m.d1, m.d2] {
            m.orders
                .apply(ApplyForOrder::new(order_id, driver))
                .await
                .unwrap();
        }

        let first = {
            let m = Arc::clone(&m);
            tokio::spawn(async move {
                m.orders
                    .assign_driver(AssignDriver::new(order_id, m.c1, m.d1))
                    .await
            })
        };
        let second = {
            let m = Arc::clone(&m);
            tokio::spawn(async move {
                m.orders
                    .assign_driver(AssignDriver::new(order_id, m.c1, m.d2))
                    .await
            })
        };

        let results = [first.await.unwrap(), second.await.unwrap()];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);

        let loser = results.into_iter().find_map(Result::err).unwrap();
        assert!(matches!(
            loser,
            DomainError::Order(OrderError::AlreadyAssigned)
        ));

        let order = m.orders.load(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::InProgress);
        assert!(order.driver_id() == Some(m.d1) || order.driver_id() == Some(m.d2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_applications_are_all_kept() {
        let m = Arc::new(market(InMemoryEventStore::new()).await);
        let order_id = place(&m).await;

        let mut handles = Vec::new();
        for _ in 0..MAX_ATTEMPTS {
            let m = Arc::clone(&m);
            handles.push(tokio::spawn(async move {
                m.orders
                    .apply(ApplyForOrder::new(order_id, UserId::new()))
                    .await
            }));
        }

        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                succeeded += 1;
            }
        }

        let order = m.orders.load(order_id).await.unwrap();
        assert_eq!(order.applicants().len(), succeeded);
        assert!(succeeded >= 1);
    }
}

/// Store wrapper that sneaks a write into one stream right before a
/// multi-stream append, so the append always loses the race.
#[derive(Clone)]
struct ContendedStore {
    inner: InMemoryEventStore,
    target: Arc<std::sync::Mutex<Option<AggregateId>>>,
    injections: Arc<AtomicUsize>,
}

impl ContendedStore {
    fn new() -> Self {
        Self {
            inner: InMemoryEventStore::new(),
            target: Arc::new(std::sync::Mutex::new(None)),
            injections: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn arm(&self, target: AggregateId, injections: usize) {
        *self.target.lock().unwrap() = Some(target);
        self.injections.store(injections, Ordering::SeqCst);
    }

    /// Appends a harmless event to `target`, shaped for the stream's kind.
    async fn inject(&self, target: AggregateId) -> event_store::Result<()> {
        let history = self.inner.get_events_for_aggregate(target).await?;
        let head = history.last().map(|e| e.version).unwrap_or(Version::initial());
        let is_order = history
            .first()
            .is_some_and(|e| e.aggregate_type == Order::aggregate_type());

        let builder = EventEnvelope::builder()
            .aggregate_id(target)
            .version(head.next());
        let builder = if is_order {
            let event = OrderEvent::comment_updated(Some(format!("injected-{}", head.next())));
            builder
                .aggregate_type(Order::aggregate_type())
                .event_type(event.event_type())
                .payload(&event)?
        } else {
            let event = UserEvent::SessionOpened {
                token_digest: format!("injected-{}", head.next()),
                opened_at: Utc::now(),
            };
            builder
                .aggregate_type("User")
                .event_type(event.event_type())
                .payload(&event)?
        };

        self.inner
            .append(
                vec![builder.build()?],
                event_store::AppendOptions::expect_version(head),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for ContendedStore {
    async fn append_streams(&self, batches: Vec<StreamAppend>) -> event_store::Result<Vec<Version>> {
        let target = *self.target.lock().unwrap();
        if let Some(target) = target {
            let touches_target = batches
                .iter()
                .any(|batch| batch.aggregate_id() == Some(target));
            if touches_target
                && self
                    .injections
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                self.inject(target).await?;
            }
        }
        self.inner.append_streams(batches).await
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> event_store::Result<Vec<EventEnvelope>> {
        self.inner.get_events_for_aggregate(aggregate_id).await
    }

    async fn get_events_for_aggregate_from_version(
        &self,
        aggregate_id: AggregateId,
        from_version: Version,
    ) -> event_store::Result<Vec<EventEnvelope>> {
        self.inner
            .get_events_for_aggregate_from_version(aggregate_id, from_version)
            .await
    }

    async fn get_events_by_type(&self, event_type: &str) -> event_store::Result<Vec<EventEnvelope>> {
        self.inner.get_events_by_type(event_type).await
    }

    async fn stream_events_after(&self, position: u64) -> event_store::Result<EventStream> {
        self.inner.stream_events_after(position).await
    }

    async fn get_aggregate_version(
        &self,
        aggregate_id: AggregateId,
    ) -> event_store::Result<Option<Version>> {
        self.inner.get_aggregate_version(aggregate_id).await
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> event_store::Result<()> {
        self.inner.save_snapshot(snapshot).await
    }

    async fn get_snapshot(&self, aggregate_id: AggregateId) -> event_store::Result<Option<Snapshot>> {
        self.inner.get_snapshot(aggregate_id).await
    }
}

mod close_and_rate_atomicity {
    use super::*;

    #[tokio::test]
    async fn exhausted_retries_leave_both_records_untouched() {
        let store = ContendedStore::new();
        let m = market(store.clone()).await;
        let order_id = finished(&m).await;
        let rated_before = m.identity.get(m.d1).await.unwrap().ratings().len();

        store.arm(m.d1.into(), MAX_ATTEMPTS);
        let err = m
            .feedback
            .close_and_rate(CloseOrder::new(order_id, m.c1, 5))
            .await
            .unwrap_err();

        assert!(err.is_version_conflict());
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let order = m.orders.load(order_id).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Finished);
        assert!(order.rating().is_none());

        let driver = m.identity.get(m.d1).await.unwrap();
        assert_eq!(driver.ratings().len(), rated_before);
    }

    #[tokio::test]
    async fn transient_conflicts_are_retried() {
        let store = ContendedStore::new();
        let m = market(store.clone()).await;
        let order_id = finished(&m).await;

        store.arm(m.d1.into(), MAX_ATTEMPTS - 1);
        let closed = m
            .feedback
            .close_and_rate(CloseOrder::new(order_id, m.c1, 5))
            .await
            .unwrap();

        assert_eq!(closed.order.status(), OrderStatus::Closed);
        let driver = m.identity.get(m.d1).await.unwrap();
        assert_eq!(driver.ratings().len(), 1);
        assert_eq!(driver.total_rating(), Some(5.0));
    }
}
