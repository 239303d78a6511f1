use common::{AggregateId, UserId};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{
    Aggregate, ApplyForOrder, AssignDriver, CloseOrder, FeedbackService, FinishOrder,
    IdentityService, Order, OrderDetails, OrderEvent, OrderService, PlaceOrder, Registration,
};
use event_store::{AppendOptions, EventEnvelope, InMemoryEventStore, Version, store::EventStore};

fn make_envelope(aggregate_id: AggregateId, version: i64, event: &OrderEvent) -> EventEnvelope {
    EventEnvelope::builder()
        .aggregate_id(aggregate_id)
        .aggregate_type("Order")
        .event_type(domain::DomainEvent::event_type(event))
        .version(Version::new(version))
        .payload(event)
        .unwrap()
        .build()
        .unwrap()
}

fn details() -> OrderDetails {
    OrderDetails::new("Khreshchatyk 1", "Sahaidachnoho 10")
}

fn bench_place_order(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let service = OrderService::new(InMemoryEventStore::new());

    c.bench_function("domain/place_order", |b| {
        b.iter(|| {
            rt.block_on(async {
                let cmd = PlaceOrder::by(UserId::new(), details());
                service.place_order(cmd).await.unwrap();
            });
        });
    });
}

fn bench_full_lifecycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let orders = OrderService::new(store.clone());
    let feedback = FeedbackService::new(store.clone());
    let identity = IdentityService::new(store);

    let (customer, driver) = rt.block_on(async {
        let customer = identity
            .register(Registration::new("Bench", "Customer", "+380000000101", "secret1"))
            .await
            .unwrap();
        let driver = identity
            .register(Registration::new("Bench", "Driver", "+380000000102", "secret1"))
            .await
            .unwrap();
        (
            customer.user.user_id().unwrap(),
            driver.user.user_id().unwrap(),
        )
    });

    c.bench_function("domain/place_apply_assign_finish_close", |b| {
        b.iter(|| {
            rt.block_on(async {
                let cmd = PlaceOrder::by(customer, details());
                let order_id = cmd.order_id;
                orders.place_order(cmd).await.unwrap();
                orders
                    .apply(ApplyForOrder::new(order_id, driver))
                    .await
                    .unwrap();
                orders
                    .assign_driver(AssignDriver::new(order_id, customer, driver))
                    .await
                    .unwrap();
                orders
                    .finish(FinishOrder::new(order_id, driver))
                    .await
                    .unwrap();
                feedback
                    .close_and_rate(CloseOrder::new(order_id, customer, 5))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_order_reconstruction(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();
    let order_id = AggregateId::new();

    // 1 placement + 99 applications
    rt.block_on(async {
        let placed = OrderEvent::order_placed(order_id, UserId::new(), details());
        let mut events = vec![make_envelope(order_id, 1, &placed)];
        for v in 2..=100 {
            let applied = OrderEvent::applicant_added(UserId::new());
            events.push(make_envelope(order_id, v, &applied));
        }
        store.append(events, AppendOptions::new()).await.unwrap();
    });

    c.bench_function("domain/reconstruct_100_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let events = store.get_events_for_aggregate(order_id).await.unwrap();
                let mut order = Order::default();
                for event in &events {
                    let domain_event: OrderEvent =
                        serde_json::from_value(event.payload.clone()).unwrap();
                    order.apply(domain_event);
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_place_order,
    bench_full_lifecycle,
    bench_order_reconstruction,
);
criterion_main!(benches);
