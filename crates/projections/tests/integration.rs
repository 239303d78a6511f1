//! Integration tests: domain services → ProjectionProcessor → views.

use common::UserId;
use domain::{
    ApplyForOrder, AssignDriver, CloseOrder, DeleteOrder, FeedbackService, FinishOrder,
    IdentityService, OrderDetails, OrderService, OrderStatus, PlaceOrder, ProfileUpdate,
    Registration,
};
use event_store::InMemoryEventStore;
use projections::{OrderBoardView, OrderFilter, ProjectionProcessor, UserDirectoryView};

struct Setup {
    identity: IdentityService<InMemoryEventStore>,
    orders: OrderService<InMemoryEventStore>,
    feedback: FeedbackService<InMemoryEventStore>,
    processor: ProjectionProcessor<InMemoryEventStore>,
    board: OrderBoardView,
    directory: UserDirectoryView,
}

fn setup() -> Setup {
    let store = InMemoryEventStore::new();
    let board = OrderBoardView::new();
    let directory = UserDirectoryView::new();

    let mut processor = ProjectionProcessor::new(store.clone());
    processor.register(Box::new(board.clone()));
    processor.register(Box::new(directory.clone()));

    Setup {
        identity: IdentityService::new(store.clone()),
        orders: OrderService::new(store.clone()),
        feedback: FeedbackService::new(store),
        processor,
        board,
        directory,
    }
}

async fn register(s: &Setup, first_name: &str, phone: &str) -> UserId {
    s.identity
        .register(Registration::new(first_name, "Tester", phone, "secret1"))
        .await
        .unwrap()
        .user
        .user_id()
        .unwrap()
}

fn details() -> OrderDetails {
    OrderDetails::new("Khreshchatyk 1", "Sahaidachnoho 10")
}

#[tokio::test]
async fn closed_order_and_driver_rating_reach_both_views() {
    let s = setup();
    let customer = register(&s, "Kateryna", "+380000000001").await;
    let driver = register(&s, "Dmytro", "+380000000002").await;

    let cmd = PlaceOrder::by(customer, details().with_package("M", "5kg"));
    let order_id = cmd.order_id;
    s.orders.place_order(cmd).await.unwrap();
    s.orders
        .apply(ApplyForOrder::new(order_id, driver))
        .await
        .unwrap();
    s.orders
        .assign_driver(AssignDriver::new(order_id, customer, driver))
        .await
        .unwrap();
    s.orders
        .finish(FinishOrder::new(order_id, driver))
        .await
        .unwrap();
    s.feedback
        .close_and_rate(CloseOrder::new(order_id, customer, 5))
        .await
        .unwrap();

    s.processor.run_catch_up().await.unwrap();

    let card = s.board.get(order_id).await.unwrap();
    assert_eq!(card.status, OrderStatus::Closed);
    assert_eq!(card.driver_id, Some(driver));
    assert_eq!(card.applicants, vec![driver]);

    let rated = s.directory.get(driver).await.unwrap();
    assert_eq!(rated.ratings, vec![5]);
    assert_eq!(rated.total_rating(), Some(5.0));
    assert_eq!(s.directory.list().await.len(), 2);
}

#[tokio::test]
async fn listing_filters_follow_precedence() {
    let s = setup();
    let alice = register(&s, "Alina", "+380000000011").await;
    let bob = register(&s, "Bohdan", "+380000000012").await;
    let driver = register(&s, "Dmytro", "+380000000013").await;

    let small = PlaceOrder::by(alice, details().with_package("S", "1kg"));
    let small_id = small.order_id;
    s.orders.place_order(small).await.unwrap();
    let large = PlaceOrder::by(bob, details().with_package("L", "20kg"));
    let large_id = large.order_id;
    s.orders.place_order(large).await.unwrap();

    s.orders
        .apply(ApplyForOrder::new(large_id, driver))
        .await
        .unwrap();
    s.orders
        .assign_driver(AssignDriver::new(large_id, bob, driver))
        .await
        .unwrap();

    s.processor.run_catch_up().await.unwrap();

    let by_creator = s.board.list(&OrderFilter::Creator(alice)).await;
    assert_eq!(by_creator.len(), 1);
    assert_eq!(by_creator[0].order_id, small_id);

    let by_driver = s.board.list(&OrderFilter::Driver(driver)).await;
    assert_eq!(by_driver.len(), 1);
    assert_eq!(by_driver[0].order_id, large_id);

    // A creator filter wins over the package filter that would match both.
    let filter = OrderFilter::from_query(
        Some(bob),
        None,
        Some(vec!["S".into(), "L".into()]),
        None,
    );
    let found = s.board.list(&filter).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].order_id, large_id);

    let all = s.board.list(&OrderFilter::All).await;
    let ids: Vec<_> = all.iter().map(|card| card.order_id).collect();
    assert_eq!(ids, vec![large_id, small_id]);
}

#[tokio::test]
async fn account_removal_clears_user_and_orders() {
    let s = setup();
    let customer = register(&s, "Olena", "+380000000021").await;

    for _ in 0..2 {
        s.orders
            .place_order(PlaceOrder::by(customer, details()))
            .await
            .unwrap();
    }
    s.processor.run_catch_up().await.unwrap();
    assert_eq!(s.board.list(&OrderFilter::Creator(customer)).await.len(), 2);

    s.identity.delete_self(customer, &s.orders).await.unwrap();
    s.processor.run_catch_up().await.unwrap();

    assert!(s.board.list(&OrderFilter::All).await.is_empty());
    assert!(s.directory.get(customer).await.is_none());
}

#[tokio::test]
async fn incremental_catch_up_sees_later_changes() {
    let s = setup();
    let customer = register(&s, "Taras", "+380000000031").await;
    let cmd = PlaceOrder::by(customer, details());
    let order_id = cmd.order_id;
    s.orders.place_order(cmd).await.unwrap();
    s.processor.run_catch_up().await.unwrap();

    let mut fields = serde_json::Map::new();
    fields.insert("firstName".into(), serde_json::json!("Tarasyk"));
    s.identity
        .update_profile(customer, ProfileUpdate::from_fields(&fields).unwrap())
        .await
        .unwrap();
    s.orders
        .delete(DeleteOrder::new(order_id, customer))
        .await
        .unwrap();
    s.processor.run_catch_up().await.unwrap();

    let card = s.directory.get(customer).await.unwrap();
    assert_eq!(card.profile.first_name, "Tarasyk");
    assert!(s.board.get(order_id).await.is_none());

    s.processor.rebuild_all().await.unwrap();
    assert_eq!(s.directory.list().await.len(), 1);
    assert!(s.board.list(&OrderFilter::All).await.is_empty());
}
