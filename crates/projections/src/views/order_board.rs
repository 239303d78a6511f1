//! Order board read model: every live order, filterable the way the order
//! listing is queried.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use domain::{Aggregate, Order, OrderDetails, OrderEvent, OrderStatus, Rating};
use event_store::EventEnvelope;
use tokio::sync::RwLock;

use crate::projection::{Checkpoint, Projection};
use crate::{ProjectionError, Result};

/// Denormalized order row.
#[derive(Debug, Clone)]
pub struct OrderCard {
    pub order_id: AggregateId,
    pub creator: UserId,
    pub driver_id: Option<UserId>,
    pub status: OrderStatus,
    pub details: OrderDetails,
    /// Most recent applicant first.
    pub applicants: Vec<UserId>,
    pub image_path: Option<String>,
    pub rating: Option<Rating>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which orders a listing returns.
///
/// Only one criterion applies. [`OrderFilter::from_query`] picks the first
/// one present in the order creator, driver, package size, package weight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OrderFilter {
    #[default]
    All,
    Creator(UserId),
    Driver(UserId),
    PackageSize(Vec<String>),
    PackageWeight(Vec<String>),
}

impl OrderFilter {
    pub fn from_query(
        creator: Option<UserId>,
        driver: Option<UserId>,
        package_sizes: Option<Vec<String>>,
        package_weights: Option<Vec<String>>,
    ) -> Self {
        if let Some(creator) = creator {
            OrderFilter::Creator(creator)
        } else if let Some(driver) = driver {
            OrderFilter::Driver(driver)
        } else if let Some(sizes) = package_sizes {
            OrderFilter::PackageSize(sizes)
        } else if let Some(weights) = package_weights {
            OrderFilter::PackageWeight(weights)
        } else {
            OrderFilter::All
        }
    }

    pub fn matches(&self, card: &OrderCard) -> bool {
        match self {
            OrderFilter::All => true,
            OrderFilter::Creator(creator) => card.creator == *creator,
            OrderFilter::Driver(driver) => card.driver_id == Some(*driver),
            OrderFilter::PackageSize(sizes) => card
                .details
                .package_size
                .as_ref()
                .is_some_and(|size| sizes.contains(size)),
            OrderFilter::PackageWeight(weights) => card
                .details
                .package_weight
                .as_ref()
                .is_some_and(|weight| weights.contains(weight)),
        }
    }
}

/// Read model of all orders that have not been deleted.
#[derive(Clone)]
pub struct OrderBoardView {
    orders: Arc<RwLock<HashMap<AggregateId, OrderCard>>>,
    checkpoint: Arc<RwLock<Checkpoint>>,
}

impl OrderBoardView {
    pub fn new() -> Self {
        Self {
            orders: Arc::new(RwLock::new(HashMap::new())),
            checkpoint: Arc::new(RwLock::new(Checkpoint::START)),
        }
    }

    pub async fn get(&self, order_id: AggregateId) -> Option<OrderCard> {
        self.orders.read().await.get(&order_id).cloned()
    }

    /// Orders matching `filter`, newest first.
    pub async fn list(&self, filter: &OrderFilter) -> Vec<OrderCard> {
        let mut cards: Vec<OrderCard> = self
            .orders
            .read()
            .await
            .values()
            .filter(|card| filter.matches(card))
            .cloned()
            .collect();
        cards.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        cards
    }
}

impl Default for OrderBoardView {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderCard {
    /// Card for an order rebuilt from its stream. `None` if it was never placed.
    pub fn from_order(order: &Order) -> Option<Self> {
        Some(Self {
            order_id: order.id()?,
            creator: order.creator()?,
            driver_id: order.driver_id(),
            status: order.status(),
            details: order.details().clone(),
            applicants: order.applicants().to_vec(),
            image_path: order.image_path().map(str::to_string),
            rating: order.rating(),
            created_at: order.created_at()?,
            updated_at: order.updated_at()?,
        })
    }
}

#[async_trait]
impl Projection for OrderBoardView {
    fn name(&self) -> &'static str {
        "OrderBoardView"
    }

    fn source(&self) -> &'static str {
        Order::aggregate_type()
    }

    async fn apply(&self, event: &EventEnvelope) -> Result<()> {
        let order_event: OrderEvent = serde_json::from_value(event.payload.clone())
            .map_err(|e| ProjectionError::decode(self.name(), event, e))?;
        let order_id = event.aggregate_id;

        {
            let mut orders = self.orders.write().await;
            match order_event {
                // A placement seen twice must not reset the card.
                OrderEvent::OrderPlaced(data) => {
                    orders.entry(order_id).or_insert_with(|| OrderCard {
                        order_id,
                        creator: data.creator,
                        driver_id: None,
                        status: OrderStatus::New,
                        details: data.details,
                        applicants: Vec::new(),
                        image_path: None,
                        rating: None,
                        created_at: data.placed_at,
                        updated_at: data.placed_at,
                    });
                }
                OrderEvent::ApplicantAdded(data) => {
                    if let Some(card) = orders.get_mut(&order_id) {
                        if !card.applicants.contains(&data.driver_id) {
                            card.applicants.insert(0, data.driver_id);
                        }
                        card.updated_at = data.applied_at;
                    }
                }
                OrderEvent::DriverAssigned(data) => {
                    if let Some(card) = orders.get_mut(&order_id) {
                        card.driver_id = Some(data.driver_id);
                        card.status = OrderStatus::InProgress;
                        card.updated_at = data.assigned_at;
                    }
                }
                OrderEvent::OrderFinished(data) => {
                    if let Some(card) = orders.get_mut(&order_id) {
                        card.status = OrderStatus::Finished;
                        card.updated_at = data.finished_at;
                    }
                }
                OrderEvent::OrderClosed(data) => {
                    if let Some(card) = orders.get_mut(&order_id) {
                        card.status = OrderStatus::Closed;
                        card.rating = Some(data.rating);
                        card.updated_at = data.closed_at;
                    }
                }
                OrderEvent::CommentUpdated(data) => {
                    if let Some(card) = orders.get_mut(&order_id) {
                        card.details.comment = data.comment;
                        card.updated_at = data.updated_at;
                    }
                }
                OrderEvent::ImageAttached(data) => {
                    if let Some(card) = orders.get_mut(&order_id) {
                        card.image_path = Some(data.image_path);
                        card.updated_at = data.attached_at;
                    }
                }
                OrderEvent::OrderDeleted(_) => {
                    orders.remove(&order_id);
                }
            }
        }

        Ok(())
    }

    async fn checkpoint(&self) -> Checkpoint {
        *self.checkpoint.read().await
    }

    async fn save_checkpoint(&self, checkpoint: Checkpoint) {
        *self.checkpoint.write().await = checkpoint;
    }

    async fn reset(&self) -> Result<()> {
        self.orders.write().await.clear();
        *self.checkpoint.write().await = Checkpoint::START;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProjectionProcessor;
    use domain::DomainEvent;
    use event_store::{AppendOptions, EventStore, InMemoryEventStore, Version};

    fn envelope(order_id: AggregateId, version: i64, event: &OrderEvent) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(order_id)
            .aggregate_type("Order")
            .event_type(event.event_type())
            .version(Version::new(version))
            .payload(event)
            .unwrap()
            .build()
            .unwrap()
    }

    async fn place(view: &OrderBoardView, creator: UserId, details: OrderDetails) -> AggregateId {
        let order_id = AggregateId::new();
        let placed = OrderEvent::order_placed(order_id, creator, details);
        view.apply(&envelope(order_id, 1, &placed)).await.unwrap();
        order_id
    }

    fn details() -> OrderDetails {
        OrderDetails::new("Khreshchatyk 1", "Sahaidachnoho 10")
    }

    #[test]
    fn first_present_criterion_wins() {
        let creator = UserId::new();
        let driver = UserId::new();

        let filter = OrderFilter::from_query(
            Some(creator),
            Some(driver),
            Some(vec!["S".into()]),
            None,
        );
        assert_eq!(filter, OrderFilter::Creator(creator));

        let filter = OrderFilter::from_query(None, None, None, Some(vec!["5kg".into()]));
        assert_eq!(filter, OrderFilter::PackageWeight(vec!["5kg".into()]));

        assert_eq!(
            OrderFilter::from_query(None, None, None, None),
            OrderFilter::All
        );
    }

    #[tokio::test]
    async fn lists_newest_first() {
        let view = OrderBoardView::new();
        let creator = UserId::new();
        let older = place(&view, creator, details()).await;
        let newer = place(&view, creator, details()).await;

        let ids: Vec<_> = view
            .list(&OrderFilter::All)
            .await
            .into_iter()
            .map(|card| card.order_id)
            .collect();
        assert_eq!(ids, vec![newer, older]);
    }

    #[tokio::test]
    async fn filters_by_package_descriptors() {
        let view = OrderBoardView::new();
        let creator = UserId::new();
        let small = place(&view, creator, details().with_package("S", "1kg")).await;
        place(&view, creator, details().with_package("L", "20kg")).await;
        place(&view, creator, details()).await;

        let found = view
            .list(&OrderFilter::PackageSize(vec!["S".into(), "M".into()]))
            .await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].order_id, small);

        let found = view
            .list(&OrderFilter::PackageWeight(vec!["1kg".into(), "20kg".into()]))
            .await;
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn tracks_assignment_and_closing() {
        let view = OrderBoardView::new();
        let creator = UserId::new();
        let driver = UserId::new();
        let order_id = place(&view, creator, details()).await;

        let events = [
            OrderEvent::applicant_added(driver),
            OrderEvent::driver_assigned(driver),
            OrderEvent::order_finished(driver),
            OrderEvent::order_closed(driver, Rating::new(4).unwrap()),
        ];
        for (i, event) in events.iter().enumerate() {
            view.apply(&envelope(order_id, i as i64 + 2, event))
                .await
                .unwrap();
        }

        let card = view.get(order_id).await.unwrap();
        assert_eq!(card.status, OrderStatus::Closed);
        assert_eq!(card.applicants, vec![driver]);
        assert_eq!(card.rating.map(|r| r.value()), Some(4));

        let by_driver = view.list(&OrderFilter::Driver(driver)).await;
        assert_eq!(by_driver.len(), 1);
        assert!(view.list(&OrderFilter::Driver(creator)).await.is_empty());
    }

    #[tokio::test]
    async fn replayed_placement_keeps_progress() {
        let view = OrderBoardView::new();
        let creator = UserId::new();
        let driver = UserId::new();
        let order_id = AggregateId::new();
        let placed = OrderEvent::order_placed(order_id, creator, details());

        view.apply(&envelope(order_id, 1, &placed)).await.unwrap();
        let applied = OrderEvent::applicant_added(driver);
        view.apply(&envelope(order_id, 2, &applied)).await.unwrap();
        let assigned = OrderEvent::driver_assigned(driver);
        view.apply(&envelope(order_id, 3, &assigned)).await.unwrap();

        view.apply(&envelope(order_id, 1, &placed)).await.unwrap();

        let card = view.get(order_id).await.unwrap();
        assert_eq!(card.status, OrderStatus::InProgress);
        assert_eq!(card.driver_id, Some(driver));
        assert_eq!(card.applicants, vec![driver]);
    }

    #[tokio::test]
    async fn deleted_orders_leave_the_board() {
        let view = OrderBoardView::new();
        let creator = UserId::new();
        let order_id = place(&view, creator, details()).await;
        assert!(view.get(order_id).await.is_some());

        let deleted = OrderEvent::order_deleted(false);
        view.apply(&envelope(order_id, 2, &deleted)).await.unwrap();

        assert!(view.get(order_id).await.is_none());
        assert!(view.list(&OrderFilter::Creator(creator)).await.is_empty());
    }

    #[tokio::test]
    async fn catch_up_skips_other_streams() {
        let store = InMemoryEventStore::new();
        let foreign = EventEnvelope::builder()
            .aggregate_id(AggregateId::new())
            .aggregate_type("User")
            .event_type("UserDeleted")
            .version(Version::first())
            .payload_raw(serde_json::json!({"type": "UserDeleted"}))
            .build()
            .unwrap();
        let order_id = AggregateId::new();
        let placed = OrderEvent::order_placed(order_id, UserId::new(), details());
        store
            .append(vec![foreign], AppendOptions::new())
            .await
            .unwrap();
        store
            .append(vec![envelope(order_id, 1, &placed)], AppendOptions::new())
            .await
            .unwrap();

        let view = OrderBoardView::new();
        let mut processor = ProjectionProcessor::new(store);
        processor.register(Box::new(view.clone()));
        processor.run_catch_up().await.unwrap();

        assert_eq!(view.list(&OrderFilter::All).await.len(), 1);
        assert_eq!(view.checkpoint().await, Checkpoint::after(2));
    }
}
