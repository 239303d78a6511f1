//! Closing an order with a rating for its driver.
//!
//! The order's `OrderClosed` and the driver's `RatingReceived` are decided
//! separately but committed in a single multi-stream append. If either stream
//! moved since it was read, nothing is written and the whole decision is made
//! again.

use common::UserId;
use event_store::EventStore;

use crate::command::{CommandHandler, UnitOfWork, apply_committed, retry_on_conflict};
use crate::error::DomainError;
use crate::order::{CloseOrder, Closing, Order, log_hidden_reason};
use crate::user::User;

/// Outcome of a successful close.
#[derive(Debug, Clone)]
pub struct ClosedOrder {
    pub order: Order,
    pub driver: User,
}

pub struct FeedbackService<S: EventStore> {
    orders: CommandHandler<S, Order>,
    users: CommandHandler<S, User>,
}

impl<S: EventStore + Clone> FeedbackService<S> {
    pub fn new(store: S) -> Self {
        Self {
            orders: CommandHandler::new(store.clone()),
            users: CommandHandler::new(store),
        }
    }
}

impl<S: EventStore> FeedbackService<S> {
    /// Rates the driver and moves the order to `Closed`, both or neither.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, actor = %cmd.actor))]
    pub async fn close_and_rate(&self, cmd: CloseOrder) -> Result<ClosedOrder, DomainError> {
        let closed = retry_on_conflict(|| self.close_once(&cmd))
            .await
            .inspect_err(log_hidden_reason)?;

        metrics::counter!("orders_closed_total").increment(1);
        tracing::info!(rating = cmd.rating, "order closed");
        Ok(closed)
    }

    async fn close_once(&self, cmd: &CloseOrder) -> Result<ClosedOrder, DomainError> {
        let mut order = self.orders.load(cmd.order_id).await?;
        let Closing {
            driver_id,
            rating,
            events: order_events,
        } = order.close(cmd.actor, cmd.rating)?;

        let mut driver = self.load_driver(driver_id).await?;
        let driver_events = driver.receive_rating(cmd.order_id, rating)?;

        let mut work = UnitOfWork::new();
        work.stage(&self.orders, cmd.order_id, &order, &order_events)?;
        work.stage(&self.users, driver_id.into(), &driver, &driver_events)?;
        work.commit(self.orders.store()).await?;

        apply_committed(&mut order, order_events);
        apply_committed(&mut driver, driver_events);
        self.users.snapshot_if_due(driver_id.into(), &driver).await?;

        Ok(ClosedOrder { order, driver })
    }

    async fn load_driver(&self, driver_id: UserId) -> Result<User, DomainError> {
        self.users.load(driver_id.into()).await
    }
}
