//! Order lifecycle operations over the event store.

use common::{AggregateId, UserId};
use event_store::EventStore;

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandResult, UnitOfWork};
use crate::error::DomainError;

use super::{
    ApplyForOrder, AssignDriver, AttachOrderImage, DeleteOrder, FinishOrder, NotFoundReason, Order,
    OrderError, OrderEvent, PlaceOrder, UpdateComment,
};

/// Runs order commands with authorization checks and bounded conflict retry.
pub struct OrderService<S: EventStore> {
    handler: CommandHandler<S, Order>,
}

impl<S: EventStore> OrderService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    /// Returns a reference to the underlying command handler.
    pub fn handler(&self) -> &CommandHandler<S, Order> {
        &self.handler
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, actor = %cmd.creator))]
    pub async fn place_order(&self, cmd: PlaceOrder) -> Result<CommandResult<Order>, DomainError> {
        let PlaceOrder {
            order_id,
            creator,
            details,
        } = cmd;

        let result = self
            .handler
            .execute_with_snapshot(order_id, |order| {
                order.place(order_id, creator, details.clone())
            })
            .await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!("order placed");
        Ok(result)
    }

    /// Adds the driver to the applicant list. Re-applying changes nothing.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, actor = %cmd.driver_id))]
    pub async fn apply(&self, cmd: ApplyForOrder) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_with_snapshot(cmd.order_id, |order| order.add_applicant(cmd.driver_id))
            .await
            .inspect_err(log_hidden_reason)
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, actor = %cmd.actor))]
    pub async fn assign_driver(
        &self,
        cmd: AssignDriver,
    ) -> Result<CommandResult<Order>, DomainError> {
        let result = self
            .handler
            .execute_with_snapshot(cmd.order_id, |order| {
                order.assign_driver(cmd.actor, cmd.driver_id)
            })
            .await
            .inspect_err(log_hidden_reason)?;

        metrics::counter!("orders_assigned_total").increment(1);
        tracing::info!(driver_id = %cmd.driver_id, "driver assigned");
        Ok(result)
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, actor = %cmd.driver_id))]
    pub async fn finish(&self, cmd: FinishOrder) -> Result<CommandResult<Order>, DomainError> {
        let result = self
            .handler
            .execute_with_snapshot(cmd.order_id, |order| order.finish(cmd.driver_id))
            .await
            .inspect_err(log_hidden_reason)?;

        metrics::counter!("orders_finished_total").increment(1);
        tracing::info!("order finished");
        Ok(result)
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, actor = %cmd.actor))]
    pub async fn update_comment(
        &self,
        cmd: UpdateComment,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_with_snapshot(cmd.order_id, |order| {
                order.update_comment(cmd.actor, cmd.update.clone())
            })
            .await
            .inspect_err(log_hidden_reason)
    }

    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, actor = %cmd.actor))]
    pub async fn attach_image(
        &self,
        cmd: AttachOrderImage,
    ) -> Result<CommandResult<Order>, DomainError> {
        self.handler
            .execute_with_snapshot(cmd.order_id, |order| {
                order.attach_image(cmd.actor, cmd.image_path.as_str())
            })
            .await
            .inspect_err(log_hidden_reason)
    }

    /// Deletes an order on its creator's request.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id, actor = %cmd.actor))]
    pub async fn delete(&self, cmd: DeleteOrder) -> Result<CommandResult<Order>, DomainError> {
        let result = self
            .handler
            .execute(cmd.order_id, |order| order.delete(cmd.actor))
            .await
            .inspect_err(log_hidden_reason)?;

        tracing::info!("order deleted");
        Ok(result)
    }

    /// Stages the removal of every order `creator` placed, whatever its
    /// status, so it commits together with the rest of `work`.
    ///
    /// Returns the ids of the orders staged for removal.
    pub async fn stage_removal_of_created(
        &self,
        work: &mut UnitOfWork,
        creator: UserId,
    ) -> Result<Vec<AggregateId>, DomainError> {
        let mut removed = Vec::new();
        for order_id in self.placed_by(creator).await? {
            let order = self.handler.load(order_id).await?;
            let events = order.delete_for_account(creator)?;
            if events.is_empty() {
                continue;
            }
            work.stage(&self.handler, order_id, &order, &events)?;
            removed.push(order_id);
        }
        Ok(removed)
    }

    /// Loads an order the actor may see.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, order_id: AggregateId, actor: UserId) -> Result<Order, DomainError> {
        let order = self.handler.load(order_id).await?;
        order
            .visible_to(actor)
            .map_err(DomainError::from)
            .inspect_err(log_hidden_reason)?;
        Ok(order)
    }

    /// Loads an order regardless of who asks.
    ///
    /// Returns None if the order doesn't exist or was deleted.
    pub async fn find(&self, order_id: AggregateId) -> Result<Option<Order>, DomainError> {
        let order = self.handler.load(order_id).await?;
        Ok(order.exists().then_some(order))
    }

    /// Like [`find`](Self::find), but a missing order is an error.
    pub async fn load(&self, order_id: AggregateId) -> Result<Order, DomainError> {
        self.find(order_id)
            .await?
            .ok_or_else(|| OrderError::not_found(NotFoundReason::Missing).into())
    }

    async fn placed_by(&self, creator: UserId) -> Result<Vec<AggregateId>, DomainError> {
        let placed = self.handler.store().get_events_by_type("OrderPlaced").await?;

        let mut order_ids = Vec::new();
        for envelope in placed {
            if envelope.aggregate_type != Order::aggregate_type() {
                continue;
            }
            if let OrderEvent::OrderPlaced(data) = serde_json::from_value(envelope.payload)?
                && data.creator == creator
            {
                order_ids.push(data.order_id);
            }
        }
        Ok(order_ids)
    }
}

/// Hidden not-found reasons go to the log only.
pub(crate) fn log_hidden_reason(error: &DomainError) {
    if let DomainError::Order(OrderError::NotFound { reason }) = error {
        tracing::debug!(?reason, "order reported as not found");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{CommentUpdate, OrderDetails, OrderStatus};
    use event_store::InMemoryEventStore;

    fn service() -> OrderService<InMemoryEventStore> {
        OrderService::new(InMemoryEventStore::new())
    }

    async fn place(svc: &OrderService<InMemoryEventStore>, creator: UserId) -> AggregateId {
        let cmd = PlaceOrder::by(creator, OrderDetails::new("Main St 1", "Side St 2"));
        let order_id = cmd.order_id;
        svc.place_order(cmd).await.unwrap();
        order_id
    }

    #[tokio::test]
    async fn lifecycle_reaches_finished() {
        let svc = service();
        let customer = UserId::new();
        let driver = UserId::new();
        let order_id = place(&svc, customer).await;

        svc.apply(ApplyForOrder::new(order_id, driver)).await.unwrap();
        svc.assign_driver(AssignDriver::new(order_id, customer, driver))
            .await
            .unwrap();
        let result = svc.finish(FinishOrder::new(order_id, driver)).await.unwrap();

        assert_eq!(result.aggregate.status(), OrderStatus::Finished);
        assert_eq!(result.aggregate.driver_id(), Some(driver));
    }

    #[tokio::test]
    async fn idempotent_apply_does_not_bump_revision() {
        let svc = service();
        let order_id = place(&svc, UserId::new()).await;
        let driver = UserId::new();

        let first = svc.apply(ApplyForOrder::new(order_id, driver)).await.unwrap();
        let second = svc.apply(ApplyForOrder::new(order_id, driver)).await.unwrap();

        assert_eq!(first.new_version, second.new_version);
        assert_eq!(second.aggregate.applicants(), &[driver]);
    }

    #[tokio::test]
    async fn get_hides_orders_from_strangers() {
        let svc = service();
        let customer = UserId::new();
        let order_id = place(&svc, customer).await;

        assert!(svc.get(order_id, customer).await.is_ok());
        let err = svc.get(order_id, UserId::new()).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
        assert_eq!(err.to_string(), "Order not found!");
    }

    #[tokio::test]
    async fn comment_update_is_persisted() {
        let svc = service();
        let customer = UserId::new();
        let order_id = place(&svc, customer).await;

        svc.update_comment(UpdateComment::new(
            order_id,
            customer,
            CommentUpdate::new(Some("fragile".into())),
        ))
        .await
        .unwrap();

        let order = svc.load(order_id).await.unwrap();
        assert_eq!(order.details().comment.as_deref(), Some("fragile"));
    }

    #[tokio::test]
    async fn deleted_orders_are_gone() {
        let svc = service();
        let customer = UserId::new();
        let order_id = place(&svc, customer).await;

        svc.delete(DeleteOrder::new(order_id, customer)).await.unwrap();

        assert!(svc.find(order_id).await.unwrap().is_none());
        let err = svc.get(order_id, customer).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn cascade_removes_only_the_creators_orders() {
        let svc = service();
        let leaving = UserId::new();
        let staying = UserId::new();
        let driver = UserId::new();

        let mine_new = place(&svc, leaving).await;
        let mine_assigned = place(&svc, leaving).await;
        let theirs = place(&svc, staying).await;

        svc.apply(ApplyForOrder::new(mine_assigned, driver))
            .await
            .unwrap();
        svc.assign_driver(AssignDriver::new(mine_assigned, leaving, driver))
            .await
            .unwrap();

        let mut work = UnitOfWork::new();
        let mut removed = svc
            .stage_removal_of_created(&mut work, leaving)
            .await
            .unwrap();
        assert!(svc.find(mine_new).await.unwrap().is_some());
        work.commit(svc.handler().store()).await.unwrap();
        removed.sort();
        let mut expected = vec![mine_new, mine_assigned];
        expected.sort();

        assert_eq!(removed, expected);
        assert!(svc.find(theirs).await.unwrap().is_some());
        assert!(svc.find(mine_assigned).await.unwrap().is_none());
    }
}
