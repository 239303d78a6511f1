//! Order commands.

use common::{AggregateId, UserId};

use crate::command::Command;

use super::{CommentUpdate, Order, OrderDetails};

/// A customer posts a new order.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub order_id: AggregateId,
    pub creator: UserId,
    pub details: OrderDetails,
}

impl PlaceOrder {
    pub fn new(order_id: AggregateId, creator: UserId, details: OrderDetails) -> Self {
        Self {
            order_id,
            creator,
            details,
        }
    }

    /// Places an order under a freshly generated id.
    pub fn by(creator: UserId, details: OrderDetails) -> Self {
        Self::new(AggregateId::new(), creator, details)
    }
}

impl Command for PlaceOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// A driver offers to carry an order.
#[derive(Debug, Clone)]
pub struct ApplyForOrder {
    pub order_id: AggregateId,
    pub driver_id: UserId,
}

impl ApplyForOrder {
    pub fn new(order_id: AggregateId, driver_id: UserId) -> Self {
        Self {
            order_id,
            driver_id,
        }
    }
}

impl Command for ApplyForOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// The creator picks one applicant as the driver.
#[derive(Debug, Clone)]
pub struct AssignDriver {
    pub order_id: AggregateId,
    pub actor: UserId,
    pub driver_id: UserId,
}

impl AssignDriver {
    pub fn new(order_id: AggregateId, actor: UserId, driver_id: UserId) -> Self {
        Self {
            order_id,
            actor,
            driver_id,
        }
    }
}

impl Command for AssignDriver {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// The assigned driver reports the delivery done.
#[derive(Debug, Clone)]
pub struct FinishOrder {
    pub order_id: AggregateId,
    pub driver_id: UserId,
}

impl FinishOrder {
    pub fn new(order_id: AggregateId, driver_id: UserId) -> Self {
        Self {
            order_id,
            driver_id,
        }
    }
}

impl Command for FinishOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

/// The creator rates the driver and closes the order.
///
/// The rating is kept raw so it is validated with the rest of the command.
#[derive(Debug, Clone)]
pub struct CloseOrder {
    pub order_id: AggregateId,
    pub actor: UserId,
    pub rating: i64,
}

impl CloseOrder {
    pub fn new(order_id: AggregateId, actor: UserId, rating: i64) -> Self {
        Self {
            order_id,
            actor,
            rating,
        }
    }
}

impl Command for CloseOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

#[derive(Debug, Clone)]
pub struct UpdateComment {
    pub order_id: AggregateId,
    pub actor: UserId,
    pub update: CommentUpdate,
}

impl UpdateComment {
    pub fn new(order_id: AggregateId, actor: UserId, update: CommentUpdate) -> Self {
        Self {
            order_id,
            actor,
            update,
        }
    }
}

impl Command for UpdateComment {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

#[derive(Debug, Clone)]
pub struct AttachOrderImage {
    pub order_id: AggregateId,
    pub actor: UserId,
    pub image_path: String,
}

impl AttachOrderImage {
    /// Attaches the picture served at the order's conventional path.
    pub fn new(order_id: AggregateId, actor: UserId) -> Self {
        Self {
            order_id,
            actor,
            image_path: format!("/orders/{order_id}/order-pic"),
        }
    }
}

impl Command for AttachOrderImage {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}

#[derive(Debug, Clone)]
pub struct DeleteOrder {
    pub order_id: AggregateId,
    pub actor: UserId,
}

impl DeleteOrder {
    pub fn new(order_id: AggregateId, actor: UserId) -> Self {
        Self { order_id, actor }
    }
}

impl Command for DeleteOrder {
    type Aggregate = Order;

    fn aggregate_id(&self) -> AggregateId {
        self.order_id
    }
}
