//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, SnapshotCapable};

use super::{
    CommentUpdate, NotFoundReason, OrderDetails, OrderError, OrderEvent, OrderStatus, Rating,
    events::OrderPlacedData,
};

/// What closing an order decided: the events plus the driver to credit.
#[derive(Debug, Clone)]
pub struct Closing {
    pub driver_id: UserId,
    pub rating: Rating,
    pub events: Vec<OrderEvent>,
}

/// Order aggregate root.
///
/// Invariants held by the command methods below:
/// - `creator` is set once by `OrderPlaced` and never changes;
/// - `driver_id` is set once by `DriverAssigned`;
/// - `applicants` holds each driver at most once, newest first;
/// - `status` only moves forward.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    creator: Option<UserId>,
    driver_id: Option<UserId>,
    status: OrderStatus,
    details: OrderDetails,
    applicants: Vec<UserId>,
    image_path: Option<String>,
    rating: Option<Rating>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    deleted: bool,
}

impl Aggregate for Order {
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "Order"
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
        self.updated_at = Some(event.occurred_at());
        match event {
            OrderEvent::OrderPlaced(data) => self.apply_order_placed(data),
            OrderEvent::ApplicantAdded(data) => {
                if !self.applicants.contains(&data.driver_id) {
                    self.applicants.insert(0, data.driver_id);
                }
            }
            OrderEvent::DriverAssigned(data) => {
                self.driver_id = Some(data.driver_id);
                self.status = OrderStatus::InProgress;
            }
            OrderEvent::OrderFinished(_) => {
                self.status = OrderStatus::Finished;
            }
            OrderEvent::OrderClosed(data) => {
                self.rating = Some(data.rating);
                self.status = OrderStatus::Closed;
            }
            OrderEvent::CommentUpdated(data) => {
                self.details.comment = data.comment;
            }
            OrderEvent::ImageAttached(data) => {
                self.image_path = Some(data.image_path);
            }
            OrderEvent::OrderDeleted(_) => {
                self.deleted = true;
            }
        }
    }
}

impl SnapshotCapable for Order {
    fn snapshot_interval() -> usize {
        50
    }
}

// Query methods
impl Order {
    /// True if the order was placed and not deleted.
    pub fn exists(&self) -> bool {
        self.id.is_some() && !self.deleted
    }

    pub fn creator(&self) -> Option<UserId> {
        self.creator
    }

    pub fn driver_id(&self) -> Option<UserId> {
        self.driver_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn details(&self) -> &OrderDetails {
        &self.details
    }

    /// Applicants, most recent first.
    pub fn applicants(&self) -> &[UserId] {
        &self.applicants
    }

    pub fn is_applicant(&self, driver_id: UserId) -> bool {
        self.applicants.contains(&driver_id)
    }

    pub fn image_path(&self) -> Option<&str> {
        self.image_path.as_deref()
    }

    /// Rating the customer left when closing.
    pub fn rating(&self) -> Option<Rating> {
        self.rating
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    /// Checks that `actor` may read this order: its creator or assigned driver.
    pub fn visible_to(&self, actor: UserId) -> Result<&Self, OrderError> {
        self.ensure_exists()?;
        if self.creator == Some(actor) || self.driver_id == Some(actor) {
            Ok(self)
        } else {
            Err(OrderError::not_found(NotFoundReason::NotParticipant))
        }
    }

    fn ensure_exists(&self) -> Result<(), OrderError> {
        if self.exists() {
            Ok(())
        } else {
            Err(OrderError::not_found(NotFoundReason::Missing))
        }
    }

    fn ensure_creator(&self, actor: UserId) -> Result<(), OrderError> {
        self.ensure_exists()?;
        if self.creator == Some(actor) {
            Ok(())
        } else {
            Err(OrderError::not_found(NotFoundReason::NotCreator))
        }
    }

    fn ensure_not_creator(&self, driver_id: UserId) -> Result<(), OrderError> {
        if self.creator == Some(driver_id) {
            Err(OrderError::not_found(NotFoundReason::SelfApplication))
        } else {
            Ok(())
        }
    }
}

// Command methods (return events)
impl Order {
    /// Places a new order for `creator`.
    pub fn place(
        &self,
        order_id: AggregateId,
        creator: UserId,
        details: OrderDetails,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() {
            return Err(OrderError::AlreadyCreated);
        }

        let details = details.normalized()?;
        Ok(vec![OrderEvent::order_placed(order_id, creator, details)])
    }

    /// Adds `driver_id` to the front of the applicant list.
    ///
    /// Applying again is a no-op that returns no events.
    pub fn add_applicant(&self, driver_id: UserId) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_exists()?;
        self.ensure_not_creator(driver_id)?;

        if self.is_applicant(driver_id) {
            return Ok(vec![]);
        }

        if !self.status.accepts_applicants() {
            return Err(OrderError::InvalidTransition {
                status: self.status,
                action: "apply to",
            });
        }

        Ok(vec![OrderEvent::applicant_added(driver_id)])
    }

    /// Picks one of the applicants as the order's driver.
    pub fn assign_driver(
        &self,
        actor: UserId,
        driver_id: UserId,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_exists()?;
        self.ensure_not_creator(driver_id)?;
        self.ensure_creator(actor)?;

        if self.driver_id.is_some() {
            return Err(OrderError::AlreadyAssigned);
        }

        if !self.is_applicant(driver_id) {
            return Err(OrderError::NotAnApplicant);
        }

        if !self.status.can_assign() {
            return Err(OrderError::InvalidTransition {
                status: self.status,
                action: "assign a driver to",
            });
        }

        Ok(vec![OrderEvent::driver_assigned(driver_id)])
    }

    /// The assigned driver reports the delivery done.
    pub fn finish(&self, driver_id: UserId) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_exists()?;
        self.ensure_not_creator(driver_id)?;

        if !self.is_applicant(driver_id) {
            return Err(OrderError::NotAnApplicant);
        }

        if !self.status.can_finish() {
            return Err(OrderError::InvalidTransition {
                status: self.status,
                action: "finish",
            });
        }

        if self.driver_id != Some(driver_id) {
            return Err(OrderError::DriverMismatch);
        }

        Ok(vec![OrderEvent::order_finished(driver_id)])
    }

    /// The creator rates the driver, closing the order.
    ///
    /// The caller must record the rating on the driver in the same append.
    pub fn close(&self, actor: UserId, rating: i64) -> Result<Closing, OrderError> {
        self.ensure_creator(actor)?;

        if self.status == OrderStatus::Closed {
            return Err(OrderError::AlreadyClosed);
        }

        if !self.status.can_close() {
            return Err(OrderError::InvalidTransition {
                status: self.status,
                action: "close",
            });
        }

        let rating = Rating::new(rating)?;
        let driver_id = self
            .driver_id
            .ok_or(OrderError::InvalidTransition {
                status: self.status,
                action: "close",
            })?;

        Ok(Closing {
            driver_id,
            rating,
            events: vec![OrderEvent::order_closed(driver_id, rating)],
        })
    }

    /// Edits the order's comment.
    pub fn update_comment(
        &self,
        actor: UserId,
        update: CommentUpdate,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_creator(actor)?;

        if self.status.is_terminal() {
            return Err(OrderError::InvalidTransition {
                status: self.status,
                action: "edit",
            });
        }

        match update.comment {
            Some(comment) if comment != self.details.comment => {
                Ok(vec![OrderEvent::comment_updated(comment)])
            }
            _ => Ok(vec![]),
        }
    }

    /// Records that a picture was uploaded for the order.
    pub fn attach_image(
        &self,
        actor: UserId,
        image_path: impl Into<String>,
    ) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_creator(actor)?;
        Ok(vec![OrderEvent::image_attached(image_path)])
    }

    /// The creator withdraws the order. Only allowed while it is still `New`.
    pub fn delete(&self, actor: UserId) -> Result<Vec<OrderEvent>, OrderError> {
        self.ensure_creator(actor)?;

        if !self.status.can_delete() {
            return Err(OrderError::InvalidTransition {
                status: self.status,
                action: "delete",
            });
        }

        Ok(vec![OrderEvent::order_deleted(false)])
    }

    /// Removes the order because its creator deleted their account.
    ///
    /// Applies in any status. Already deleted orders produce no events.
    pub fn delete_for_account(&self, creator: UserId) -> Result<Vec<OrderEvent>, OrderError> {
        if self.id.is_some() && self.deleted {
            return Ok(vec![]);
        }
        self.ensure_creator(creator)?;
        Ok(vec![OrderEvent::order_deleted(true)])
    }
}

// Apply event helpers
impl Order {
    fn apply_order_placed(&mut self, data: OrderPlacedData) {
        self.id = Some(data.order_id);
        self.creator = Some(data.creator);
        self.details = data.details;
        self.status = OrderStatus::New;
        self.created_at = Some(data.placed_at);
    }
}
