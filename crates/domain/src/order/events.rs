//! Order domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{OrderDetails, Rating};

/// Events recorded on an order stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderEvent {
    OrderPlaced(OrderPlacedData),
    ApplicantAdded(ApplicantAddedData),
    DriverAssigned(DriverAssignedData),
    OrderFinished(OrderFinishedData),
    OrderClosed(OrderClosedData),
    CommentUpdated(CommentUpdatedData),
    ImageAttached(ImageAttachedData),
    OrderDeleted(OrderDeletedData),
}

impl DomainEvent for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "OrderPlaced",
            OrderEvent::ApplicantAdded(_) => "ApplicantAdded",
            OrderEvent::DriverAssigned(_) => "DriverAssigned",
            OrderEvent::OrderFinished(_) => "OrderFinished",
            OrderEvent::OrderClosed(_) => "OrderClosed",
            OrderEvent::CommentUpdated(_) => "CommentUpdated",
            OrderEvent::ImageAttached(_) => "ImageAttached",
            OrderEvent::OrderDeleted(_) => "OrderDeleted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedData {
    pub order_id: AggregateId,
    pub creator: UserId,
    pub details: OrderDetails,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicantAddedData {
    pub driver_id: UserId,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverAssignedData {
    pub driver_id: UserId,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFinishedData {
    pub driver_id: UserId,
    pub finished_at: DateTime<Utc>,
}

/// The customer rated the driver and closed the order.
///
/// Always written together with the matching `RatingReceived` on the
/// driver's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderClosedData {
    pub driver_id: UserId,
    pub rating: Rating,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentUpdatedData {
    pub comment: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAttachedData {
    /// Host-relative path the picture is served from.
    pub image_path: String,
    pub attached_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDeletedData {
    /// Deleted as part of the creator's account removal.
    pub account_removed: bool,
    pub deleted_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn order_placed(order_id: AggregateId, creator: UserId, details: OrderDetails) -> Self {
        OrderEvent::OrderPlaced(OrderPlacedData {
            order_id,
            creator,
            details,
            placed_at: Utc::now(),
        })
    }

    pub fn applicant_added(driver_id: UserId) -> Self {
        OrderEvent::ApplicantAdded(ApplicantAddedData {
            driver_id,
            applied_at: Utc::now(),
        })
    }

    pub fn driver_assigned(driver_id: UserId) -> Self {
        OrderEvent::DriverAssigned(DriverAssignedData {
            driver_id,
            assigned_at: Utc::now(),
        })
    }

    pub fn order_finished(driver_id: UserId) -> Self {
        OrderEvent::OrderFinished(OrderFinishedData {
            driver_id,
            finished_at: Utc::now(),
        })
    }

    pub fn order_closed(driver_id: UserId, rating: Rating) -> Self {
        OrderEvent::OrderClosed(OrderClosedData {
            driver_id,
            rating,
            closed_at: Utc::now(),
        })
    }

    pub fn comment_updated(comment: Option<String>) -> Self {
        OrderEvent::CommentUpdated(CommentUpdatedData {
            comment,
            updated_at: Utc::now(),
        })
    }

    pub fn image_attached(image_path: impl Into<String>) -> Self {
        OrderEvent::ImageAttached(ImageAttachedData {
            image_path: image_path.into(),
            attached_at: Utc::now(),
        })
    }

    pub fn order_deleted(account_removed: bool) -> Self {
        OrderEvent::OrderDeleted(OrderDeletedData {
            account_removed,
            deleted_at: Utc::now(),
        })
    }

    /// When the event happened.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(d) => d.placed_at,
            OrderEvent::ApplicantAdded(d) => d.applied_at,
            OrderEvent::DriverAssigned(d) => d.assigned_at,
            OrderEvent::OrderFinished(d) => d.finished_at,
            OrderEvent::OrderClosed(d) => d.closed_at,
            OrderEvent::CommentUpdated(d) => d.updated_at,
            OrderEvent::ImageAttached(d) => d.attached_at,
            OrderEvent::OrderDeleted(d) => d.deleted_at,
        }
    }
}
