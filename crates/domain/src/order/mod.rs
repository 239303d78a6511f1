//! Delivery orders and their lifecycle.

mod aggregate;
mod commands;
mod events;
mod service;
mod state;
mod value_objects;

pub use aggregate::{Closing, Order};
pub use commands::*;
pub use events::{
    ApplicantAddedData, CommentUpdatedData, DriverAssignedData, ImageAttachedData,
    OrderClosedData, OrderDeletedData, OrderEvent, OrderFinishedData, OrderPlacedData,
};
pub use service::OrderService;
pub(crate) use service::log_hidden_reason;
pub use state::OrderStatus;
pub use value_objects::{CommentUpdate, OrderDetails, Rating};

use thiserror::Error;

use crate::error::ErrorKind;

/// Why an order lookup was reported as missing.
///
/// Logged, never shown: callers see the same message for every reason so an
/// order's existence does not leak to people who may not act on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    /// No such order, or it was deleted.
    Missing,
    /// The creator tried to act as a driver on their own order.
    SelfApplication,
    /// A creator-only action by someone else.
    NotCreator,
    /// Neither the creator nor the assigned driver.
    NotParticipant,
}

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order not found!")]
    NotFound { reason: NotFoundReason },

    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("Invalid updates!")]
    InvalidUpdates,

    #[error("Rating must be a whole number from 1 to 5, got {value}")]
    InvalidRating { value: i64 },

    #[error("Order already assigned to a driver")]
    AlreadyAssigned,

    #[error("User is not an applicant for this order")]
    NotAnApplicant,

    #[error("Only the assigned driver can finish this order")]
    DriverMismatch,

    #[error("This order is already closed")]
    AlreadyClosed,

    #[error("Cannot {action} an order that is {status}")]
    InvalidTransition {
        status: OrderStatus,
        action: &'static str,
    },

    #[error("Order already created")]
    AlreadyCreated,
}

impl OrderError {
    pub(crate) fn not_found(reason: NotFoundReason) -> Self {
        OrderError::NotFound { reason }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            OrderError::NotFound { .. } => ErrorKind::NotFound,
            OrderError::MissingField { .. }
            | OrderError::InvalidUpdates
            | OrderError::InvalidRating { .. } => ErrorKind::Validation,
            OrderError::AlreadyAssigned
            | OrderError::NotAnApplicant
            | OrderError::DriverMismatch
            | OrderError::AlreadyClosed
            | OrderError::InvalidTransition { .. }
            | OrderError::AlreadyCreated => ErrorKind::Conflict,
        }
    }
}
