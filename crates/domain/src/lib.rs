//! Domain layer of the delivery marketplace.
//!
//! Orders, users, claims and chats are event-sourced aggregates. Services
//! decide commands against the current revision of a record and append the
//! resulting events with optimistic concurrency:
//! - [`OrderService`] runs the order lifecycle `New → In Progress → Finished`
//! - [`FeedbackService`] closes an order and rates its driver in one append
//! - [`IdentityService`] owns registration, sessions and account deletion
//! - [`ChatService`] stores chats and relays messages through [`ChatRelay`]

pub mod aggregate;
pub mod chat;
pub mod command;
pub mod error;
pub mod feedback;
pub mod order;
pub mod user;

pub use aggregate::{Aggregate, DomainEvent, SnapshotCapable};
pub use chat::{Chat, ChatError, ChatEvent, ChatRelay, ChatService, Message};
pub use command::{Command, CommandHandler, CommandResult, MAX_ATTEMPTS, UnitOfWork};
pub use error::{DomainError, ErrorKind};
pub use feedback::{ClosedOrder, FeedbackService};
pub use order::{
    ApplyForOrder, AssignDriver, AttachOrderImage, CloseOrder, CommentUpdate, DeleteOrder,
    FinishOrder, NotFoundReason, Order, OrderDetails, OrderError, OrderEvent, OrderService,
    OrderStatus, PlaceOrder, Rating, UpdateComment,
};
pub use user::{
    Credentials, IdentityService, Profile, ProfileUpdate, Registration, Session, SessionToken,
    User, UserError,
};
