//! Read models and projections for the query side.
//!
//! Listings are served from denormalized views kept up to date from the
//! event log:
//! - [`Projection`] folds the streams of one aggregate type into a view
//! - [`ProjectionProcessor`] catches projections up with the store
//! - [`OrderBoardView`] for order listings, [`UserDirectoryView`] for users

pub mod error;
pub mod processor;
pub mod projection;
pub mod views;

pub use error::{ProjectionError, Result};
pub use processor::ProjectionProcessor;
pub use projection::{Checkpoint, Projection};
pub use views::{OrderBoardView, OrderCard, OrderFilter, UserCard, UserDirectoryView};
