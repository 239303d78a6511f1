//! Shared identifier types used across the marketplace crates.

mod types;

pub use types::{AggregateId, UserId};
