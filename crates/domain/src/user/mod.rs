//! Users, their credentials and sessions.
//!
//! A user is an event stream keyed by its [`UserId`](common::UserId). Keys
//! that must be unique across users (phone numbers, session token digests)
//! are reserved through [`Claim`] streams whose id is derived from the key, so
//! two registrations racing for one phone number collide on the same stream.

mod aggregate;
mod claim;
mod credentials;
mod events;
mod service;
mod value_objects;

pub use aggregate::User;
pub use claim::{Claim, ClaimEvent, ClaimKind};
pub use credentials::{SessionToken, hash_password, verify_password};
pub use events::{ProfileChangedData, UserEvent, UserRegisteredData};
pub use service::{IdentityService, Session};
pub use value_objects::{Credentials, Profile, ProfileUpdate, Registration};

use thiserror::Error;

use crate::error::ErrorKind;

/// Errors raised by identity operations.
#[derive(Debug, Error)]
pub enum UserError {
    /// A field failed validation. The message starts with the field's name.
    #[error("{field} {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error("Invalid updates!")]
    InvalidUpdates,

    #[error("This {kind} is already taken")]
    KeyTaken { kind: ClaimKind },

    #[error("User already registered")]
    AlreadyRegistered,

    #[error("Phone number and password do not match")]
    InvalidCredentials,

    #[error("Please authenticate.")]
    Unauthenticated,

    #[error("User not found")]
    NotFound,

    #[error("Password hashing failed: {0}")]
    Hashing(String),
}

impl UserError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        UserError::Invalid {
            field,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UserError::Invalid { .. } | UserError::InvalidUpdates => ErrorKind::Validation,
            UserError::KeyTaken { .. } | UserError::AlreadyRegistered => ErrorKind::Conflict,
            UserError::InvalidCredentials | UserError::Unauthenticated => ErrorKind::Auth,
            UserError::NotFound => ErrorKind::NotFound,
            UserError::Hashing(_) => ErrorKind::Internal,
        }
    }
}
