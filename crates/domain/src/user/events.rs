//! User domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;
use crate::order::Rating;

use super::Profile;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum UserEvent {
    UserRegistered(UserRegisteredData),
    ProfileChanged(ProfileChangedData),
    PasswordChanged {
        password_hash: String,
        changed_at: DateTime<Utc>,
    },
    SessionOpened {
        token_digest: String,
        opened_at: DateTime<Utc>,
    },
    SessionClosed {
        token_digest: String,
        closed_at: DateTime<Utc>,
    },
    AvatarSet {
        image_path: String,
        set_at: DateTime<Utc>,
    },
    AvatarRemoved {
        removed_at: DateTime<Utc>,
    },
    /// A customer rated this user as the driver of `order_id`.
    RatingReceived {
        order_id: AggregateId,
        rating: Rating,
        received_at: DateTime<Utc>,
    },
    UserDeleted {
        deleted_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRegisteredData {
    pub user_id: UserId,
    pub profile: Profile,
    pub phone_number: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileChangedData {
    pub profile: Profile,
    pub changed_at: DateTime<Utc>,
}

impl DomainEvent for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::UserRegistered(_) => "UserRegistered",
            UserEvent::ProfileChanged(_) => "ProfileChanged",
            UserEvent::PasswordChanged { .. } => "PasswordChanged",
            UserEvent::SessionOpened { .. } => "SessionOpened",
            UserEvent::SessionClosed { .. } => "SessionClosed",
            UserEvent::AvatarSet { .. } => "AvatarSet",
            UserEvent::AvatarRemoved { .. } => "AvatarRemoved",
            UserEvent::RatingReceived { .. } => "RatingReceived",
            UserEvent::UserDeleted { .. } => "UserDeleted",
        }
    }
}

impl UserEvent {
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserEvent::UserRegistered(d) => d.registered_at,
            UserEvent::ProfileChanged(d) => d.changed_at,
            UserEvent::PasswordChanged { changed_at, .. } => *changed_at,
            UserEvent::SessionOpened { opened_at, .. } => *opened_at,
            UserEvent::SessionClosed { closed_at, .. } => *closed_at,
            UserEvent::AvatarSet { set_at, .. } => *set_at,
            UserEvent::AvatarRemoved { removed_at } => *removed_at,
            UserEvent::RatingReceived { received_at, .. } => *received_at,
            UserEvent::UserDeleted { deleted_at } => *deleted_at,
        }
    }

    /// Session bookkeeping does not count as a profile change.
    pub fn touches_profile(&self) -> bool {
        !matches!(
            self,
            UserEvent::SessionOpened { .. } | UserEvent::SessionClosed { .. }
        )
    }
}
