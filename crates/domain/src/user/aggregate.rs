//! User aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, SnapshotCapable};
use crate::order::Rating;

use super::{
    Profile, ProfileUpdate, Registration, UserError, UserEvent,
    events::{ProfileChangedData, UserRegisteredData},
};

/// A registered customer or driver.
///
/// Token churn makes user streams long, so users are snapshotted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct User {
    id: Option<UserId>,

    #[serde(default)]
    version: Version,

    profile: Profile,
    phone_number: String,
    password_hash: String,
    /// SHA-256 digests of live session tokens.
    sessions: Vec<String>,
    ratings: Vec<Rating>,
    image_path: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    deleted: bool,
}

impl Aggregate for User {
    type Event = UserEvent;
    type Error = UserError;

    fn aggregate_type() -> &'static str {
        "User"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id.map(AggregateId::from)
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        if event.touches_profile() {
            self.updated_at = Some(event.occurred_at());
        }
        match event {
            UserEvent::UserRegistered(data) => self.apply_registered(data),
            UserEvent::ProfileChanged(data) => self.profile = data.profile,
            UserEvent::PasswordChanged { password_hash, .. } => {
                self.password_hash = password_hash;
            }
            UserEvent::SessionOpened { token_digest, .. } => self.sessions.push(token_digest),
            UserEvent::SessionClosed { token_digest, .. } => {
                self.sessions.retain(|d| d != &token_digest);
            }
            UserEvent::AvatarSet { image_path, .. } => self.image_path = Some(image_path),
            UserEvent::AvatarRemoved { .. } => self.image_path = None,
            UserEvent::RatingReceived { rating, .. } => self.ratings.push(rating),
            UserEvent::UserDeleted { .. } => {
                self.deleted = true;
                self.sessions.clear();
            }
        }
    }
}

impl SnapshotCapable for User {
    fn snapshot_interval() -> usize {
        50
    }
}

// Query methods
impl User {
    pub fn exists(&self) -> bool {
        self.id.is_some() && !self.deleted
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.id
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    pub fn password_hash(&self) -> &str {
        &self.password_hash
    }

    pub fn has_session(&self, token_digest: &str) -> bool {
        self.sessions.iter().any(|d| d == token_digest)
    }

    pub fn sessions(&self) -> &[String] {
        &self.sessions
    }

    /// Ratings received as a driver, oldest first.
    pub fn ratings(&self) -> &[Rating] {
        &self.ratings
    }

    /// Mean of all ratings, or None before the first one.
    pub fn total_rating(&self) -> Option<f64> {
        if self.ratings.is_empty() {
            return None;
        }
        let sum: u32 = self.ratings.iter().map(|r| u32::from(r.value())).sum();
        Some(f64::from(sum) / self.ratings.len() as f64)
    }

    pub fn image_path(&self) -> Option<&str> {
        self.image_path.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    fn ensure_exists(&self) -> Result<(), UserError> {
        if self.exists() {
            Ok(())
        } else {
            Err(UserError::NotFound)
        }
    }
}

// Command methods (return events)
impl User {
    /// Creates the user with its first session.
    ///
    /// `registration` must already be validated and the password hashed.
    pub fn register(
        &self,
        user_id: UserId,
        registration: &Registration,
        password_hash: &str,
        token_digest: &str,
    ) -> Result<Vec<UserEvent>, UserError> {
        if self.id.is_some() {
            return Err(UserError::AlreadyRegistered);
        }

        let now = Utc::now();
        Ok(vec![
            UserEvent::UserRegistered(UserRegisteredData {
                user_id,
                profile: registration.profile(),
                phone_number: registration.phone_number.clone(),
                password_hash: password_hash.to_string(),
                registered_at: now,
            }),
            UserEvent::SessionOpened {
                token_digest: token_digest.to_string(),
                opened_at: now,
            },
        ])
    }

    pub fn open_session(&self, token_digest: &str) -> Result<Vec<UserEvent>, UserError> {
        self.ensure_exists()?;
        Ok(vec![UserEvent::SessionOpened {
            token_digest: token_digest.to_string(),
            opened_at: Utc::now(),
        }])
    }

    /// Revokes one session. Unknown digests are ignored.
    pub fn close_session(&self, token_digest: &str) -> Result<Vec<UserEvent>, UserError> {
        self.ensure_exists()?;
        if !self.has_session(token_digest) {
            return Ok(vec![]);
        }
        Ok(vec![UserEvent::SessionClosed {
            token_digest: token_digest.to_string(),
            closed_at: Utc::now(),
        }])
    }

    /// Revokes every session.
    pub fn close_all_sessions(&self) -> Result<Vec<UserEvent>, UserError> {
        self.ensure_exists()?;
        let closed_at = Utc::now();
        Ok(self
            .sessions
            .iter()
            .map(|digest| UserEvent::SessionClosed {
                token_digest: digest.clone(),
                closed_at,
            })
            .collect())
    }

    /// Applies a validated profile edit.
    ///
    /// A new password arrives already hashed as `password_hash`.
    pub fn update_profile(
        &self,
        update: &ProfileUpdate,
        password_hash: Option<&str>,
    ) -> Result<Vec<UserEvent>, UserError> {
        self.ensure_exists()?;

        let mut events = Vec::new();
        let profile = update.apply_to(&self.profile);
        if profile != self.profile {
            events.push(UserEvent::ProfileChanged(ProfileChangedData {
                profile,
                changed_at: Utc::now(),
            }));
        }
        if let Some(hash) = password_hash {
            events.push(UserEvent::PasswordChanged {
                password_hash: hash.to_string(),
                changed_at: Utc::now(),
            });
        }
        Ok(events)
    }

    pub fn set_avatar(&self, image_path: impl Into<String>) -> Result<Vec<UserEvent>, UserError> {
        self.ensure_exists()?;
        Ok(vec![UserEvent::AvatarSet {
            image_path: image_path.into(),
            set_at: Utc::now(),
        }])
    }

    pub fn remove_avatar(&self) -> Result<Vec<UserEvent>, UserError> {
        self.ensure_exists()?;
        if self.image_path.is_none() {
            return Ok(vec![]);
        }
        Ok(vec![UserEvent::AvatarRemoved {
            removed_at: Utc::now(),
        }])
    }

    /// Records a rating left on a closed order this user drove.
    pub fn receive_rating(
        &self,
        order_id: AggregateId,
        rating: Rating,
    ) -> Result<Vec<UserEvent>, UserError> {
        self.ensure_exists()?;
        Ok(vec![UserEvent::RatingReceived {
            order_id,
            rating,
            received_at: Utc::now(),
        }])
    }

    pub fn delete(&self) -> Result<Vec<UserEvent>, UserError> {
        self.ensure_exists()?;
        Ok(vec![UserEvent::UserDeleted {
            deleted_at: Utc::now(),
        }])
    }
}

// Apply event helpers
impl User {
    fn apply_registered(&mut self, data: UserRegisteredData) {
        self.id = Some(data.user_id);
        self.profile = data.profile;
        self.phone_number = data.phone_number;
        self.password_hash = data.password_hash;
        self.created_at = Some(data.registered_at);
    }
}
