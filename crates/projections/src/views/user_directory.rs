//! Public user directory.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::UserId;
use domain::user::UserEvent;
use domain::{Aggregate, Profile, User};
use event_store::EventEnvelope;
use tokio::sync::RwLock;

use crate::projection::{Checkpoint, Projection};
use crate::{ProjectionError, Result};

/// Public fields of a registered user. Credentials and sessions stay out.
#[derive(Debug, Clone)]
pub struct UserCard {
    pub user_id: UserId,
    pub profile: Profile,
    pub phone_number: String,
    pub image_path: Option<String>,
    pub ratings: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserCard {
    /// Mean of the received ratings, if any.
    pub fn total_rating(&self) -> Option<f64> {
        if self.ratings.is_empty() {
            return None;
        }
        let sum: u32 = self.ratings.iter().map(|r| u32::from(*r)).sum();
        Some(f64::from(sum) / self.ratings.len() as f64)
    }

    /// Card for a user rebuilt from its stream. `None` if never registered.
    pub fn from_user(user: &User) -> Option<Self> {
        Some(Self {
            user_id: user.user_id()?,
            profile: user.profile().clone(),
            phone_number: user.phone_number().to_string(),
            image_path: user.image_path().map(str::to_string),
            ratings: user.ratings().iter().map(|r| r.value()).collect(),
            created_at: user.created_at()?,
            updated_at: user.updated_at()?,
        })
    }
}

#[derive(Clone)]
pub struct UserDirectoryView {
    users: Arc<RwLock<HashMap<UserId, UserCard>>>,
    checkpoint: Arc<RwLock<Checkpoint>>,
}

impl UserDirectoryView {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
            checkpoint: Arc::new(RwLock::new(Checkpoint::START)),
        }
    }

    pub async fn get(&self, user_id: UserId) -> Option<UserCard> {
        self.users.read().await.get(&user_id).cloned()
    }

    /// Registered users in sign-up order.
    pub async fn list(&self) -> Vec<UserCard> {
        let mut cards: Vec<UserCard> = self.users.read().await.values().cloned().collect();
        cards.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        cards
    }
}

impl Default for UserDirectoryView {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Projection for UserDirectoryView {
    fn name(&self) -> &'static str {
        "UserDirectoryView"
    }

    fn source(&self) -> &'static str {
        User::aggregate_type()
    }

    async fn apply(&self, event: &EventEnvelope) -> Result<()> {
        let user_event: UserEvent = serde_json::from_value(event.payload.clone())
            .map_err(|e| ProjectionError::decode(self.name(), event, e))?;
        let user_id = UserId::from(event.aggregate_id);

        {
            let mut users = self.users.write().await;
            match user_event {
                UserEvent::UserRegistered(data) => {
                    users.entry(user_id).or_insert_with(|| UserCard {
                        user_id,
                        profile: data.profile,
                        phone_number: data.phone_number,
                        image_path: None,
                        ratings: Vec::new(),
                        created_at: data.registered_at,
                        updated_at: data.registered_at,
                    });
                }
                UserEvent::ProfileChanged(data) => {
                    if let Some(card) = users.get_mut(&user_id) {
                        card.profile = data.profile;
                        card.updated_at = data.changed_at;
                    }
                }
                UserEvent::AvatarSet { image_path, set_at } => {
                    if let Some(card) = users.get_mut(&user_id) {
                        card.image_path = Some(image_path);
                        card.updated_at = set_at;
                    }
                }
                UserEvent::AvatarRemoved { removed_at } => {
                    if let Some(card) = users.get_mut(&user_id) {
                        card.image_path = None;
                        card.updated_at = removed_at;
                    }
                }
                UserEvent::RatingReceived {
                    rating,
                    received_at,
                    ..
                } => {
                    if let Some(card) = users.get_mut(&user_id) {
                        card.ratings.push(rating.value());
                        card.updated_at = received_at;
                    }
                }
                UserEvent::UserDeleted { .. } => {
                    users.remove(&user_id);
                }
                // Credential and session changes are not public.
                UserEvent::PasswordChanged { .. }
                | UserEvent::SessionOpened { .. }
                | UserEvent::SessionClosed { .. } => {}
            }
        }

        Ok(())
    }

    async fn checkpoint(&self) -> Checkpoint {
        *self.checkpoint.read().await
    }

    async fn save_checkpoint(&self, checkpoint: Checkpoint) {
        *self.checkpoint.write().await = checkpoint;
    }

    async fn reset(&self) -> Result<()> {
        self.users.write().await.clear();
        *self.checkpoint.write().await = Checkpoint::START;
        Ok(())
    }
}
