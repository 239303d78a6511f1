//! Chat aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use event_store::Version;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::Aggregate;

use super::{ChatError, ChatEvent};

const CHAT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d_2b3e_7a41_4c55_9b2e_0c1a_5d3f_8e10);

/// One chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: AggregateId,
    pub sender_id: UserId,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// The conversation between one driver and one customer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chat {
    id: Option<AggregateId>,
    #[serde(default)]
    version: Version,
    driver_id: Option<UserId>,
    customer_id: Option<UserId>,
    messages: Vec<Message>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for Chat {
    type Event = ChatEvent;
    type Error = ChatError;

    fn aggregate_type() -> &'static str {
        "Chat"
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
        match event {
            ChatEvent::ChatStarted {
                chat_id,
                driver_id,
                customer_id,
                started_at,
            } => {
                self.id = Some(chat_id);
                self.driver_id = Some(driver_id);
                self.customer_id = Some(customer_id);
                self.created_at = Some(started_at);
                self.updated_at = Some(started_at);
            }
            ChatEvent::MessagePosted(message) => {
                self.updated_at = Some(message.sent_at);
                self.messages.push(message);
            }
        }
    }
}

impl Chat {
    /// Stream id of the chat between `driver_id` and `customer_id`.
    ///
    /// Each pair has exactly one chat.
    pub fn id_for(driver_id: UserId, customer_id: UserId) -> AggregateId {
        AggregateId::named(&CHAT_NAMESPACE, &format!("{driver_id}:{customer_id}"))
    }

    pub fn driver_id(&self) -> Option<UserId> {
        self.driver_id
    }

    pub fn customer_id(&self) -> Option<UserId> {
        self.customer_id
    }

    /// Messages in the order they were posted.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.driver_id == Some(user_id) || self.customer_id == Some(user_id)
    }

    /// Checks that `actor` is one of the two participants.
    pub fn visible_to(&self, actor: UserId) -> Result<&Self, ChatError> {
        if self.id.is_none() {
            return Err(ChatError::NotFound);
        }
        if !self.is_participant(actor) {
            return Err(ChatError::NotParticipant);
        }
        Ok(self)
    }

    /// Opens the chat. Starting an existing chat again is a no-op.
    pub fn start(
        &self,
        driver_id: UserId,
        customer_id: UserId,
    ) -> Result<Vec<ChatEvent>, ChatError> {
        if driver_id == customer_id {
            return Err(ChatError::SameParticipant);
        }
        if self.id.is_some() {
            return Ok(vec![]);
        }
        Ok(vec![ChatEvent::ChatStarted {
            chat_id: Self::id_for(driver_id, customer_id),
            driver_id,
            customer_id,
            started_at: Utc::now(),
        }])
    }

    /// Appends a message. The text is trimmed and must not end up empty.
    pub fn post(&self, sender_id: UserId, text: &str) -> Result<Vec<ChatEvent>, ChatError> {
        let chat_id = self.visible_to(sender_id)?.id.ok_or(ChatError::NotFound)?;

        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        Ok(vec![ChatEvent::MessagePosted(Message {
            id: Uuid::new_v4(),
            chat_id,
            sender_id,
            text: text.to_string(),
            sent_at: Utc::now(),
        })])
    }
}
