//! Chat domain events.

use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    ChatStarted {
        chat_id: AggregateId,
        driver_id: UserId,
        customer_id: UserId,
        started_at: DateTime<Utc>,
    },
    MessagePosted(Message),
}

impl DomainEvent for ChatEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::ChatStarted { .. } => "ChatStarted",
            ChatEvent::MessagePosted(_) => "MessagePosted",
        }
    }
}
