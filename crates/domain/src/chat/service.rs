//! Chat operations.

use std::sync::Arc;

use common::{AggregateId, UserId};
use event_store::EventStore;
use tokio::sync::broadcast;

use crate::command::CommandHandler;
use crate::error::DomainError;
use crate::user::User;

use super::{Chat, ChatError, ChatEvent, ChatRelay, Message};

/// Stores chats and hands posted messages to the relay.
pub struct ChatService<S: EventStore> {
    chats: CommandHandler<S, Chat>,
    users: CommandHandler<S, User>,
    relay: Arc<ChatRelay>,
}

impl<S: EventStore + Clone> ChatService<S> {
    pub fn new(store: S, relay: Arc<ChatRelay>) -> Self {
        Self {
            chats: CommandHandler::new(store.clone()),
            users: CommandHandler::new(store),
            relay,
        }
    }
}

impl<S: EventStore> ChatService<S> {
    pub fn relay(&self) -> &Arc<ChatRelay> {
        &self.relay
    }

    /// Opens the chat between a driver and a customer, or returns the
    /// existing one. The actor must be one of the two.
    #[tracing::instrument(skip(self))]
    pub async fn start_chat(
        &self,
        actor: UserId,
        driver_id: UserId,
        customer_id: UserId,
    ) -> Result<Chat, DomainError> {
        if actor != driver_id && actor != customer_id {
            return Err(ChatError::NotParticipant.into());
        }
        for participant in [driver_id, customer_id] {
            let user = self.users.load(participant.into()).await?;
            if !user.exists() {
                return Err(ChatError::UnknownParticipant(participant).into());
            }
        }

        let chat_id = Chat::id_for(driver_id, customer_id);
        let result = self
            .chats
            .execute(chat_id, |chat| chat.start(driver_id, customer_id))
            .await?;

        if !result.events.is_empty() {
            tracing::info!(chat_id = %chat_id, "chat started");
        }
        Ok(result.aggregate)
    }

    /// Stores a message, then relays it to the chat's live sessions.
    #[tracing::instrument(skip(self, text))]
    pub async fn post_message(
        &self,
        chat_id: AggregateId,
        sender_id: UserId,
        text: &str,
    ) -> Result<Message, DomainError> {
        let result = self
            .chats
            .execute(chat_id, |chat| chat.post(sender_id, text))
            .await?;

        let message = result
            .events
            .into_iter()
            .find_map(|event| match event {
                ChatEvent::MessagePosted(message) => Some(message),
                ChatEvent::ChatStarted { .. } => None,
            })
            .ok_or(ChatError::EmptyMessage)?;

        metrics::counter!("chat_messages_total").increment(1);
        self.relay.broadcast(message.clone()).await;
        Ok(message)
    }

    /// Loads a chat for one of its participants.
    #[tracing::instrument(skip(self))]
    pub async fn get_chat(&self, chat_id: AggregateId, actor: UserId) -> Result<Chat, DomainError> {
        let chat = self.chats.load(chat_id).await?;
        chat.visible_to(actor)?;
        Ok(chat)
    }

    /// Joins the live channel of a chat the actor takes part in.
    #[tracing::instrument(skip(self))]
    pub async fn subscribe(
        &self,
        chat_id: AggregateId,
        actor: UserId,
    ) -> Result<broadcast::Receiver<Message>, DomainError> {
        self.get_chat(chat_id, actor).await?;
        Ok(self.relay.subscribe(chat_id).await)
    }
}
