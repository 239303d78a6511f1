//! Live delivery of chat messages to connected sessions.

use std::collections::HashMap;

use common::AggregateId;
use tokio::sync::{RwLock, broadcast};

use super::Message;

const DEFAULT_CAPACITY: usize = 64;

/// Per-chat broadcast channels.
///
/// A message is delivered only to the sessions subscribed to its chat.
/// Channels are created on first subscription and dropped once the last
/// subscriber is gone.
pub struct ChatRelay {
    channels: RwLock<HashMap<AggregateId, broadcast::Sender<Message>>>,
    capacity: usize,
}

impl Default for ChatRelay {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ChatRelay {
    /// `capacity` is how many messages a slow subscriber may lag behind.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Joins the channel of `chat_id`.
    pub async fn subscribe(&self, chat_id: AggregateId) -> broadcast::Receiver<Message> {
        let mut channels = self.channels.write().await;
        channels
            .entry(chat_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Sends `message` to the subscribers of its chat.
    ///
    /// Returns how many subscribers it reached.
    pub async fn broadcast(&self, message: Message) -> usize {
        let chat_id = message.chat_id;
        let delivered = {
            let channels = self.channels.read().await;
            match channels.get(&chat_id) {
                Some(sender) => sender.send(message).unwrap_or(0),
                None => 0,
            }
        };

        if delivered == 0 {
            self.release(chat_id).await;
        }
        tracing::debug!(chat_id = %chat_id, delivered, "chat message relayed");
        delivered
    }

    /// Number of sessions currently joined to `chat_id`.
    pub async fn subscriber_count(&self, chat_id: AggregateId) -> usize {
        self.channels
            .read()
            .await
            .get(&chat_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drops the channel of `chat_id` once nobody listens to it.
    ///
    /// Call after a subscriber's receiver has been dropped.
    pub async fn release(&self, chat_id: AggregateId) {
        let mut channels = self.channels.write().await;
        if channels
            .get(&chat_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(&chat_id);
        }
    }
}
