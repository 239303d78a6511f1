//! Driver/customer chats and live fan-out.

mod aggregate;
mod events;
mod relay;
mod service;

pub use aggregate::{Chat, Message};
pub use events::ChatEvent;
pub use relay::ChatRelay;
pub use service::ChatService;

use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Chat not found")]
    NotFound,

    /// Reported like a missing chat so outsiders cannot discover chats.
    #[error("Chat not found")]
    NotParticipant,

    #[error("A chat needs two different participants")]
    SameParticipant,

    #[error("text must not be empty")]
    EmptyMessage,

    #[error("Unknown participant {0}")]
    UnknownParticipant(common::UserId),
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::NotFound | ChatError::NotParticipant => ErrorKind::NotFound,
            ChatError::SameParticipant
            | ChatError::EmptyMessage
            | ChatError::UnknownParticipant(_) => ErrorKind::Validation,
        }
    }
}
