//! Chat endpoints and the live WebSocket channel.

use std::ops::ControlFlow;
use std::sync::Arc;

use axum::Json;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, Utc};
use common::{AggregateId, UserId};
use domain::{Chat, Message, SessionToken};
use event_store::EventStore;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use super::parse_id;
use crate::error::ApiError;
use crate::extract::{ApiJson, AuthUser, authenticate};
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartChatRequest {
    pub driver_id: Option<String>,
    pub customer_id: Option<String>,
}

#[derive(Deserialize)]
pub struct PostMessageRequest {
    #[serde(default)]
    pub text: String,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token rides
/// in the query string.
#[derive(Deserialize)]
pub struct SocketQuery {
    pub token: Option<String>,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl From<&Message> for MessageResponse {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.to_string(),
            chat_id: message.chat_id.to_string(),
            sender_id: message.sender_id.to_string(),
            text: message.text.clone(),
            sent_at: message.sent_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub id: String,
    pub driver_id: Option<String>,
    pub customer_id: Option<String>,
    pub messages: Vec<MessageResponse>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChatResponse {
    fn new(chat_id: AggregateId, chat: &Chat) -> Self {
        Self {
            id: chat_id.to_string(),
            driver_id: chat.driver_id().map(|id| id.to_string()),
            customer_id: chat.customer_id().map(|id| id.to_string()),
            messages: chat.messages().iter().map(MessageResponse::from).collect(),
            created_at: chat.created_at(),
            updated_at: chat.updated_at(),
        }
    }
}

fn required_user(raw: Option<&str>) -> Result<UserId, ApiError> {
    let raw = raw.ok_or_else(|| ApiError::BadRequest("Invalid body!".to_string()))?;
    parse_id(raw).map(UserId::from)
}

// -- Handlers --

/// POST /chats: open (or reopen) the chat between a driver and a customer.
#[tracing::instrument(skip(state, auth, req))]
pub async fn start<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    ApiJson(req): ApiJson<StartChatRequest>,
) -> Result<(StatusCode, Json<ChatResponse>), ApiError> {
    let driver_id = required_user(req.driver_id.as_deref())?;
    let customer_id = required_user(req.customer_id.as_deref())?;

    let chat = state
        .chats
        .start_chat(auth.id()?, driver_id, customer_id)
        .await?;
    let chat_id = Chat::id_for(driver_id, customer_id);
    Ok((StatusCode::CREATED, Json(ChatResponse::new(chat_id, &chat))))
}

/// GET /chats/{id}: participants only.
#[tracing::instrument(skip(state, auth))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ChatResponse>, ApiError> {
    let chat_id = parse_id(&id)?;
    let chat = state.chats.get_chat(chat_id, auth.id()?).await?;
    Ok(Json(ChatResponse::new(chat_id, &chat)))
}

/// POST /chats/{id}/messages: store a message and relay it live.
#[tracing::instrument(skip(state, auth, req))]
pub async fn post_message<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<PostMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let message = state
        .chats
        .post_message(parse_id(&id)?, auth.id()?, &req.text)
        .await?;
    Ok((StatusCode::CREATED, Json(MessageResponse::from(&message))))
}

/// GET /chats/{id}/ws?token=: join the chat's live channel.
///
/// Every message posted to the chat, over HTTP or over any socket, is pushed
/// as a JSON text frame. Text frames received from the client are posted as
/// messages from the authenticated user.
#[tracing::instrument(skip(state, query, upgrade))]
pub async fn socket<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Query(query): Query<SocketQuery>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or(ApiError::Unauthenticated)?;
    let auth = authenticate(&state, SessionToken::from_raw(token.trim())).await?;
    let user_id = auth.id()?;
    let chat_id = parse_id(&id)?;

    let receiver = state.chats.subscribe(chat_id, user_id).await?;
    tracing::info!(chat_id = %chat_id, user_id = %user_id, "chat socket joined");

    let token = auth.token;
    Ok(upgrade.on_upgrade(move |socket| run_socket(socket, state, chat_id, token, receiver)))
}

/// Posts a text frame from a socket as its user.
///
/// The session is checked on every frame; once it has been logged out the
/// socket must close.
async fn post_frame<S: EventStore>(
    state: &AppState<S>,
    token: &SessionToken,
    chat_id: AggregateId,
    text: &str,
) -> ControlFlow<()> {
    let Some(user_id) = state
        .identity
        .authenticate(token)
        .await
        .ok()
        .and_then(|user| user.user_id())
    else {
        return ControlFlow::Break(());
    };

    if let Err(err) = state.chats.post_message(chat_id, user_id, text).await {
        tracing::debug!(chat_id = %chat_id, error = %err, "socket message rejected");
    }
    ControlFlow::Continue(())
}

async fn run_socket<S: EventStore + Clone + 'static>(
    socket: WebSocket,
    state: Arc<AppState<S>>,
    chat_id: AggregateId,
    token: SessionToken,
    mut receiver: tokio::sync::broadcast::Receiver<Message>,
) {
    metrics::gauge!("chat_sockets_connected").increment(1.0);
    let relay = Arc::clone(state.chats.relay());
    let (mut sink, mut stream) = socket.split();

    let mut outgoing = tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(message) => {
                    let Ok(frame) = serde_json::to_string(&MessageResponse::from(&message)) else {
                        continue;
                    };
                    if sink.send(WsMessage::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(chat_id = %chat_id, skipped, "chat socket lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut incoming = tokio::spawn(async move {
        while let Some(Ok(frame)) = stream.next().await {
            match frame {
                WsMessage::Text(text) => {
                    if post_frame(&state, &token, chat_id, text.as_str())
                        .await
                        .is_break()
                    {
                        tracing::info!(chat_id = %chat_id, "session ended, closing chat socket");
                        break;
                    }
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever side ends first takes the other down with it. The aborted
    // task is awaited so its receiver is gone before the channel is released.
    tokio::select! {
        _ = &mut outgoing => {
            incoming.abort();
            let _ = incoming.await;
        }
        _ = &mut incoming => {
            outgoing.abort();
            let _ = outgoing.await;
        }
    }
    relay.release(chat_id).await;
    metrics::gauge!("chat_sockets_connected").decrement(1.0);
    tracing::info!(chat_id = %chat_id, "chat socket left");
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::Registration;
    use event_store::InMemoryEventStore;
    use media::ImageProcessor;

    #[tokio::test]
    async fn socket_posts_stop_after_logout() {
        let state = AppState::new(InMemoryEventStore::new(), ImageProcessor::default());
        let customer = state
            .identity
            .register(Registration::new("Olena", "Koval", "+380958167673", "secret1"))
            .await
            .unwrap();
        let driver = state
            .identity
            .register(Registration::new("Taras", "Bondar", "+380958167674", "secret1"))
            .await
            .unwrap();
        let customer_id = customer.user.user_id().unwrap();
        let driver_id = driver.user.user_id().unwrap();

        state
            .chats
            .start_chat(customer_id, driver_id, customer_id)
            .await
            .unwrap();
        let chat_id = Chat::id_for(driver_id, customer_id);
        let mut live = state.chats.subscribe(chat_id, driver_id).await.unwrap();

        let flow = post_frame(&state, &customer.token, chat_id, "on my way?").await;
        assert!(flow.is_continue());
        assert_eq!(live.recv().await.unwrap().text, "on my way?");

        state
            .identity
            .logout(customer_id, &customer.token)
            .await
            .unwrap();

        let flow = post_frame(&state, &customer.token, chat_id, "still here").await;
        assert!(flow.is_break());
        assert!(live.try_recv().is_err());
        assert_eq!(state.chats.get_chat(chat_id, driver_id).await.unwrap().messages().len(), 1);
    }
}
