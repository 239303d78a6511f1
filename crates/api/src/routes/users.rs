//! Registration, sessions, profile and avatar endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, Utc};
use common::UserId;
use domain::{Credentials, ProfileUpdate, Registration, User};
use event_store::EventStore;
use media::ImageKey;
use projections::UserCard;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{parse_id, png_response, read_picture};
use crate::error::ApiError;
use crate::extract::{ApiJson, AuthUser, BaseUrl};
use crate::state::AppState;

const AVATAR_FIELD: &str = "profile-pic";

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub password: String,
    pub email: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub password: String,
}

// -- Response types --

/// Public view of a user. Password hash, sessions and picture bytes stay out.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub image_url: Option<String>,
    pub ratings_list: Vec<u8>,
    pub user_total_rating: Option<f64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserResponse {
    pub fn from_user(user: &User, base: &BaseUrl) -> Self {
        let profile = user.profile();
        Self {
            id: user.user_id().map(|id| id.to_string()).unwrap_or_default(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            phone_number: user.phone_number().to_string(),
            email: profile.email.clone(),
            image_url: user.image_path().map(|path| base.join(path)),
            ratings_list: user.ratings().iter().map(|r| r.value()).collect(),
            user_total_rating: user.total_rating(),
            created_at: user.created_at(),
            updated_at: user.updated_at(),
        }
    }

    pub fn from_card(card: &UserCard, base: &BaseUrl) -> Self {
        Self {
            id: card.user_id.to_string(),
            first_name: card.profile.first_name.clone(),
            last_name: card.profile.last_name.clone(),
            phone_number: card.phone_number.clone(),
            email: card.profile.email.clone(),
            image_url: card.image_path.as_deref().map(|path| base.join(path)),
            ratings_list: card.ratings.clone(),
            user_total_rating: card.total_rating(),
            created_at: Some(card.created_at),
            updated_at: Some(card.updated_at),
        }
    }
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub user: UserResponse,
    pub token: String,
}

// -- Handlers --

/// POST /users: register and log in.
#[tracing::instrument(skip(state, req))]
pub async fn register<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    base: BaseUrl,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let mut registration = Registration::new(
        req.first_name,
        req.last_name,
        req.phone_number,
        req.password,
    );
    if let Some(email) = req.email {
        registration = registration.with_email(email);
    }

    let session = state.identity.register(registration).await?;
    let response = SessionResponse {
        user: UserResponse::from_user(&session.user, &base),
        token: session.token.as_str().to_string(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /users/login
#[tracing::instrument(skip(state, req))]
pub async fn login<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    base: BaseUrl,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .identity
        .login(Credentials {
            phone_number: req.phone_number,
            password: req.password,
        })
        .await?;

    Ok(Json(SessionResponse {
        user: UserResponse::from_user(&session.user, &base),
        token: session.token.as_str().to_string(),
    }))
}

/// POST /users/logout: revoke the token used for this request.
#[tracing::instrument(skip(state, auth))]
pub async fn logout<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
) -> Result<StatusCode, ApiError> {
    state.identity.logout(auth.id()?, &auth.token).await?;
    Ok(StatusCode::OK)
}

/// POST /users/logoutAll: revoke every token of the caller.
#[tracing::instrument(skip(state, auth))]
pub async fn logout_all<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
) -> Result<StatusCode, ApiError> {
    state.identity.logout_all(auth.id()?).await?;
    Ok(StatusCode::OK)
}

/// GET /users: every registered user.
#[tracing::instrument(skip(state, _auth))]
pub async fn list<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _auth: AuthUser,
    base: BaseUrl,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    state.refresh_views().await?;
    let users = state
        .directory
        .list()
        .await
        .iter()
        .map(|card| UserResponse::from_card(card, &base))
        .collect();
    Ok(Json(users))
}

/// GET /users/me
pub async fn me(auth: AuthUser, base: BaseUrl) -> Json<UserResponse> {
    Json(UserResponse::from_user(&auth.user, &base))
}

/// GET /users/{id}
#[tracing::instrument(skip(state, _auth))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _auth: AuthUser,
    base: BaseUrl,
    Path(id): Path<String>,
) -> Result<Json<UserResponse>, ApiError> {
    let user_id: UserId = parse_id(&id)?.into();
    let user = state.identity.get(user_id).await?;
    Ok(Json(UserResponse::from_user(&user, &base)))
}

/// PATCH /users/me: change firstName, lastName, email or password.
#[tracing::instrument(skip(state, auth, fields))]
pub async fn update_me<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    base: BaseUrl,
    ApiJson(fields): ApiJson<Map<String, Value>>,
) -> Result<Json<UserResponse>, ApiError> {
    let update = ProfileUpdate::from_fields(&fields).map_err(domain::DomainError::from)?;
    let user = state.identity.update_profile(auth.id()?, update).await?;
    Ok(Json(UserResponse::from_user(&user, &base)))
}

/// DELETE /users/me: remove the account and every order it created.
#[tracing::instrument(skip(state, auth))]
pub async fn delete_me<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    base: BaseUrl,
) -> Result<Json<UserResponse>, ApiError> {
    let user_id = auth.id()?;
    let (user, removed_orders) = state.identity.delete_self(user_id, &state.orders).await?;

    state.images.remove(ImageKey::avatar(user_id)).await?;
    for order_id in removed_orders {
        state.images.remove(ImageKey::order_picture(order_id)).await?;
    }

    Ok(Json(UserResponse::from_user(&user, &base)))
}

/// POST /users/me/profile-pic: multipart field `profile-pic`.
#[tracing::instrument(skip(state, auth, multipart))]
pub async fn upload_avatar<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    base: BaseUrl,
    multipart: Multipart,
) -> Result<Json<UserResponse>, ApiError> {
    let user_id = auth.id()?;
    let (filename, bytes) = read_picture(multipart, AVATAR_FIELD).await?;
    let png = state.image_processor.process_image(&filename, &bytes)?;

    let user = state.identity.set_avatar(user_id).await?;
    state.images.put(ImageKey::avatar(user_id), png).await?;
    Ok(Json(UserResponse::from_user(&user, &base)))
}

/// DELETE /users/me/profile-pic
#[tracing::instrument(skip(state, auth))]
pub async fn delete_avatar<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    base: BaseUrl,
) -> Result<Json<UserResponse>, ApiError> {
    let user_id = auth.id()?;
    let user = state.identity.remove_avatar(user_id).await?;
    state.images.remove(ImageKey::avatar(user_id)).await?;
    Ok(Json(UserResponse::from_user(&user, &base)))
}

/// GET /users/{id}/profile-pic: public, served as PNG.
#[tracing::instrument(skip(state))]
pub async fn get_avatar<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let user_id: UserId = parse_id(&id)?.into();
    let png = state
        .images
        .get(ImageKey::avatar(user_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("Image not found".to_string()))?;
    Ok(png_response(&png))
}
