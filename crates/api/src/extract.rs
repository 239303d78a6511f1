//! Request extractors shared by the route modules.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRequest, FromRequestParts, Request};
use axum::http::header::{AUTHORIZATION, HOST};
use axum::http::request::Parts;
use domain::{SessionToken, User};
use event_store::EventStore;
use serde::de::DeserializeOwned;

use crate::error::ApiError;
use crate::state::AppState;

/// The caller behind a valid `Authorization: Bearer <token>` header.
pub struct AuthUser {
    pub user: User,
    pub token: SessionToken,
}

impl AuthUser {
    pub fn id(&self) -> Result<common::UserId, ApiError> {
        self.user.user_id().ok_or(ApiError::Unauthenticated)
    }
}

impl<S> FromRequestParts<Arc<AppState<S>>> for AuthUser
where
    S: EventStore + Clone + 'static,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthenticated)?;
        authenticate(state, token).await
    }
}

fn bearer_token(parts: &Parts) -> Option<SessionToken> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let raw = value.strip_prefix("Bearer ")?.trim();
    (!raw.is_empty()).then(|| SessionToken::from_raw(raw))
}

/// Resolves a raw token to its user. Any failure reads as unauthenticated.
pub async fn authenticate<S: EventStore>(
    state: &AppState<S>,
    token: SessionToken,
) -> Result<AuthUser, ApiError> {
    match state.identity.authenticate(&token).await {
        Ok(user) => Ok(AuthUser { user, token }),
        Err(err) if err.kind() == domain::ErrorKind::Internal => Err(err.into()),
        Err(_) => Err(ApiError::Unauthenticated),
    }
}

/// `scheme://host` of the current request, used to build picture URLs.
#[derive(Debug, Clone)]
pub struct BaseUrl(pub String);

impl BaseUrl {
    /// Absolute URL of a host-relative `path`.
    pub fn join(&self, path: &str) -> String {
        format!("{}{}", self.0, path)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for BaseUrl {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let scheme = parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .or_else(|| parts.uri.scheme_str())
            .unwrap_or("http");
        let host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| parts.uri.authority().map(|a| a.as_str()))
            .unwrap_or("localhost");
        Ok(BaseUrl(format!("{scheme}://{host}")))
    }
}

/// JSON body whose rejection renders as an [`ApiError`].
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match axum::Json::<T>::from_request(req, state).await {
            Ok(axum::Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}
