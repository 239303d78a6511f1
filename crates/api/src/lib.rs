//! HTTP API server for the delivery marketplace.
//!
//! Provides REST endpoints for accounts, orders and chats, a WebSocket relay
//! for live chat, structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, patch, post};
use event_store::EventStore;
use media::ImageProcessor;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Room for multipart boundaries and headers around the largest picture.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let body_limit = state.image_processor.max_upload_bytes() + MULTIPART_OVERHEAD;

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    let users = Router::new()
        .route(
            "/users",
            post(routes::users::register::<S>).get(routes::users::list::<S>),
        )
        .route("/users/login", post(routes::users::login::<S>))
        .route("/users/logout", post(routes::users::logout::<S>))
        .route("/users/logoutAll", post(routes::users::logout_all::<S>))
        .route(
            "/users/me",
            get(routes::users::me)
                .patch(routes::users::update_me::<S>)
                .delete(routes::users::delete_me::<S>),
        )
        .route(
            "/users/me/profile-pic",
            post(routes::users::upload_avatar::<S>).delete(routes::users::delete_avatar::<S>),
        )
        .route("/users/{id}", get(routes::users::get::<S>))
        .route("/users/{id}/profile-pic", get(routes::users::get_avatar::<S>));

    let orders = Router::new()
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list::<S>),
        )
        .route(
            "/orders/{id}",
            get(routes::orders::get::<S>)
                .patch(routes::orders::update::<S>)
                .delete(routes::orders::delete::<S>),
        )
        .route("/orders/apply/{id}", patch(routes::orders::apply::<S>))
        .route(
            "/orders/submitDriver/{id}",
            patch(routes::orders::submit_driver::<S>),
        )
        .route(
            "/orders/finishOrder/{id}",
            post(routes::orders::finish::<S>),
        )
        .route("/orders/{id}/feedback", post(routes::orders::feedback::<S>))
        .route(
            "/orders/{id}/order-pic",
            post(routes::orders::upload_picture::<S>).get(routes::orders::get_picture::<S>),
        );

    let chats = Router::new()
        .route("/chats", post(routes::chats::start::<S>))
        .route("/chats/{id}", get(routes::chats::get::<S>))
        .route(
            "/chats/{id}/messages",
            post(routes::chats::post_message::<S>),
        )
        .route("/chats/{id}/ws", get(routes::chats::socket::<S>));

    Router::new()
        .route("/health", get(routes::health::check))
        .merge(users)
        .merge(orders)
        .merge(chats)
        .with_state(state)
        .merge(metrics_router)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over `event_store` with the default upload limit.
pub fn create_default_state<S: EventStore + Clone + 'static>(event_store: S) -> Arc<AppState<S>> {
    Arc::new(AppState::new(event_store, ImageProcessor::default()))
}
