//! Order lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, Utc};
use common::UserId;
use domain::{
    ApplyForOrder, AssignDriver, AttachOrderImage, CloseOrder, CommentUpdate, DeleteOrder,
    DomainError, FinishOrder, Order, OrderDetails, PlaceOrder, UpdateComment,
};
use event_store::EventStore;
use media::ImageKey;
use projections::{OrderCard, OrderFilter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{parse_id, png_response, read_picture};
use crate::error::ApiError;
use crate::extract::{ApiJson, AuthUser, BaseUrl};
use crate::state::AppState;

const PICTURE_FIELD: &str = "order-pic";

// -- Request types --

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub primary_street: String,
    #[serde(default)]
    pub destination_street: String,
    pub primary_city: Option<String>,
    pub destination_city: Option<String>,
    pub comment: Option<String>,
    pub package_size: Option<String>,
    pub package_weight: Option<String>,
}

impl From<CreateOrderRequest> for OrderDetails {
    fn from(req: CreateOrderRequest) -> Self {
        OrderDetails {
            primary_street: req.primary_street,
            destination_street: req.destination_street,
            primary_city: req.primary_city,
            destination_city: req.destination_city,
            comment: req.comment,
            package_size: req.package_size,
            package_weight: req.package_weight,
        }
    }
}

/// `packageSize` and `packageWeight` carry JSON arrays, e.g. `["S","M"]`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListOrdersQuery {
    pub creator_id: Option<String>,
    pub driver_id: Option<String>,
    pub package_size: Option<String>,
    pub package_weight: Option<String>,
}

impl ListOrdersQuery {
    pub fn into_filter(self) -> Result<OrderFilter, ApiError> {
        let creator = self.creator_id.as_deref().map(parse_user_id).transpose()?;
        let driver = self.driver_id.as_deref().map(parse_user_id).transpose()?;
        let sizes = self
            .package_size
            .as_deref()
            .map(|raw| parse_list("packageSize", raw))
            .transpose()?;
        let weights = self
            .package_weight
            .as_deref()
            .map(|raw| parse_list("packageWeight", raw))
            .transpose()?;
        Ok(OrderFilter::from_query(creator, driver, sizes, weights))
    }
}

fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    parse_id(raw).map(UserId::from)
}

fn parse_list(field: &str, raw: &str) -> Result<Vec<String>, ApiError> {
    serde_json::from_str(raw)
        .map_err(|_| ApiError::BadRequest(format!("{field} must be a JSON array of strings")))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitDriverRequest {
    pub driver_id: Option<String>,
}

#[derive(Deserialize)]
pub struct FeedbackRequest {
    pub rating: Option<Value>,
}

impl FeedbackRequest {
    /// Whole numbers, given as a JSON number or a numeric string.
    fn rating(&self) -> Result<i64, ApiError> {
        let invalid = || ApiError::BadRequest("rating must be a whole number from 1 to 5".into());
        match &self.rating {
            Some(Value::Number(n)) => n.as_i64().ok_or_else(invalid),
            Some(Value::String(s)) => s.trim().parse().map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub id: String,
    pub primary_street: String,
    pub destination_street: String,
    pub primary_city: Option<String>,
    pub destination_city: Option<String>,
    pub comment: Option<String>,
    pub creator: String,
    pub driver_id: Option<String>,
    pub status: String,
    pub image_url: Option<String>,
    pub package_size: Option<String>,
    pub package_weight: Option<String>,
    pub applicants_list: Vec<String>,
    pub rating: Option<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderResponse {
    pub fn from_card(card: OrderCard, base: &BaseUrl) -> Self {
        let details = card.details;
        Self {
            id: card.order_id.to_string(),
            primary_street: details.primary_street,
            destination_street: details.destination_street,
            primary_city: details.primary_city,
            destination_city: details.destination_city,
            comment: details.comment,
            creator: card.creator.to_string(),
            driver_id: card.driver_id.map(|id| id.to_string()),
            status: card.status.as_str().to_string(),
            image_url: card.image_path.as_deref().map(|path| base.join(path)),
            package_size: details.package_size,
            package_weight: details.package_weight,
            applicants_list: card.applicants.iter().map(ToString::to_string).collect(),
            rating: card.rating.map(|r| r.value()),
            created_at: card.created_at,
            updated_at: card.updated_at,
        }
    }

    pub fn from_order(order: &Order, base: &BaseUrl) -> Result<Self, ApiError> {
        let card = OrderCard::from_order(order)
            .ok_or_else(|| ApiError::Internal("order has no placement event".to_string()))?;
        Ok(Self::from_card(card, base))
    }
}

fn respond(order: &Order, base: &BaseUrl) -> Result<Json<OrderResponse>, ApiError> {
    OrderResponse::from_order(order, base).map(Json)
}

// -- Handlers --

/// POST /orders: place an order as the caller.
#[tracing::instrument(skip(state, auth, req))]
pub async fn create<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    base: BaseUrl,
    ApiJson(req): ApiJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let cmd = PlaceOrder::by(auth.id()?, req.into());
    let result = state.orders.place_order(cmd).await?;
    Ok((StatusCode::CREATED, respond(&result.aggregate, &base)?))
}

/// GET /orders: newest first, narrowed by at most one query filter.
#[tracing::instrument(skip(state, _auth))]
pub async fn list<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    _auth: AuthUser,
    base: BaseUrl,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let filter = query.into_filter()?;
    state.refresh_views().await?;

    let orders = state
        .board
        .list(&filter)
        .await
        .into_iter()
        .map(|card| OrderResponse::from_card(card, &base))
        .collect();
    Ok(Json(orders))
}

/// GET /orders/{id}: visible to the creator and the assigned driver.
#[tracing::instrument(skip(state, auth))]
pub async fn get<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    base: BaseUrl,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state.orders.get(parse_id(&id)?, auth.id()?).await?;
    respond(&order, &base)
}

/// PATCH /orders/{id}: only `comment` is editable.
#[tracing::instrument(skip(state, auth, fields))]
pub async fn update<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    base: BaseUrl,
    Path(id): Path<String>,
    ApiJson(fields): ApiJson<Map<String, Value>>,
) -> Result<Json<OrderResponse>, ApiError> {
    let update = CommentUpdate::from_fields(&fields).map_err(DomainError::from)?;
    let cmd = UpdateComment::new(parse_id(&id)?, auth.id()?, update);
    let result = state.orders.update_comment(cmd).await?;
    respond(&result.aggregate, &base)
}

/// DELETE /orders/{id}: creator only, while the order is New.
#[tracing::instrument(skip(state, auth))]
pub async fn delete<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    base: BaseUrl,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_id(&id)?;
    let before = state.orders.load(order_id).await?;
    state
        .orders
        .delete(DeleteOrder::new(order_id, auth.id()?))
        .await?;
    state.images.remove(ImageKey::order_picture(order_id)).await?;
    respond(&before, &base)
}

/// PATCH /orders/apply/{id}: the caller applies as a driver.
#[tracing::instrument(skip(state, auth))]
pub async fn apply<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    base: BaseUrl,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let cmd = ApplyForOrder::new(parse_id(&id)?, auth.id()?);
    let result = state.orders.apply(cmd).await?;
    respond(&result.aggregate, &base)
}

/// PATCH /orders/submitDriver/{id}: the creator picks an applicant.
#[tracing::instrument(skip(state, auth, req))]
pub async fn submit_driver<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    base: BaseUrl,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<SubmitDriverRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let driver_id = req
        .driver_id
        .as_deref()
        .ok_or_else(|| ApiError::BadRequest("Invalid body!".to_string()))
        .and_then(parse_user_id)?;
    let cmd = AssignDriver::new(parse_id(&id)?, auth.id()?, driver_id);
    let result = state.orders.assign_driver(cmd).await?;
    respond(&result.aggregate, &base)
}

/// POST /orders/finishOrder/{id}: the assigned driver reports delivery.
#[tracing::instrument(skip(state, auth))]
pub async fn finish<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    base: BaseUrl,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let cmd = FinishOrder::new(parse_id(&id)?, auth.id()?);
    let result = state.orders.finish(cmd).await?;
    respond(&result.aggregate, &base)
}

/// POST /orders/{id}/feedback: the creator rates the driver and closes.
#[tracing::instrument(skip(state, auth, req))]
pub async fn feedback<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    base: BaseUrl,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<FeedbackRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    let cmd = CloseOrder::new(parse_id(&id)?, auth.id()?, req.rating()?);
    let closed = state.feedback.close_and_rate(cmd).await?;
    respond(&closed.order, &base)
}

/// POST /orders/{id}/order-pic: multipart field `order-pic`, creator only.
#[tracing::instrument(skip(state, auth, multipart))]
pub async fn upload_picture<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    auth: AuthUser,
    base: BaseUrl,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_id(&id)?;
    let (filename, bytes) = read_picture(multipart, PICTURE_FIELD).await?;
    let png = state.image_processor.process_image(&filename, &bytes)?;

    let result = state
        .orders
        .attach_image(AttachOrderImage::new(order_id, auth.id()?))
        .await?;
    state.images.put(ImageKey::order_picture(order_id), png).await?;
    respond(&result.aggregate, &base)
}

/// GET /orders/{id}/order-pic: public, served as PNG.
#[tracing::instrument(skip(state))]
pub async fn get_picture<S: EventStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let png = state
        .images
        .get(ImageKey::order_picture(parse_id(&id)?))
        .await?
        .ok_or_else(|| ApiError::NotFound("Image not found".to_string()))?;
    Ok(png_response(&png))
}
