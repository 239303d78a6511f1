//! HTTP route handlers.

pub mod chats;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod users;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Multipart;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use common::AggregateId;

use crate::error::ApiError;

const UPLOAD_HINT: &str = "Please, upload an image";

pub(crate) fn parse_id(id: &str) -> Result<AggregateId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(AggregateId::from(uuid))
}

pub(crate) fn png_response(png: &Arc<Vec<u8>>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/png")],
        Body::from(png.as_ref().clone()),
    )
        .into_response()
}

/// Pulls the file named `field` out of a multipart body.
///
/// Returns the client-side filename (used for the extension check) and the
/// raw bytes. Other fields are skipped.
pub(crate) async fn read_picture(
    mut multipart: Multipart,
    field: &str,
) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(part) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?
    {
        if part.name() != Some(field) {
            continue;
        }
        let filename = part.file_name().unwrap_or_default().to_string();
        let bytes = part
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        return Ok((filename, bytes.to_vec()));
    }
    Err(ApiError::BadRequest(UPLOAD_HINT.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_rejects_garbage() {
        let id = AggregateId::new();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);

        let err = parse_id("not-a-uuid").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(msg) if msg.starts_with("Invalid ID format")));
    }
}
