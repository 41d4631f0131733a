//! Shared API error type and the small display handlers.

use crate::AppState;
use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use thiserror::Error;
use watchtower_push::{DispatchError, PushError};
use watchtower_snapshots::SnapshotError;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<SnapshotError> for ApiError {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::InvalidName(_) | SnapshotError::InvalidPayload(_) => {
                ApiError::BadRequest(e.to_string())
            }
            SnapshotError::NotFound(_) => ApiError::NotFound(e.to_string()),
            SnapshotError::Write(_) | SnapshotError::Read(_) | SnapshotError::Delete(_) => {
                ApiError::InternalServerError(e.to_string())
            }
        }
    }
}

impl From<PushError> for ApiError {
    fn from(e: PushError) -> Self {
        match e {
            PushError::InvalidSubscription(_) => ApiError::BadRequest(e.to_string()),
            PushError::InvalidCredentials(_) | PushError::Client(_) => {
                ApiError::InternalServerError(e.to_string())
            }
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        ApiError::InternalServerError(e.to_string())
    }
}

/// `GET /toggle-boxes`: flips whether viewers draw detection boxes.
pub async fn toggle_boxes_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let show_boxes = !state.show_boxes.fetch_xor(true, Ordering::SeqCst);
    tracing::info!(show_boxes, "detection boxes toggled");
    Json(json!({ "showBoxes": show_boxes }))
}
