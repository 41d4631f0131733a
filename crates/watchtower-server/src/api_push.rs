//! Push subscription and notification trigger handlers.
//!
//! `/object-detected` and `/person-detected` are the explicit triggers used
//! by the browser detector. They bypass the automatic cooldown and return
//! as soon as the dispatch is spawned.

use crate::api::ApiError;
use crate::relay::{object_notification, person_notification, spawn_notification, test_notification};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Extension, Json},
    http::StatusCode,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use watchtower_push::Subscription;

const UNKNOWN_OBJECT: &str = "Unknown object";

/// Request body for `DELETE /subscribe`.
#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub endpoint: String,
}

/// Request body for `POST /object-detected`.
#[derive(Debug, Default, Deserialize)]
pub struct ObjectDetectedRequest {
    #[serde(default)]
    pub objects: Option<String>,
}

/// `POST /subscribe`: registers a browser push subscription.
pub async fn subscribe_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<Subscription>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(subscription) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let endpoint = subscription.endpoint_prefix().to_string();

    let registry = state.dispatcher.registry();
    let added = registry.add(subscription)?;
    tracing::info!(
        endpoint = %endpoint,
        new = added,
        total = registry.len(),
        "push subscription saved"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "message": "Subscription saved" })),
    ))
}

/// `DELETE /subscribe`: removes a subscription by endpoint.
pub async fn unsubscribe_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<UnsubscribeRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let removed = state.dispatcher.registry().remove(&request.endpoint);
    if removed {
        tracing::info!(total = state.dispatcher.registry().len(), "push subscription removed");
    }
    Ok(Json(json!({ "success": true, "removed": removed })))
}

/// `POST /test-notification`: sends a test message and reports the counts.
pub async fn test_notification_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let payload = test_notification();
    let result = state
        .dispatcher
        .notify_all(&payload.title, &payload.body)
        .await?;

    Ok(Json(json!({
        "success": true,
        "sent": result.sent,
        "failed": result.failed,
    })))
}

/// `POST /object-detected`: notifies about a labelled detection.
///
/// A missing or unreadable body falls back to a generic label.
pub async fn object_detected_handler(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Json<Value> {
    let request: ObjectDetectedRequest = serde_json::from_slice(&body).unwrap_or_default();
    let label = request
        .objects
        .filter(|objects| !objects.trim().is_empty())
        .unwrap_or_else(|| UNKNOWN_OBJECT.to_string());

    spawn_notification(
        Arc::clone(&state.dispatcher),
        object_notification(&label, Utc::now()),
    );
    Json(json!({ "success": true }))
}

/// `POST /person-detected`.
pub async fn person_detected_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    spawn_notification(
        Arc::clone(&state.dispatcher),
        person_notification(Utc::now()),
    );
    Json(json!({ "success": true }))
}

/// `GET /vapid-public-key`: key the browser needs to subscribe.
pub async fn vapid_public_key_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "publicKey": state.vapid_public_key.as_deref().unwrap_or_default(),
    }))
}
