//! Snapshot admin handlers.

use crate::api::ApiError;
use crate::AppState;
use axum::extract::{Extension, Json, Path};
use serde_json::{json, Value};
use std::sync::Arc;

/// `GET /recordings.json`: snapshot names, newest first.
pub async fn list_snapshots_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Vec<String>> {
    Json(state.snapshots.list().await)
}

/// `DELETE /delete-image/{filename}`.
pub async fn delete_snapshot_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.snapshots.delete(&filename).await?;
    Ok(Json(json!({ "success": true })))
}

/// `POST /clear-all`.
pub async fn clear_all_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let deleted = state.snapshots.delete_all().await?;
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}
