//! Watchtower relay server library logic.

pub mod api;
pub mod api_push;
pub mod api_snapshots;
pub mod api_ws;
pub mod config;
pub mod relay;
pub mod retention;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use watchtower_push::NotificationDispatcher;
use watchtower_snapshots::SnapshotStore;

/// Room for the base64 expansion and JSON framing around an image.
const BODY_HEADROOM_BYTES: usize = 1024 * 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Snapshot storage.
    pub snapshots: Arc<SnapshotStore>,
    /// Live viewer connections.
    pub event_bus: api_ws::EventBus,
    /// Push notification fan-out; owns the subscriber registry.
    pub dispatcher: Arc<NotificationDispatcher>,
    /// Cooldown for notifications raised by camera frames.
    pub notify_throttle: relay::NotificationThrottle,
    /// Whether viewers draw detection boxes.
    pub show_boxes: Arc<AtomicBool>,
    /// VAPID public key handed to browsers, if push is configured.
    pub vapid_public_key: Option<String>,
    /// Browser client directory served as the fallback route.
    pub public_dir: Option<PathBuf>,
    /// Upper bound for request bodies and WebSocket messages.
    pub max_message_bytes: usize,
}

impl AppState {
    /// State with no cooldown, boxes shown and no static client.
    pub fn new(snapshots: Arc<SnapshotStore>, dispatcher: Arc<NotificationDispatcher>) -> Self {
        let max_message_bytes = snapshots.max_image_bytes() / 3 * 4 + BODY_HEADROOM_BYTES;
        Self {
            snapshots,
            event_bus: api_ws::EventBus::new(),
            dispatcher,
            notify_throttle: relay::NotificationThrottle::disabled(),
            show_boxes: Arc::new(AtomicBool::new(true)),
            vapid_public_key: None,
            public_dir: None,
            max_message_bytes,
        }
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/ws", get(api_ws::ws_handler))
        .route(
            "/recordings.json",
            get(api_snapshots::list_snapshots_handler),
        )
        .route(
            "/delete-image/{filename}",
            delete(api_snapshots::delete_snapshot_handler),
        )
        .route("/clear-all", post(api_snapshots::clear_all_handler))
        .route(
            "/subscribe",
            post(api_push::subscribe_handler).delete(api_push::unsubscribe_handler),
        )
        .route(
            "/test-notification",
            post(api_push::test_notification_handler),
        )
        .route(
            "/object-detected",
            post(api_push::object_detected_handler),
        )
        .route(
            "/person-detected",
            post(api_push::person_detected_handler),
        )
        .route(
            "/vapid-public-key",
            get(api_push::vapid_public_key_handler),
        )
        .route("/toggle-boxes", get(api::toggle_boxes_handler))
        .nest_service("/recordings", ServeDir::new(state.snapshots.dir()));

    // Serve the browser client if the directory has one.
    let router = match &state.public_dir {
        Some(dir) if dir.join("index.html").exists() => {
            tracing::info!(path = %dir.display(), "serving client static files");
            router.fallback_service(ServeDir::new(dir).fallback(ServeFile::new(dir.join("index.html"))))
        }
        Some(dir) => {
            tracing::info!(path = %dir.display(), "client directory not found, skipping static file serving");
            router
        }
        None => router,
    };

    router
        .layer(DefaultBodyLimit::max(state.max_message_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
