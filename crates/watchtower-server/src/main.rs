//! Watchtower relay binary.
//!
//! Starts the HTTP/WebSocket server with structured logging, the snapshot
//! retention task, and graceful shutdown on SIGTERM/SIGINT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use watchtower_push::{NotificationDispatcher, SubscriptionRegistry};
use watchtower_server::relay::NotificationThrottle;
use watchtower_server::{app, config, retention, AppState};
use watchtower_snapshots::SnapshotStore;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("WATCHTOWER_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let dotenv_loaded = dotenvy::dotenv().is_ok();

    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        dotenv = dotenv_loaded,
        "resolved startup configuration path"
    );

    // Snapshot storage
    let store = SnapshotStore::open(config.storage.recordings_dir.clone())
        .expect("failed to create recordings directory: check storage.recordings_dir")
        .with_max_image_bytes(config.storage.max_image_bytes);
    let store = Arc::new(store);

    // Push notifications
    let dispatcher = NotificationDispatcher::configure(
        SubscriptionRegistry::new(),
        config.push.vapid_credentials(),
        config.push.ttl_secs,
    );
    let vapid_public_key = dispatcher
        .is_configured()
        .then(|| config.push.public_key.clone())
        .flatten();

    let state = AppState {
        notify_throttle: NotificationThrottle::new(Duration::from_secs(
            config.notifications.cooldown_secs,
        )),
        vapid_public_key,
        public_dir: Some(config.server.public_dir.clone()),
        ..AppState::new(Arc::clone(&store), Arc::new(dispatcher))
    };
    let event_bus = state.event_bus.clone();

    tokio::spawn(retention::start_retention_task(
        Arc::clone(&store),
        config.retention.max_count,
        Duration::from_secs(config.retention.interval_secs),
    ));

    // Build application
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, recordings = %store.dir().display(), "starting watchtower server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    let grace = Duration::from_secs(config.server.shutdown_grace_secs);

    // Serve with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        event_bus.close_all();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            tracing::warn!(grace_secs = grace.as_secs(), "graceful shutdown timed out, forcing exit");
            std::process::exit(1);
        });
    })
    .await
    .expect("server error");

    tracing::info!("watchtower server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
