//! Shared fixtures for the server integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use base64::Engine;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use watchtower_push::{
    DeliveryError, NotificationDispatcher, PushPayload, PushTransport, Subscription,
    SubscriptionKeys, SubscriptionRegistry,
};
use watchtower_server::{app, AppState};
use watchtower_snapshots::SnapshotStore;

/// Push transport that records every delivery instead of sending it.
#[derive(Default)]
pub struct RecordingTransport {
    pub delivered: Mutex<Vec<(String, PushPayload)>>,
    /// Endpoints answered with 410 Gone.
    pub gone: HashSet<String>,
}

impl RecordingTransport {
    pub fn with_gone(endpoints: &[&str]) -> Self {
        Self {
            gone: endpoints.iter().map(|e| e.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn deliveries(&self) -> Vec<(String, PushPayload)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn deliver(
        &self,
        subscription: &Subscription,
        payload: &[u8],
    ) -> Result<(), DeliveryError> {
        let payload: PushPayload = serde_json::from_slice(payload).expect("payload is JSON");
        self.delivered
            .lock()
            .unwrap()
            .push((subscription.endpoint.clone(), payload));
        if self.gone.contains(&subscription.endpoint) {
            Err(DeliveryError::PermanentlyGone { status: 410 })
        } else {
            Ok(())
        }
    }
}

pub fn subscription(endpoint: &str) -> Subscription {
    Subscription {
        endpoint: endpoint.to_string(),
        keys: SubscriptionKeys {
            p256dh: "p256dh-key".to_string(),
            auth: "auth-secret".to_string(),
        },
    }
}

/// State backed by a temp directory, with push disabled.
pub fn disabled_state() -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::open(dir.path().join("recordings")).unwrap();
    let dispatcher = NotificationDispatcher::disabled(SubscriptionRegistry::new());
    (dir, AppState::new(Arc::new(store), Arc::new(dispatcher)))
}

/// State backed by a temp directory, delivering through `transport`.
pub fn state_with_transport(
    transport: Arc<RecordingTransport>,
    subscribers: &[&str],
) -> (tempfile::TempDir, AppState) {
    let dir = tempfile::tempdir().unwrap();
    let store = SnapshotStore::open(dir.path().join("recordings")).unwrap();
    let registry = SubscriptionRegistry::new();
    for endpoint in subscribers {
        registry.add(subscription(endpoint)).unwrap();
    }
    let dispatcher = NotificationDispatcher::with_transport(registry, transport);
    (dir, AppState::new(Arc::new(store), Arc::new(dispatcher)))
}

/// Serves the app on an ephemeral port.
pub async fn start_server(state: AppState) -> SocketAddr {
    let app = app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    addr
}

/// A small fake JPEG as a data URI.
pub fn jpeg_data_uri() -> String {
    let bytes = [0xFF, 0xD8, 0xFF, 0xE0, b'f', b'a', b'k', b'e', 0xFF, 0xD9];
    format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}
