//! WebSocket handler and viewer fan-out.
//!
//! Every socket on `/ws` is both a producer and a viewer: camera clients
//! send frames on it, and every connected client receives a
//! [`SnapshotEvent`] for each stored frame.

use crate::relay::{self, DetectionEvent};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        ConnectInfo, Extension, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    net::SocketAddr,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Outgoing messages buffered per viewer before it counts as too slow.
const VIEWER_BUFFER: usize = 64;

/// Frame sent by a camera client.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerMessage {
    /// Base64 JPEG; messages without it are ignored.
    #[serde(default)]
    pub image_data: Option<String>,
    /// Missing or `null` means no person.
    #[serde(default)]
    pub person_detected: Option<bool>,
    #[serde(default)]
    pub object_label: Option<String>,
}

/// Event broadcast to viewers after a snapshot is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEvent {
    pub new_snapshot: String,
    pub person_detected: bool,
}

type ViewerMap = HashMap<Uuid, mpsc::Sender<String>>;

/// Registry of live viewer connections.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct EventBus {
    /// Active viewers: id -> outgoing queue.
    ///
    /// Uses `std::sync::RwLock`: guards only cover map operations and
    /// `try_send`, never an `.await`.
    viewers: Arc<RwLock<ViewerMap>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("viewers", &self.viewer_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            viewers: Arc::new(RwLock::new(HashMap::new())),
            shutdown: Arc::new(shutdown),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, ViewerMap> {
        self.viewers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ViewerMap> {
        self.viewers.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a viewer queue.
    ///
    /// The returned handle unregisters the viewer when dropped.
    pub fn register_viewer(&self, sender: mpsc::Sender<String>) -> ViewerHandle {
        let id = Uuid::new_v4();
        self.write().insert(id, sender);
        ViewerHandle {
            id,
            bus: self.clone(),
        }
    }

    /// Removes a viewer. Returns `false` if it was already gone.
    pub fn unregister_viewer(&self, id: Uuid) -> bool {
        self.write().remove(&id).is_some()
    }

    /// Announces a stored snapshot to every viewer.
    ///
    /// Returns the number of viewers the event was queued for.
    pub fn publish(&self, file_name: &str, person_detected: bool) -> usize {
        let event = SnapshotEvent {
            new_snapshot: file_name.to_string(),
            person_detected,
        };
        match serde_json::to_string(&event) {
            Ok(json) => self.broadcast(json),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize snapshot event");
                0
            }
        }
    }

    /// Queues a raw message for every viewer.
    ///
    /// A viewer whose queue is full or closed is dropped from the registry;
    /// its socket task sees the closed queue and ends the connection.
    pub fn broadcast(&self, message_json: String) -> usize {
        let mut delivered = 0;
        let mut dropped = Vec::new();
        {
            let viewers = self.read();
            for (id, sender) in viewers.iter() {
                match sender.try_send(message_json.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        tracing::warn!(viewer_id = %id, "dropping viewer that cannot keep up: {}", e);
                        dropped.push(*id);
                    }
                }
            }
        }

        if !dropped.is_empty() {
            let mut viewers = self.write();
            for id in &dropped {
                viewers.remove(id);
            }
        }
        delivered
    }

    pub fn viewer_count(&self) -> usize {
        self.read().len()
    }

    /// Receiver that flips to `true` once [`close_all`](Self::close_all) runs.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Tells every connection to terminate and empties the registry.
    ///
    /// New upgrades are refused afterwards. Returns how many viewers were
    /// registered.
    pub fn close_all(&self) -> usize {
        self.shutdown.send_replace(true);
        let closed = {
            let mut viewers = self.write();
            let count = viewers.len();
            viewers.clear();
            count
        };
        tracing::info!(viewers = closed, "closing all viewer connections");
        closed
    }
}

/// Registration of one viewer; unregisters on drop.
#[derive(Debug)]
pub struct ViewerHandle {
    id: Uuid,
    bus: EventBus,
}

impl ViewerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for ViewerHandle {
    fn drop(&mut self) {
        self.bus.unregister_viewer(self.id);
    }
}

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// The client closed the socket.
    Closing,
    /// Reading or writing the socket failed.
    Errored,
    /// The server is shutting down.
    Shutdown,
    /// The viewer queue was dropped by the bus.
    Evicted,
}

impl CloseReason {
    fn as_str(self) -> &'static str {
        match self {
            CloseReason::Closing => "closed",
            CloseReason::Errored => "errored",
            CloseReason::Shutdown => "shutdown",
            CloseReason::Evicted => "evicted",
        }
    }
}

/// WebSocket handler: `GET /ws`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.event_bus.is_closed() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }

    ws.max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::channel::<String>(VIEWER_BUFFER);
    let viewer = state.event_bus.register_viewer(tx);
    let viewer_id = viewer.id();
    let mut shutdown = state.event_bus.shutdown_signal();

    tracing::info!(
        %viewer_id,
        remote_addr = %addr,
        viewers = state.event_bus.viewer_count(),
        "client connected"
    );

    // Forward queued events to the socket. Ends when the bus drops the queue.
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                return CloseReason::Errored;
            }
        }
        let _ = sender.close().await;
        CloseReason::Evicted
    });

    let reason = if *shutdown.borrow_and_update() {
        CloseReason::Shutdown
    } else {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break CloseReason::Shutdown,
                ended = &mut send_task => break ended.unwrap_or(CloseReason::Errored),
                incoming = receiver.next() => match incoming {
                    Some(Ok(AxumMessage::Text(text))) => {
                        handle_producer_message(&state, text.as_str(), viewer_id).await;
                    }
                    Some(Ok(AxumMessage::Binary(_))) => {
                        tracing::warn!(%viewer_id, "ignoring binary WebSocket frame");
                    }
                    Some(Ok(AxumMessage::Close(_))) | None => break CloseReason::Closing,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(%viewer_id, error = %e, "WebSocket receive failed");
                        break CloseReason::Errored;
                    }
                },
            }
        }
    };
    // close_all drops every queue, which can surface as an eviction first.
    let reason = if state.event_bus.is_closed() {
        CloseReason::Shutdown
    } else {
        reason
    };

    send_task.abort();
    drop(viewer);

    tracing::info!(
        %viewer_id,
        remote_addr = %addr,
        reason = reason.as_str(),
        viewers = state.event_bus.viewer_count(),
        "client disconnected"
    );
}

async fn handle_producer_message(state: &AppState, text: &str, viewer_id: Uuid) {
    let message: ProducerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(%viewer_id, error = %e, "failed to parse incoming WebSocket message");
            return;
        }
    };

    let Some(image_payload) = message.image_data else {
        tracing::debug!(%viewer_id, "message without image data ignored");
        return;
    };

    let event = DetectionEvent {
        image_payload,
        person_detected: message.person_detected.unwrap_or(false),
        object_label: message.object_label,
        received_at: Utc::now(),
    };

    match relay::handle_detection(state, event).await {
        Ok(_) => {}
        Err(e) if e.is_invalid_input() => {
            tracing::warn!(%viewer_id, error = %e, "rejected snapshot from client");
        }
        Err(e) => {
            tracing::error!(%viewer_id, error = %e, "failed to store snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_message_defaults() {
        let message: ProducerMessage = serde_json::from_str(r#"{"imageData":"abc"}"#).unwrap();

        assert_eq!(message.image_data.as_deref(), Some("abc"));
        assert_eq!(message.person_detected, None);
        assert!(message.object_label.is_none());
    }

    #[test]
    fn null_person_flag_still_parses() {
        let message: ProducerMessage =
            serde_json::from_str(r#"{"imageData":"abc","personDetected":null,"objectLabel":null}"#)
                .unwrap();

        assert_eq!(message.image_data.as_deref(), Some("abc"));
        assert!(!message.person_detected.unwrap_or(false));
        assert!(message.object_label.is_none());
    }

    #[test]
    fn snapshot_event_wire_names() {
        let json = serde_json::to_value(SnapshotEvent {
            new_snapshot: "snapshot-1.jpg".to_string(),
            person_detected: true,
        })
        .unwrap();

        assert_eq!(json["newSnapshot"], "snapshot-1.jpg");
        assert_eq!(json["personDetected"], true);
    }

    #[tokio::test]
    async fn handle_unregisters_on_drop() {
        let bus = EventBus::new();
        let (tx, _rx) = mpsc::channel(1);

        let handle = bus.register_viewer(tx);
        let id = handle.id();
        assert_eq!(bus.viewer_count(), 1);

        drop(handle);
        assert_eq!(bus.viewer_count(), 0);
        assert!(!bus.unregister_viewer(id));
    }
}
