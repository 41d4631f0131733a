//! Detection pipeline: persist the frame, tell viewers, notify subscribers.
//!
//! The order is fixed. A snapshot is broadcast only after its file is on
//! disk, so viewers never receive a name they cannot fetch. The push
//! notification does not depend on either step and runs on its own task.

use crate::AppState;
use chrono::{DateTime, Local, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use watchtower_push::{NotificationDispatcher, PushPayload};
use watchtower_snapshots::{Snapshot, SnapshotError};

const SOURCE_NAME: &str = "Watchtower Live";

/// A frame reported by a camera client.
#[derive(Debug, Clone)]
pub struct DetectionEvent {
    /// Base64 JPEG, optionally with a `data:` URI header.
    pub image_payload: String,
    pub person_detected: bool,
    /// Detector label such as "Cat"; `None` means a plain person detection.
    pub object_label: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// Runs one detection through persist, broadcast and notify.
///
/// A failed persist skips the broadcast but not the notification.
///
/// # Errors
///
/// Returns the [`SnapshotError`] from persisting the frame.
pub async fn handle_detection(
    state: &AppState,
    event: DetectionEvent,
) -> Result<Snapshot, SnapshotError> {
    let DetectionEvent {
        image_payload,
        person_detected,
        object_label,
        received_at,
    } = event;

    let persisted = state.snapshots.persist_encoded(&image_payload).await;
    if let Ok(snapshot) = &persisted {
        if person_detected {
            tracing::info!(file_name = %snapshot.file_name, "person detected, snapshot saved");
        }
        let viewers = state
            .event_bus
            .publish(&snapshot.file_name, person_detected);
        tracing::debug!(file_name = %snapshot.file_name, viewers, "snapshot broadcast");
    }

    if person_detected {
        if state.notify_throttle.try_acquire(received_at) {
            let payload = match object_label.as_deref() {
                Some(label) => object_notification(label, received_at),
                None => person_notification(received_at),
            };
            spawn_notification(Arc::clone(&state.dispatcher), payload);
        } else {
            tracing::debug!("detection notification suppressed by cooldown");
        }
    }

    persisted
}

/// Sends `payload` to every subscriber without waiting for the result.
pub fn spawn_notification(
    dispatcher: Arc<NotificationDispatcher>,
    payload: PushPayload,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = dispatcher.notify_all(&payload.title, &payload.body).await {
            tracing::debug!(error = %e, title = %payload.title, "notification not sent");
        }
    })
}

pub fn person_notification(at: DateTime<Utc>) -> PushPayload {
    PushPayload::new(
        "Person Detected!",
        format!("Motion detected by {SOURCE_NAME} at {}", local_time(at)),
    )
}

pub fn object_notification(label: &str, at: DateTime<Utc>) -> PushPayload {
    PushPayload::new(
        format!("{label} Detected!"),
        format!("{label} detected by {SOURCE_NAME} at {}", local_time(at)),
    )
}

pub fn test_notification() -> PushPayload {
    PushPayload::new(
        "Test Notification",
        format!("This is a test from {SOURCE_NAME}!"),
    )
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Rate limit for automatic detection notifications.
///
/// A camera watching someone walk past reports a person on every frame;
/// subscribers get at most one automatic notification per cooldown window.
/// Cloning yields a handle to the same window.
#[derive(Debug, Clone)]
pub struct NotificationThrottle {
    cooldown_ms: i64,
    last_sent_ms: Arc<AtomicI64>,
}

impl NotificationThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown_ms: i64::try_from(cooldown.as_millis()).unwrap_or(i64::MAX),
            last_sent_ms: Arc::new(AtomicI64::new(i64::MIN)),
        }
    }

    /// A throttle that lets everything through.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Claims the window at `now`. Returns `false` if a notification was
    /// already sent less than one cooldown ago.
    pub fn try_acquire(&self, now: DateTime<Utc>) -> bool {
        if self.cooldown_ms == 0 {
            return true;
        }
        let now_ms = now.timestamp_millis();
        let mut last = self.last_sent_ms.load(Ordering::Acquire);
        loop {
            if last != i64::MIN && now_ms.saturating_sub(last) < self.cooldown_ms {
                return false;
            }
            match self.last_sent_ms.compare_exchange_weak(
                last,
                now_ms,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(current) => last = current,
            }
        }
    }
}
