//! Fan-out of push notifications to every registered subscriber.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::error::DispatchError;
use crate::subscription::SubscriptionRegistry;
use crate::transport::{PushTransport, VapidCredentials, WebPushTransport};

/// Notification content delivered to subscriber devices as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
}

impl PushPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    /// JSON encoding sent to the push service.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::json!({ "title": self.title, "body": self.body })
            .to_string()
            .into_bytes()
    }
}

/// Per-call delivery counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    /// Deliveries accepted by the push service.
    pub sent: usize,
    /// Deliveries that failed for any reason.
    pub failed: usize,
    /// Subscribers dropped because their endpoint is gone.
    pub removed: usize,
}

/// Sends notifications to all subscribers of a [`SubscriptionRegistry`].
///
/// A dispatcher built without usable credentials stays disabled for its
/// whole lifetime: every [`notify_all`](Self::notify_all) fails fast with
/// [`DispatchError::NotConfigured`].
pub struct NotificationDispatcher {
    registry: SubscriptionRegistry,
    transport: Option<Arc<dyn PushTransport>>,
    disabled_reported: AtomicBool,
}

impl fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("configured", &self.is_configured())
            .field("subscribers", &self.registry.len())
            .finish()
    }
}

impl NotificationDispatcher {
    /// Builds a dispatcher from optional VAPID credentials.
    ///
    /// Missing or malformed credentials are logged and produce a disabled
    /// dispatcher; startup never fails because of push configuration.
    pub fn configure(
        registry: SubscriptionRegistry,
        credentials: Option<VapidCredentials>,
        ttl_secs: u32,
    ) -> Self {
        let Some(credentials) = credentials else {
            tracing::warn!("VAPID keys not configured, push notifications disabled");
            return Self::disabled(registry);
        };

        match WebPushTransport::new(credentials, ttl_secs) {
            Ok(transport) => {
                tracing::info!("web push configured");
                Self::with_transport(registry, Arc::new(transport))
            }
            Err(e) => {
                tracing::error!(error = %e, "web push configuration failed, push notifications disabled");
                Self::disabled(registry)
            }
        }
    }

    /// A dispatcher that never sends.
    pub fn disabled(registry: SubscriptionRegistry) -> Self {
        Self {
            registry,
            transport: None,
            disabled_reported: AtomicBool::new(false),
        }
    }

    /// A dispatcher that delivers through `transport`.
    pub fn with_transport(registry: SubscriptionRegistry, transport: Arc<dyn PushTransport>) -> Self {
        Self {
            registry,
            transport: Some(transport),
            disabled_reported: AtomicBool::new(false),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_some()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Sends `title`/`body` to every current subscriber.
    ///
    /// Deliveries run concurrently on their own tasks, so a slow, failing or
    /// panicking delivery never holds up the others. Subscribers whose
    /// endpoint is reported gone are removed in one batch once every
    /// delivery has finished, before this returns. Transient failures leave
    /// the subscriber in place; nothing is retried within a call.
    ///
    /// Callers that must not wait for the round trip can spawn this.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NotConfigured`] when push is disabled and
    /// [`DispatchError::NoSubscribers`] when nobody is subscribed. In both
    /// cases no network call is made.
    pub async fn notify_all(&self, title: &str, body: &str) -> Result<DispatchResult, DispatchError> {
        let Some(transport) = &self.transport else {
            if !self.disabled_reported.swap(true, Ordering::Relaxed) {
                tracing::warn!("cannot send notification: web push not configured");
            }
            return Err(DispatchError::NotConfigured);
        };

        let subscribers = self.registry.all();
        if subscribers.is_empty() {
            tracing::info!("no subscribers to send notification to");
            return Err(DispatchError::NoSubscribers);
        }

        tracing::info!(subscribers = subscribers.len(), title, "sending notification");
        let payload: Arc<[u8]> = PushPayload::new(title, body).encode().into();

        let mut deliveries = JoinSet::new();
        for subscription in subscribers {
            let transport = Arc::clone(transport);
            let payload = Arc::clone(&payload);
            deliveries.spawn(async move {
                let outcome = transport.deliver(&subscription, &payload).await;
                (subscription, outcome)
            });
        }

        let mut result = DispatchResult::default();
        let mut gone = Vec::new();
        while let Some(joined) = deliveries.join_next().await {
            match joined {
                Ok((subscription, Ok(()))) => {
                    tracing::debug!(endpoint = %subscription.endpoint_prefix(), "notification delivered");
                    result.sent += 1;
                }
                Ok((subscription, Err(e))) => {
                    result.failed += 1;
                    if e.is_permanent() {
                        tracing::info!(
                            endpoint = %subscription.endpoint_prefix(),
                            error = %e,
                            "removing expired subscription"
                        );
                        gone.push(subscription.endpoint);
                    } else {
                        tracing::warn!(
                            endpoint = %subscription.endpoint_prefix(),
                            error = %e,
                            "notification delivery failed"
                        );
                    }
                }
                Err(e) => {
                    result.failed += 1;
                    tracing::error!(error = %e, "notification delivery task panicked");
                }
            }
        }

        result.removed = self.registry.remove_all(gone.iter().map(String::as_str));

        tracing::info!(
            sent = result.sent,
            failed = result.failed,
            removed = result.removed,
            "notification results"
        );
        Ok(result)
    }
}
