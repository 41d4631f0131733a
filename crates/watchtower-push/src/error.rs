//! Error types for push subscriptions and notification dispatch.

/// Errors raised by the subscription registry and push configuration.
#[derive(Debug, thiserror::Error)]
pub enum PushError {
    /// The subscription is missing its endpoint or key material.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    /// The VAPID credentials are missing or cannot be used for signing.
    #[error("invalid push credentials: {0}")]
    InvalidCredentials(String),

    /// The HTTP client for push delivery could not be built.
    #[error("push client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Reasons a `notify_all` call fails before any delivery is attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Push credentials were absent or malformed at startup.
    #[error("push notifications are not configured")]
    NotConfigured,

    /// Nobody is subscribed.
    #[error("no push subscribers")]
    NoSubscribers,
}

/// Outcome of a single failed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The push service reports that the subscription no longer exists.
    #[error("subscription gone (status {status})")]
    PermanentlyGone {
        /// HTTP status returned by the push service.
        status: u16,
    },

    /// Any other failure; the subscriber is kept and tried again next time.
    #[error("transient delivery failure: {0}")]
    Transient(String),
}

impl DeliveryError {
    /// Returns `true` if the subscriber should be dropped from the registry.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::PermanentlyGone { .. })
    }
}
