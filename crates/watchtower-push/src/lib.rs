//! Web push notifications for the Watchtower relay.
//!
//! Browsers register a `PushSubscription` with the server; when a camera
//! reports a detection the server pushes a small `{title, body}` message to
//! every registered device.
//!
//! - [`SubscriptionRegistry`] keeps the subscriber set, one entry per endpoint.
//! - [`NotificationDispatcher`] fans a notification out to all subscribers
//!   concurrently and drops subscribers whose endpoint is gone.
//! - [`PushTransport`] is the delivery seam; [`WebPushTransport`] speaks
//!   the Web Push protocol with VAPID authentication.
//!
//! Delivery is best effort. A failed delivery is counted and logged, never
//! retried within the same call.

mod dispatcher;
mod error;
mod subscription;
mod transport;

pub use dispatcher::{DispatchResult, NotificationDispatcher, PushPayload};
pub use error::{DeliveryError, DispatchError, PushError};
pub use subscription::{Subscription, SubscriptionKeys, SubscriptionRegistry};
pub use transport::{classify_status, PushTransport, VapidCredentials, WebPushTransport};
