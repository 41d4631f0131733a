//! Push delivery transports.
//!
//! [`PushTransport`] is the seam between dispatch and the network.
//! [`WebPushTransport`] is the production implementation: it encrypts the
//! payload for the subscriber (RFC 8291, `aes128gcm`), signs the request
//! with the server's VAPID key (RFC 8292), and POSTs it to the
//! subscription endpoint.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::fmt;
use std::time::Duration;
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushMessage,
    WebPushMessageBuilder, URL_SAFE_NO_PAD,
};

use crate::error::{DeliveryError, PushError};
use crate::subscription::Subscription;

/// Per-request timeout for calls to push services.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivers one encoded payload to one subscriber.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Attempts a single delivery. No retries happen here.
    async fn deliver(&self, subscription: &Subscription, payload: &[u8])
        -> Result<(), DeliveryError>;
}

/// VAPID key pair and contact identity used to authenticate push requests.
#[derive(Clone)]
pub struct VapidCredentials {
    /// Application server public key (base64url, uncompressed P-256 point).
    pub public_key: String,
    /// Application server private key (base64url, raw P-256 scalar).
    pub private_key: String,
    /// Contact address sent as the `sub` claim, with or without `mailto:`.
    pub contact: String,
}

impl fmt::Debug for VapidCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VapidCredentials")
            .field("public_key", &self.public_key)
            .field("private_key", &"[REDACTED]")
            .field("contact", &self.contact)
            .finish()
    }
}

impl VapidCredentials {
    /// Builds credentials from optional configuration values.
    ///
    /// Returns `None` unless both keys are present and non-empty.
    pub fn from_parts(
        public_key: Option<&str>,
        private_key: Option<&str>,
        contact: Option<&str>,
    ) -> Option<Self> {
        let public_key = public_key.map(str::trim).filter(|k| !k.is_empty())?;
        let private_key = private_key.map(str::trim).filter(|k| !k.is_empty())?;
        Some(Self {
            public_key: public_key.to_string(),
            private_key: private_key.to_string(),
            contact: contact.unwrap_or_default().trim().to_string(),
        })
    }

    /// The `sub` claim value.
    pub fn subject(&self) -> String {
        if self.contact.starts_with("mailto:") || self.contact.starts_with("https://") {
            self.contact.clone()
        } else {
            format!("mailto:{}", self.contact)
        }
    }

    /// Checks that the private key can be loaded by the VAPID signer.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::InvalidCredentials`] for malformed keys or a
    /// missing contact identity.
    pub fn validate(&self) -> Result<(), PushError> {
        if self.contact.is_empty() {
            return Err(PushError::InvalidCredentials(
                "contact identity is empty".to_string(),
            ));
        }
        VapidSignatureBuilder::from_base64_no_sub(&self.private_key, URL_SAFE_NO_PAD)
            .map(|_| ())
            .map_err(|e| PushError::InvalidCredentials(format!("private key rejected: {e}")))
    }
}

/// Web push transport backed by `reqwest`.
#[derive(Debug)]
pub struct WebPushTransport {
    http: reqwest::Client,
    credentials: VapidCredentials,
    ttl_secs: u32,
}

impl WebPushTransport {
    /// Creates a transport after validating the credentials.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::InvalidCredentials`] if the keys are unusable,
    /// or [`PushError::Client`] if the HTTP client cannot be built.
    pub fn new(credentials: VapidCredentials, ttl_secs: u32) -> Result<Self, PushError> {
        credentials.validate()?;
        let http = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            credentials,
            ttl_secs,
        })
    }

    fn build_message(
        &self,
        subscription: &Subscription,
        payload: &[u8],
    ) -> Result<WebPushMessage, web_push::WebPushError> {
        let info = SubscriptionInfo::new(
            &subscription.endpoint,
            &subscription.keys.p256dh,
            &subscription.keys.auth,
        );

        let mut signer = VapidSignatureBuilder::from_base64(
            &self.credentials.private_key,
            URL_SAFE_NO_PAD,
            &info,
        )?;
        signer.add_claim("sub", self.credentials.subject());
        let signature = signer.build()?;

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_ttl(self.ttl_secs);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_vapid_signature(signature);
        builder.build()
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn deliver(
        &self,
        subscription: &Subscription,
        payload: &[u8],
    ) -> Result<(), DeliveryError> {
        let message = self
            .build_message(subscription, payload)
            .map_err(|e| DeliveryError::Transient(format!("failed to build push message: {e}")))?;

        let mut request = self
            .http
            .post(message.endpoint.to_string())
            .header("TTL", message.ttl.to_string());

        let body = match message.payload {
            Some(encrypted) => {
                request = request
                    .header("Content-Encoding", encrypted.content_encoding.to_str())
                    .header("Content-Type", "application/octet-stream");
                for (name, value) in encrypted.crypto_headers {
                    request = request.header(name, value);
                }
                encrypted.content
            }
            None => Vec::new(),
        };

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        classify_status(response.status())
    }
}

/// Maps a push service response status to a delivery outcome.
///
/// 404 and 410 mean the subscription is gone for good. Everything else that
/// is not a success, including statuses we do not recognise, is transient.
pub fn classify_status(status: StatusCode) -> Result<(), DeliveryError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(DeliveryError::PermanentlyGone {
            status: status.as_u16(),
        }),
        other => Err(DeliveryError::Transient(format!(
            "push service responded {other}"
        ))),
    }
}
