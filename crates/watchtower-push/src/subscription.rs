//! Push subscriptions and the in-memory subscriber registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::PushError;

/// Client key material from the browser's `PushSubscription`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    /// Client public key (P-256 ECDH, base64url).
    pub p256dh: String,
    /// Client authentication secret (base64url).
    pub auth: String,
}

/// A browser push subscription, keyed by its endpoint URL.
///
/// Deserialises directly from the JSON produced by
/// `PushSubscription.toJSON()`; unknown fields such as `expirationTime`
/// are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Push service URL; unique per subscriber.
    pub endpoint: String,
    /// Keys used to encrypt payloads for this subscriber.
    pub keys: SubscriptionKeys,
}

impl Subscription {
    /// Checks that the subscription can be delivered to.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::InvalidSubscription`] for an empty endpoint or
    /// empty key material.
    pub fn validate(&self) -> Result<(), PushError> {
        if self.endpoint.trim().is_empty() {
            return Err(PushError::InvalidSubscription(
                "endpoint is empty".to_string(),
            ));
        }
        if self.keys.p256dh.trim().is_empty() || self.keys.auth.trim().is_empty() {
            return Err(PushError::InvalidSubscription(
                "subscription keys are empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Shortened endpoint for log lines.
    pub fn endpoint_prefix(&self) -> &str {
        let end = self
            .endpoint
            .char_indices()
            .nth(50)
            .map_or(self.endpoint.len(), |(i, _)| i);
        &self.endpoint[..end]
    }
}

/// Set of push subscribers, deduplicated by endpoint.
///
/// Cloning yields another handle to the same set. Lock guards are only held
/// for single map operations and never across an `.await`, so a synchronous
/// lock is used.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    subscribers: Arc<RwLock<HashMap<String, Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber.
    ///
    /// Returns `true` if the endpoint was new and `false` if it was already
    /// registered. Re-adding a known endpoint is a successful no-op apart
    /// from refreshing its keys.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::InvalidSubscription`] if validation fails; the
    /// registry is left unchanged.
    pub fn add(&self, subscription: Subscription) -> Result<bool, PushError> {
        subscription.validate()?;

        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match subscribers.get_mut(&subscription.endpoint) {
            Some(existing) => {
                if existing.keys != subscription.keys {
                    tracing::debug!(
                        endpoint = %subscription.endpoint_prefix(),
                        "refreshed keys for known subscriber"
                    );
                    existing.keys = subscription.keys;
                }
                Ok(false)
            }
            None => {
                subscribers.insert(subscription.endpoint.clone(), subscription);
                Ok(true)
            }
        }
    }

    /// Removes a subscriber by endpoint. Returns `true` if it was present.
    pub fn remove(&self, endpoint: &str) -> bool {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(endpoint)
            .is_some()
    }

    /// Removes several subscribers in one mutation. Returns how many were present.
    pub fn remove_all<'a>(&self, endpoints: impl IntoIterator<Item = &'a str>) -> usize {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        endpoints
            .into_iter()
            .filter(|endpoint| subscribers.remove(*endpoint).is_some())
            .count()
    }

    /// Copies the current subscriber set.
    ///
    /// The copy is detached from the registry, so callers may iterate it
    /// while other tasks add or remove subscribers.
    pub fn all(&self) -> Vec<Subscription> {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(endpoint)
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(endpoint: &str) -> Subscription {
        Subscription {
            endpoint: endpoint.to_string(),
            keys: SubscriptionKeys {
                p256dh: "BNcRdreALRFXTkOOUHK1EtK2wtaz5Ry4YfYCA_0QTpQtUbVlUls0VJXg7A8u-Ts1XbjhazAkj7I99e8QcYP7DkM".to_string(),
                auth: "tBHItJI5svbpez7KI4CCXg".to_string(),
            },
        }
    }

    #[test]
    fn add_is_idempotent_by_endpoint() {
        let registry = SubscriptionRegistry::new();

        assert!(registry.add(sub("https://push.example/a")).unwrap());
        assert!(!registry.add(sub("https://push.example/a")).unwrap());

        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn re_add_refreshes_keys() {
        let registry = SubscriptionRegistry::new();
        registry.add(sub("https://push.example/a")).unwrap();

        let mut updated = sub("https://push.example/a");
        updated.keys.auth = "new-auth".to_string();
        assert!(!registry.add(updated).unwrap());

        assert_eq!(registry.all()[0].keys.auth, "new-auth");
    }

    #[test]
    fn add_rejects_empty_endpoint() {
        let registry = SubscriptionRegistry::new();

        let err = registry.add(sub("  ")).expect_err("empty endpoint");
        assert!(matches!(err, PushError::InvalidSubscription(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn add_rejects_empty_keys() {
        let registry = SubscriptionRegistry::new();
        let mut bad = sub("https://push.example/a");
        bad.keys.p256dh.clear();

        assert!(registry.add(bad).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_is_noop_when_absent() {
        let registry = SubscriptionRegistry::new();
        registry.add(sub("https://push.example/a")).unwrap();

        assert!(!registry.remove("https://push.example/missing"));
        assert!(registry.remove("https://push.example/a"));
        assert!(!registry.remove("https://push.example/a"));
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_all_counts_present_entries() {
        let registry = SubscriptionRegistry::new();
        registry.add(sub("https://push.example/a")).unwrap();
        registry.add(sub("https://push.example/b")).unwrap();

        let removed = registry.remove_all(["https://push.example/a", "https://push.example/zzz"]);

        assert_eq!(removed, 1);
        assert!(registry.contains("https://push.example/b"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn all_is_detached_from_later_mutation() {
        let registry = SubscriptionRegistry::new();
        registry.add(sub("https://push.example/a")).unwrap();

        let snapshot = registry.all();
        registry.remove("https://push.example/a");

        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn deserializes_browser_subscription_json() {
        let json = r#"{
            "endpoint": "https://fcm.googleapis.com/fcm/send/abc",
            "expirationTime": null,
            "keys": { "p256dh": "key", "auth": "secret" }
        }"#;

        let parsed: Subscription = serde_json::from_str(json).expect("should parse");
        assert_eq!(parsed.endpoint, "https://fcm.googleapis.com/fcm/send/abc");
        assert_eq!(parsed.keys.auth, "secret");
    }

    #[test]
    fn endpoint_prefix_truncates_long_urls() {
        let long = format!("https://push.example/{}", "x".repeat(100));
        assert_eq!(sub(&long).endpoint_prefix().len(), 50);
        assert_eq!(sub("https://short").endpoint_prefix(), "https://short");
    }
}
