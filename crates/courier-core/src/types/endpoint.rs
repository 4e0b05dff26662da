//! Producer-registered webhook endpoints.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// A producer's webhook destination, as read from the endpoint registry.
///
/// The signing secret is held in a [`SecretString`] so it stays out of
/// `Debug` output and API responses; only the signer reads it.
#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    /// Endpoint identifier.
    pub id: Uuid,
    /// Owning producer.
    pub producer_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Destination URL.
    pub url: String,
    /// HMAC signing secret.
    pub secret: SecretString,
    /// Event types this endpoint subscribes to.
    #[serde(default)]
    pub event_types: HashSet<String>,
    /// Inactive endpoints receive nothing.
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Restrict to events of a single product. `None` means all products.
    #[serde(default)]
    pub product_id: Option<String>,
}

fn default_active() -> bool {
    true
}

impl Endpoint {
    /// Create an active endpoint with no subscriptions.
    pub fn new(
        producer_id: impl Into<String>,
        url: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            producer_id: producer_id.into(),
            name: String::new(),
            url: url.into(),
            secret: SecretString::new(secret.into()),
            event_types: HashSet::new(),
            is_active: true,
            product_id: None,
        }
    }

    /// Builder: set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Builder: subscribe to event types.
    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = events.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: scope to a single product.
    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    /// Builder: set the active flag.
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    /// Whether the endpoint has a non-empty signing secret.
    pub fn has_secret(&self) -> bool {
        !self.secret.expose_secret().trim().is_empty()
    }

    /// Whether an event of `event_type` scoped to `product_id` should be
    /// delivered here.
    ///
    /// Unscoped endpoints match every product; scoped endpoints match only
    /// their own product, and never an unscoped event.
    pub fn subscribes_to(&self, event_type: &str, product_id: Option<&str>) -> bool {
        if !self.is_active || !self.event_types.contains(event_type) {
            return false;
        }
        match (&self.product_id, product_id) {
            (None, _) => true,
            (Some(own), Some(other)) => own == other,
            (Some(_), None) => false,
        }
    }

    /// Public view of this endpoint, without the secret.
    pub fn summary(&self) -> EndpointSummary {
        let mut event_types: Vec<String> = self.event_types.iter().cloned().collect();
        event_types.sort();
        EndpointSummary {
            id: self.id,
            producer_id: self.producer_id.clone(),
            name: self.name.clone(),
            url: self.url.clone(),
            event_types,
            is_active: self.is_active,
            product_id: self.product_id.clone(),
        }
    }
}

/// Serializable endpoint view that never carries the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointSummary {
    pub id: Uuid,
    pub producer_id: String,
    pub name: String,
    pub url: String,
    pub event_types: Vec<String>,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribes_to_event_type() {
        let ep = Endpoint::new("prod-1", "https://example.com/hook", "s3cret")
            .with_events(["compra.aprovada", "assinatura.cancelada"]);

        assert!(ep.subscribes_to("compra.aprovada", None));
        assert!(ep.subscribes_to("assinatura.cancelada", Some("course-9")));
        assert!(!ep.subscribes_to("compra.recusada", None));
    }

    #[test]
    fn test_inactive_endpoint_matches_nothing() {
        let ep = Endpoint::new("prod-1", "https://example.com/hook", "s3cret")
            .with_events(["compra.aprovada"])
            .with_active(false);

        assert!(!ep.subscribes_to("compra.aprovada", None));
    }

    #[test]
    fn test_product_scoped_endpoint() {
        let ep = Endpoint::new("prod-1", "https://example.com/hook", "s3cret")
            .with_events(["compra.aprovada"])
            .with_product("course-1");

        assert!(ep.subscribes_to("compra.aprovada", Some("course-1")));
        assert!(!ep.subscribes_to("compra.aprovada", Some("course-2")));
        assert!(!ep.subscribes_to("compra.aprovada", None));
    }

    #[test]
    fn test_secret_is_redacted_in_debug() {
        let ep = Endpoint::new("prod-1", "https://example.com/hook", "super-secret-value");
        let debug = format!("{:?}", ep);
        assert!(!debug.contains("super-secret-value"));
        assert!(ep.has_secret());
    }

    #[test]
    fn test_blank_secret() {
        let ep = Endpoint::new("prod-1", "https://example.com/hook", "   ");
        assert!(!ep.has_secret());
    }
}
