//! Delivery channels for verification messages.
//!
//! Channels are registered by name in a [`DeliveryRegistry`] built at
//! startup. A routing string selects which registered channel serves which
//! recipients:
//!
//! ```text
//! twilio                 every recipient through "twilio"
//! 62:vonage,*:twilio     country code 62 through "vonage", the rest through "twilio"
//! corp.example:smtp,*:ses
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{EmailAddress, PhoneNumber};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider not enabled: {0}")]
    NotEnabled(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send error: {0}")]
    SendFailed(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication error: {0}")]
    Authentication(String),
}

#[async_trait]
pub trait TextMessageDelivery: Send + Sync {
    async fn send_text_message(&self, recipient: &PhoneNumber, body: &str)
        -> Result<(), ProviderError>;
}

#[async_trait]
pub trait HtmlMessageDelivery: Send + Sync {
    async fn send_html_message(
        &self,
        recipient: &EmailAddress,
        subject: &str,
        body: &str,
    ) -> Result<(), ProviderError>;
}

// ==================== Registry ====================

/// Named delivery channels available to the verifiers.
#[derive(Default, Clone)]
pub struct DeliveryRegistry {
    text: HashMap<String, Arc<dyn TextMessageDelivery>>,
    html: HashMap<String, Arc<dyn HtmlMessageDelivery>>,
}

impl DeliveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_text(&mut self, name: impl Into<String>, channel: Arc<dyn TextMessageDelivery>) {
        self.text.insert(name.into(), channel);
    }

    pub fn register_html(&mut self, name: impl Into<String>, channel: Arc<dyn HtmlMessageDelivery>) {
        self.html.insert(name.into(), channel);
    }

    /// Routes for SMS, keyed by country code.
    pub fn text_routes(
        &self,
        routing: &str,
    ) -> Result<DeliveryRoutes<dyn TextMessageDelivery>, ProviderError> {
        DeliveryRoutes::build(routing, &self.text, |key| match key.parse::<i16>() {
            Ok(cc) if cc > 0 => Ok(cc.to_string()),
            _ => Err(ProviderError::Configuration(format!(
                "invalid country code {key:?} in SMS routing"
            ))),
        })
    }

    /// Routes for email, keyed by recipient domain.
    pub fn html_routes(
        &self,
        routing: &str,
    ) -> Result<DeliveryRoutes<dyn HtmlMessageDelivery>, ProviderError> {
        DeliveryRoutes::build(routing, &self.html, |key| {
            if key.is_empty() || key.contains('@') {
                Err(ProviderError::Configuration(format!(
                    "invalid domain {key:?} in email routing"
                )))
            } else {
                Ok(key.to_lowercase())
            }
        })
    }
}

// ==================== Routing ====================

const DEFAULT_ROUTE: &str = "*";

/// Delivery channel selection with a mandatory default.
pub struct DeliveryRoutes<S: ?Sized> {
    default: Arc<S>,
    routes: HashMap<String, Arc<S>>,
}

impl<S: ?Sized> DeliveryRoutes<S> {
    pub fn single(default: Arc<S>) -> Self {
        Self {
            default,
            routes: HashMap::new(),
        }
    }

    fn build<F>(
        routing: &str,
        channels: &HashMap<String, Arc<S>>,
        normalize_key: F,
    ) -> Result<Self, ProviderError>
    where
        F: Fn(&str) -> Result<String, ProviderError>,
    {
        let lookup = |name: &str| {
            channels.get(name).cloned().ok_or_else(|| {
                ProviderError::Configuration(format!("delivery service {name:?} is not registered"))
            })
        };

        let routing = routing.trim();
        if routing.is_empty() {
            return Err(ProviderError::Configuration(
                "delivery service must be specified".to_string(),
            ));
        }
        if !routing.contains(':') {
            return Ok(Self::single(lookup(routing)?));
        }

        let mut default = None;
        let mut routes = HashMap::new();
        for entry in routing.split(',') {
            let (key, name) = entry.split_once(':').ok_or_else(|| {
                ProviderError::Configuration(format!("invalid routing entry {entry:?}"))
            })?;
            let (key, name) = (key.trim(), name.trim());
            let channel = lookup(name)?;
            if key == DEFAULT_ROUTE {
                if default.replace(channel).is_some() {
                    return Err(ProviderError::Configuration(
                        "duplicate default route".to_string(),
                    ));
                }
                continue;
            }
            let key = normalize_key(key)?;
            if routes.insert(key.clone(), channel).is_some() {
                return Err(ProviderError::Configuration(format!(
                    "duplicate route for {key:?}"
                )));
            }
        }

        let default = default.ok_or_else(|| {
            ProviderError::Configuration("routing requires a default (*) route".to_string())
        })?;
        Ok(Self { default, routes })
    }

    pub fn select(&self, key: &str) -> &Arc<S> {
        self.routes.get(key).unwrap_or(&self.default)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len() + 1
    }
}

// ==================== Null and Mock Channels ====================

/// Accepts every message and delivers nothing.
pub struct NullDelivery;

#[async_trait]
impl TextMessageDelivery for NullDelivery {
    async fn send_text_message(&self, recipient: &PhoneNumber, _body: &str) -> Result<(), ProviderError> {
        tracing::debug!(recipient = %recipient, "[NULL] SMS dropped");
        Ok(())
    }
}

#[async_trait]
impl HtmlMessageDelivery for NullDelivery {
    async fn send_html_message(
        &self,
        recipient: &EmailAddress,
        _subject: &str,
        _body: &str,
    ) -> Result<(), ProviderError> {
        tracing::debug!(recipient = %recipient, "[NULL] email dropped");
        Ok(())
    }
}

/// A message captured by [`MockDelivery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
}

/// Mock delivery channel for testing. Records every message it accepts.
pub struct MockDelivery {
    enabled: bool,
    sent: Mutex<Vec<SentMessage>>,
}

impl MockDelivery {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Most recent message delivered to the recipient.
    pub fn last_to(&self, recipient: &str) -> Option<SentMessage> {
        self.sent()
            .into_iter()
            .rev()
            .find(|m| m.recipient == recipient)
    }

    fn record(&self, message: SentMessage) -> Result<(), ProviderError> {
        if !self.enabled {
            return Err(ProviderError::NotEnabled(
                "Mock delivery is not enabled".to_string(),
            ));
        }
        tracing::info!(
            recipient = %message.recipient,
            body_length = %message.body.len(),
            "[MOCK] message would be sent"
        );
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(message);
        Ok(())
    }
}

#[async_trait]
impl TextMessageDelivery for MockDelivery {
    async fn send_text_message(&self, recipient: &PhoneNumber, body: &str) -> Result<(), ProviderError> {
        self.record(SentMessage {
            recipient: recipient.to_string(),
            subject: None,
            body: body.to_string(),
        })
    }
}

#[async_trait]
impl HtmlMessageDelivery for MockDelivery {
    async fn send_html_message(
        &self,
        recipient: &EmailAddress,
        subject: &str,
        body: &str,
    ) -> Result<(), ProviderError> {
        self.record(SentMessage {
            recipient: recipient.to_string(),
            subject: Some(subject.to_string()),
            body: body.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeliveryRegistry {
        let mut registry = DeliveryRegistry::new();
        registry.register_text("twilio", Arc::new(MockDelivery::new(true)));
        registry.register_text("vonage", Arc::new(MockDelivery::new(true)));
        registry.register_html("smtp", Arc::new(MockDelivery::new(true)));
        registry
    }

    #[test]
    fn test_single_service_routing() -> Result<(), ProviderError> {
        let routes = registry().text_routes("twilio")?;
        assert_eq!(routes.route_count(), 1);
        Ok(())
    }

    #[test]
    fn test_country_code_routing() -> Result<(), ProviderError> {
        let registry = registry();
        let routes = registry.text_routes("62:vonage, *:twilio")?;
        assert_eq!(routes.route_count(), 2);
        let vonage = registry.text.get("vonage").cloned();
        let twilio = registry.text.get("twilio").cloned();
        assert!(Arc::ptr_eq(routes.select("62"), vonage.as_ref().unwrap()));
        assert!(Arc::ptr_eq(routes.select("1"), twilio.as_ref().unwrap()));
        Ok(())
    }

    #[test]
    fn test_routing_errors() {
        let registry = registry();
        assert!(registry.text_routes("").is_err());
        assert!(registry.text_routes("sinch").is_err());
        assert!(registry.text_routes("62:vonage").is_err(), "missing default");
        assert!(registry.text_routes("62:vonage,62:twilio,*:twilio").is_err());
        assert!(registry.text_routes("0:vonage,*:twilio").is_err());
        assert!(registry.text_routes("id:vonage,*:twilio").is_err());
        assert!(registry.text_routes("62:sinch,*:twilio").is_err());
    }

    #[test]
    fn test_domain_routing() -> Result<(), ProviderError> {
        let routes = registry().html_routes("Corp.Example:smtp,*:smtp")?;
        assert_eq!(routes.route_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_mock_delivery_records_messages() -> Result<(), ProviderError> {
        let mock = MockDelivery::new(true);
        let number = PhoneNumber::new(62, 81_234_567);
        mock.send_text_message(&number, "hello").await?;
        assert_eq!(mock.send_count(), 1);
        assert_eq!(
            mock.last_to("+6281234567").map(|m| m.body),
            Some("hello".to_string())
        );

        let disabled = MockDelivery::new(false);
        assert!(disabled.send_text_message(&number, "hello").await.is_err());
        Ok(())
    }
}
