//! Herald channel adapters.
//!
//! One adapter per delivery channel. Adapters are stateless with respect to
//! the dispatch engine; provider clients (SMTP pool, HTTP client, Redis
//! connection) live inside the adapter.
//!
//! # Error contract
//!
//! `send` returns `Ok(())` for a successful delivery **and** for permanent
//! failures (invalid address, missing recipient data, provider 4xx) -
//! retrying those can never succeed. It returns `Err(ChannelError)` only
//! for transient failures (connect errors, timeouts, 429, provider 5xx),
//! which the dispatch engine may turn into a broker redelivery.

use async_trait::async_trait;
use thiserror::Error;

use hd_common::{ChannelKind, NotificationEvent, RENDERED_BODY_KEY, RENDERED_TITLE_KEY};

pub mod email;
pub mod inapp;
pub mod push;
pub mod sms;
pub mod webhook;

pub use email::{EmailAdapter, EmailAdapterConfig};
pub use inapp::{InAppAdapter, InAppAdapterConfig};
pub use push::{PushAdapter, PushAdapterConfig};
pub use sms::{SmsAdapter, SmsAdapterConfig};
pub use webhook::{WebhookAdapter, WebhookAdapterConfig};

/// Transient send failure. Permanent failures never surface here.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ChannelError {
    pub message: String,
    /// Provider HTTP status, when there was one.
    pub status: Option<u16>,
}

impl ChannelError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn name(&self) -> ChannelKind;

    async fn send(&self, event: &NotificationEvent) -> Result<(), ChannelError>;
}

/// Classification of a provider HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// Will never succeed on retry; logged and acked.
    Permanent,
    /// Worth a broker redelivery.
    Transient,
}

/// Map an HTTP status to the send outcome. Timeouts and rate limits are
/// transient; other client errors are permanent.
pub fn classify_status(status: u16) -> SendOutcome {
    match status {
        200..=299 => SendOutcome::Delivered,
        408 | 429 => SendOutcome::Transient,
        400..=499 => SendOutcome::Permanent,
        _ => SendOutcome::Transient,
    }
}

/// String value from the event's data map.
pub(crate) fn data_str<'a>(event: &'a NotificationEvent, key: &str) -> Option<&'a str> {
    event.data.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Rendered title injected by the dispatch engine (empty if absent).
pub(crate) fn rendered_title(event: &NotificationEvent) -> &str {
    data_str(event, RENDERED_TITLE_KEY).unwrap_or("")
}

/// Rendered body injected by the dispatch engine (empty if absent).
pub(crate) fn rendered_body(event: &NotificationEvent) -> &str {
    data_str(event, RENDERED_BODY_KEY).unwrap_or("")
}

#[cfg(test)]
pub(crate) mod testutil {
    use hd_common::{ChannelKind, DeliveryMode, NotificationEvent};
    use serde_json::json;

    pub fn event(channels: Vec<ChannelKind>) -> NotificationEvent {
        let mut data = serde_json::Map::new();
        data.insert("__title__".to_string(), json!("Order shipped"));
        data.insert("__body__".to_string(), json!("Your order is on its way"));

        NotificationEvent {
            event_id: "campaign-1-user-7".to_string(),
            event_type: "order.shipped".to_string(),
            delivery_mode: DeliveryMode::User,
            channels,
            user_id: "7".to_string(),
            locale: "en".to_string(),
            data,
            meta: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(classify_status(200), SendOutcome::Delivered);
        assert_eq!(classify_status(204), SendOutcome::Delivered);
        assert_eq!(classify_status(400), SendOutcome::Permanent);
        assert_eq!(classify_status(404), SendOutcome::Permanent);
        assert_eq!(classify_status(408), SendOutcome::Transient);
        assert_eq!(classify_status(429), SendOutcome::Transient);
        assert_eq!(classify_status(500), SendOutcome::Transient);
        assert_eq!(classify_status(503), SendOutcome::Transient);
    }
}
