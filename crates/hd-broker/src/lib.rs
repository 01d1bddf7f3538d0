//! Herald AMQP broker abstraction
//!
//! Provides:
//! - A long-lived connection with automatic reconnect
//! - A delayed-message producer (x-delay header, publisher confirms)
//! - A worker-pool consumer (QoS, concurrent workers, ack/nack)
//! - Topology bootstrap for exchanges, queues and bindings

use async_trait::async_trait;

pub mod connection;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod topology;

pub use connection::Broker;
pub use consumer::{Consumer, ConsumerSettings, MessageHandler};
pub use error::BrokerError;
pub use producer::{Producer, PublishOptions};
pub use topology::{ExchangeSpec, ExchangeType, QueueSpec, Topology};

pub type Result<T> = std::result::Result<T, BrokerError>;

use hd_common::NotificationEvent;

/// Seam for publishing notification events.
///
/// The campaign service and the dispatcher consumer publish through this
/// trait; production wiring hands them a [`Producer`], tests hand them a
/// recording double.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_event(
        &self,
        routing_key: &str,
        event: &NotificationEvent,
        options: PublishOptions,
    ) -> Result<()>;
}

#[async_trait]
impl EventPublisher for Producer {
    async fn publish_event(
        &self,
        routing_key: &str,
        event: &NotificationEvent,
        options: PublishOptions,
    ) -> Result<()> {
        self.publish(routing_key, event, options).await
    }
}

/// Publish options carrying the standard event headers, plus an optional
/// schedule delay. Used by the campaign service (with delay) and by the
/// dispatcher when it re-publishes with zero delay.
pub fn event_publish_options(
    event: &NotificationEvent,
    delay: Option<std::time::Duration>,
) -> PublishOptions {
    let mut options = PublishOptions::new()
        .with_header(hd_common::headers::EVENT_TYPE, &event.event_type)
        .with_header(hd_common::headers::EVENT_ID, &event.event_id)
        .with_header(hd_common::headers::DELIVERY_MODE, event.delivery_mode.as_str());

    let campaign_id = event.campaign_id();
    if campaign_id > 0 {
        options = options.with_header(hd_common::headers::CAMPAIGN_ID, campaign_id.to_string());
    }
    if !event.user_id.is_empty() {
        options = options.with_header(hd_common::headers::USER_ID, &event.user_id);
    }
    if let Some(delay) = delay {
        options = options.with_delay(delay);
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use hd_common::DeliveryMode;

    #[test]
    fn event_options_carry_standard_headers() {
        let mut event = NotificationEvent {
            event_id: "campaign-9-user-4".to_string(),
            event_type: "order.shipped".to_string(),
            delivery_mode: DeliveryMode::User,
            channels: vec![],
            user_id: "4".to_string(),
            locale: "en".to_string(),
            data: Default::default(),
            meta: Default::default(),
        };
        event
            .meta
            .insert(hd_common::META_CAMPAIGN_ID.to_string(), "9".to_string());

        let options = event_publish_options(&event, Some(std::time::Duration::from_secs(60)));

        assert_eq!(
            options.headers.get(hd_common::headers::EVENT_ID).map(String::as_str),
            Some("campaign-9-user-4")
        );
        assert_eq!(
            options.headers.get(hd_common::headers::CAMPAIGN_ID).map(String::as_str),
            Some("9")
        );
        assert_eq!(
            options.headers.get(hd_common::headers::USER_ID).map(String::as_str),
            Some("4")
        );
        assert_eq!(options.delay, Some(std::time::Duration::from_secs(60)));
    }

    #[test]
    fn blast_event_omits_user_header() {
        let event = NotificationEvent {
            event_id: "campaign-9-blast".to_string(),
            event_type: "order.shipped".to_string(),
            delivery_mode: DeliveryMode::Blast,
            channels: vec![],
            user_id: String::new(),
            locale: "en".to_string(),
            data: Default::default(),
            meta: Default::default(),
        };

        let options = event_publish_options(&event, None);
        assert!(!options.headers.contains_key(hd_common::headers::USER_ID));
        assert!(options.delay.is_none());
    }
}
