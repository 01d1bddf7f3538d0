//! Delayed-message producer.
//!
//! Serializes payloads as JSON, carries the schedule delay in the
//! `x-delay` header (milliseconds, clamped to a signed int32 - the plugin's
//! limit), publishes persistent and awaits the publisher confirm under a
//! send deadline. The underlying channel sits behind a mutex, so one
//! producer is safe to share across tasks.

use chrono::Utc;
use lapin::{
    options::{BasicPublishOptions, ConfirmSelectOptions},
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{Broker, BrokerError, Result};

/// Per-publish options: schedule delay and extra headers.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub delay: Option<Duration>,
    pub headers: BTreeMap<String, String>,
}

impl PublishOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

/// Clamp a delay to the plugin's signed-int32 millisecond header.
fn delay_millis(delay: Duration) -> i32 {
    std::cmp::min(delay.as_millis(), i32::MAX as u128) as i32
}

pub struct Producer {
    exchange: String,
    channel: Mutex<Channel>,
    publish_timeout: Duration,
}

impl Producer {
    /// Create a producer over a fresh channel with publisher confirms on.
    pub async fn new(broker: &Broker, exchange: impl Into<String>, publish_timeout: Duration) -> Result<Self> {
        let channel = broker.channel().await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| BrokerError::Connection(format!("confirm select: {e}")))?;

        Ok(Self {
            exchange: exchange.into(),
            channel: Mutex::new(channel),
            publish_timeout,
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Publish one JSON payload. Persistent delivery, publish timestamp,
    /// caller headers merged, `x-delay` set when a delay was requested.
    pub async fn publish<T: Serialize>(
        &self,
        routing_key: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<()> {
        let body = serde_json::to_vec(payload)?;

        let mut headers = FieldTable::default();
        for (key, value) in &options.headers {
            headers.insert(key.as_str().into(), AMQPValue::LongString(value.clone().into()));
        }
        if let Some(delay) = options.delay {
            if !delay.is_zero() {
                headers.insert("x-delay".into(), AMQPValue::LongInt(delay_millis(delay)));
            }
        }

        let properties = BasicProperties::default()
            .with_delivery_mode(2) // persistent
            .with_content_type("application/json".into())
            .with_timestamp(Utc::now().timestamp_millis() as u64)
            .with_headers(headers);

        let channel = self.channel.lock().await;
        let send = async {
            channel
                .basic_publish(
                    &self.exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    &body,
                    properties,
                )
                .await
                .map_err(|e| BrokerError::Publish(e.to_string()))?
                .await
                .map_err(|e| BrokerError::Publish(format!("confirm failed: {e}")))?;
            Ok::<(), BrokerError>(())
        };

        tokio::time::timeout(self.publish_timeout, send)
            .await
            .map_err(|_| BrokerError::PublishTimeout(self.publish_timeout))??;

        metrics::counter!("broker.published_total").increment(1);

        debug!(
            exchange = %self.exchange,
            routing_key = %routing_key,
            delay_ms = options.delay.map(delay_millis).unwrap_or(0),
            "Message published"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_is_converted_to_millis() {
        assert_eq!(delay_millis(Duration::from_secs(2)), 2_000);
        assert_eq!(delay_millis(Duration::from_millis(1)), 1);
    }

    #[test]
    fn delay_is_clamped_to_int32() {
        // 2_147_483 seconds fits; anything larger clamps
        assert_eq!(delay_millis(Duration::from_secs(2_147_483)), 2_147_483_000);
        assert_eq!(delay_millis(Duration::from_secs(3_000_000)), i32::MAX);
    }

    #[test]
    fn options_accumulate_headers() {
        let options = PublishOptions::new()
            .with_delay(Duration::from_secs(30))
            .with_header("x-event-type", "order.shipped")
            .with_header("x-campaign-id", "7");

        assert_eq!(options.delay, Some(Duration::from_secs(30)));
        assert_eq!(
            options.headers.get("x-event-type").map(String::as_str),
            Some("order.shipped")
        );
        assert_eq!(options.headers.len(), 2);
    }
}
