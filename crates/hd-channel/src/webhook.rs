//! Webhook adapter with HMAC-SHA256 request signing.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, warn};

use hd_common::{ChannelKind, NotificationEvent};

use crate::{classify_status, data_str, ChannelAdapter, ChannelError, SendOutcome};

/// Herald webhook signature header
pub const SIGNATURE_HEADER: &str = "X-HERALD-SIGNATURE";
/// Herald webhook timestamp header
pub const TIMESTAMP_HEADER: &str = "X-HERALD-TIMESTAMP";

type HmacSha256 = Hmac<Sha256>;

/// Generate the HMAC-SHA256 signature for a webhook payload.
///
/// Signature payload = timestamp + body, hex-encoded digest.
pub fn sign_webhook(payload: &str, signing_secret: &str) -> (String, String) {
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();

    let signature_payload = format!("{timestamp}{payload}");

    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(signature_payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    (signature, timestamp)
}

#[derive(Debug, Clone)]
pub struct WebhookAdapterConfig {
    /// HMAC secret; empty disables signing.
    pub signing_secret: String,
    pub timeout: Duration,
}

impl Default for WebhookAdapterConfig {
    fn default() -> Self {
        Self {
            signing_secret: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct WebhookAdapter {
    config: WebhookAdapterConfig,
    client: reqwest::Client,
}

impl WebhookAdapter {
    pub fn new(config: WebhookAdapterConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn target_url<'a>(&self, event: &'a NotificationEvent) -> Option<&'a str> {
        event
            .meta
            .get("webhook_url")
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| data_str(event, "webhook_url"))
    }
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    fn name(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn send(&self, event: &NotificationEvent) -> Result<(), ChannelError> {
        let Some(url) = self.target_url(event) else {
            warn!(event_id = %event.event_id, "No webhook_url in event, skipping");
            return Ok(());
        };

        let payload = serde_json::to_string(event)
            .map_err(|e| ChannelError::transient(format!("serialize event: {e}")))?;

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .body(payload.clone());

        if !self.config.signing_secret.is_empty() {
            let (signature, timestamp) = sign_webhook(&payload, &self.config.signing_secret);
            request = request
                .header(SIGNATURE_HEADER, signature)
                .header(TIMESTAMP_HEADER, timestamp);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChannelError::transient(format!("webhook: {e}")))?;

        let status = response.status().as_u16();
        match classify_status(status) {
            SendOutcome::Delivered => {
                debug!(event_id = %event.event_id, status = status, "Webhook delivered");
                Ok(())
            }
            SendOutcome::Permanent => {
                warn!(event_id = %event.event_id, status = status, "Webhook rejected permanently");
                Ok(())
            }
            SendOutcome::Transient => Err(ChannelError::with_status(
                format!("webhook endpoint returned {status}"),
                status,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::event;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn signature_is_reproducible_from_timestamp_and_body() {
        let (signature, timestamp) = sign_webhook(r#"{"a":1}"#, "secret");

        let mut mac = HmacSha256::new_from_slice(b"secret").unwrap();
        mac.update(format!("{timestamp}{}", r#"{"a":1}"#).as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(signature, expected);
    }

    #[test]
    fn different_secrets_produce_different_signatures() {
        let (a, _) = sign_webhook("body", "secret-a");
        let (b, _) = sign_webhook("body", "secret-b");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn signs_and_posts_the_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/orders"))
            .and(header_exists(SIGNATURE_HEADER))
            .and(header_exists(TIMESTAMP_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = WebhookAdapter::new(WebhookAdapterConfig {
            signing_secret: "secret".to_string(),
            ..Default::default()
        });

        let mut event = event(vec![ChannelKind::Webhook]);
        event.meta.insert(
            "webhook_url".to_string(),
            format!("{}/hooks/orders", server.uri()),
        );
        assert!(adapter.send(&event).await.is_ok());
    }

    #[tokio::test]
    async fn missing_url_is_a_permanent_skip() {
        let adapter = WebhookAdapter::new(WebhookAdapterConfig::default());
        let event = event(vec![ChannelKind::Webhook]);
        assert!(adapter.send(&event).await.is_ok());
    }

    #[tokio::test]
    async fn endpoint_5xx_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let adapter = WebhookAdapter::new(WebhookAdapterConfig::default());
        let mut event = event(vec![ChannelKind::Webhook]);
        event
            .meta
            .insert("webhook_url".to_string(), server.uri());
        assert!(adapter.send(&event).await.is_err());
    }
}
