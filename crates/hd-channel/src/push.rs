//! Push notification adapter (FCM-compatible HTTP gateway).

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use hd_common::{ChannelKind, NotificationEvent};

use crate::{
    classify_status, data_str, rendered_body, rendered_title, ChannelAdapter, ChannelError,
    SendOutcome,
};

#[derive(Debug, Clone)]
pub struct PushAdapterConfig {
    pub endpoint: String,
    pub api_key: String,
    pub timeout: Duration,
}

impl Default for PushAdapterConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://fcm.googleapis.com/fcm/send".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct PushAdapter {
    config: PushAdapterConfig,
    client: reqwest::Client,
}

impl PushAdapter {
    pub fn new(config: PushAdapterConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait]
impl ChannelAdapter for PushAdapter {
    fn name(&self) -> ChannelKind {
        ChannelKind::Push
    }

    async fn send(&self, event: &NotificationEvent) -> Result<(), ChannelError> {
        // Device token from the payload, falling back to the user id for
        // gateways that resolve tokens themselves.
        let token = data_str(event, "push_token").unwrap_or(&event.user_id);
        if token.is_empty() {
            warn!(event_id = %event.event_id, "No push token or user id, skipping");
            return Ok(());
        }

        let payload = json!({
            "to": token,
            "notification": {
                "title": rendered_title(event),
                "body": rendered_body(event),
            },
            "data": {
                "event_id": event.event_id,
                "event_type": event.event_type,
            },
        });

        let mut request = self.client.post(&self.config.endpoint).json(&payload);
        if !self.config.api_key.is_empty() {
            request = request.header("Authorization", format!("key={}", self.config.api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChannelError::transient(format!("push gateway: {e}")))?;

        let status = response.status().as_u16();
        match classify_status(status) {
            SendOutcome::Delivered => {
                debug!(event_id = %event.event_id, status = status, "Push sent");
                Ok(())
            }
            SendOutcome::Permanent => {
                warn!(event_id = %event.event_id, status = status, "Push rejected permanently");
                Ok(())
            }
            SendOutcome::Transient => Err(ChannelError::with_status(
                format!("push gateway returned {status}"),
                status,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::event;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn adapter(server: &MockServer) -> PushAdapter {
        PushAdapter::new(PushAdapterConfig {
            endpoint: format!("{}/fcm/send", server.uri()),
            api_key: "test-key".to_string(),
            timeout: Duration::from_secs(2),
        })
    }

    #[tokio::test]
    async fn delivers_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fcm/send"))
            .and(body_partial_json(serde_json::json!({"to": "7"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        let event = event(vec![ChannelKind::Push]);
        assert!(adapter.send(&event).await.is_ok());
    }

    #[tokio::test]
    async fn provider_4xx_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        let event = event(vec![ChannelKind::Push]);
        assert!(adapter.send(&event).await.is_ok());
    }

    #[tokio::test]
    async fn provider_5xx_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        let event = event(vec![ChannelKind::Push]);
        let err = adapter.send(&event).await.unwrap_err();
        assert_eq!(err.status, Some(503));
    }

    #[tokio::test]
    async fn device_token_beats_user_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"to": "device-abc"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let adapter = adapter(&server).await;
        let mut event = event(vec![ChannelKind::Push]);
        event
            .data
            .insert("push_token".to_string(), serde_json::json!("device-abc"));
        assert!(adapter.send(&event).await.is_ok());
    }
}
