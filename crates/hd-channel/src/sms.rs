//! SMS gateway adapter.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use hd_common::{ChannelKind, NotificationEvent};

use crate::{classify_status, data_str, rendered_body, ChannelAdapter, ChannelError, SendOutcome};

#[derive(Debug, Clone)]
pub struct SmsAdapterConfig {
    pub endpoint: String,
    pub api_key: String,
    pub sender: String,
    pub timeout: Duration,
}

impl Default for SmsAdapterConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9090/sms".to_string(),
            api_key: String::new(),
            sender: "HERALD".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

pub struct SmsAdapter {
    config: SmsAdapterConfig,
    client: reqwest::Client,
}

impl SmsAdapter {
    pub fn new(config: SmsAdapterConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }
}

#[async_trait]
impl ChannelAdapter for SmsAdapter {
    fn name(&self) -> ChannelKind {
        ChannelKind::Sms
    }

    async fn send(&self, event: &NotificationEvent) -> Result<(), ChannelError> {
        let Some(phone) = data_str(event, "phone") else {
            warn!(event_id = %event.event_id, "No phone number in event data, skipping");
            return Ok(());
        };

        let payload = json!({
            "from": self.config.sender,
            "to": phone,
            "message": rendered_body(event),
        });

        let mut request = self.client.post(&self.config.endpoint).json(&payload);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChannelError::transient(format!("sms gateway: {e}")))?;

        let status = response.status().as_u16();
        match classify_status(status) {
            SendOutcome::Delivered => {
                debug!(event_id = %event.event_id, status = status, "SMS sent");
                Ok(())
            }
            SendOutcome::Permanent => {
                warn!(event_id = %event.event_id, status = status, "SMS rejected permanently");
                Ok(())
            }
            SendOutcome::Transient => Err(ChannelError::with_status(
                format!("sms gateway returned {status}"),
                status,
            )),
        }
    }
}
