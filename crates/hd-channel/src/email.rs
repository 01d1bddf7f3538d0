//! SMTP email adapter.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, warn};

use hd_common::{ChannelKind, NotificationEvent};

use crate::{data_str, rendered_body, rendered_title, ChannelAdapter, ChannelError};

#[derive(Debug, Clone)]
pub struct EmailAdapterConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl Default for EmailAdapterConfig {
    fn default() -> Self {
        Self {
            smtp_host: "localhost".to_string(),
            smtp_port: 1025,
            username: String::new(),
            password: String::new(),
            from: "Herald <no-reply@herald.local>".to_string(),
        }
    }
}

pub struct EmailAdapter {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailAdapter {
    pub fn new(config: EmailAdapterConfig) -> anyhow::Result<Self> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
                .port(config.smtp_port);

        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(config.username, config.password));
        }

        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid from address [{}]: {e}", config.from))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    fn name(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn send(&self, event: &NotificationEvent) -> Result<(), ChannelError> {
        let Some(to) = data_str(event, "email") else {
            warn!(event_id = %event.event_id, "No email address in event data, skipping");
            return Ok(());
        };

        let to: Mailbox = match to.parse() {
            Ok(mailbox) => mailbox,
            Err(e) => {
                warn!(event_id = %event.event_id, address = %to, error = %e, "Invalid email address, skipping");
                return Ok(());
            }
        };

        let message = match Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(rendered_title(event))
            .header(ContentType::TEXT_PLAIN)
            .body(rendered_body(event).to_string())
        {
            Ok(message) => message,
            Err(e) => {
                warn!(event_id = %event.event_id, error = %e, "Could not build email message, skipping");
                return Ok(());
            }
        };

        match self.transport.send(message).await {
            Ok(_) => {
                debug!(event_id = %event.event_id, "Email sent");
                Ok(())
            }
            Err(e) if e.is_permanent() => {
                warn!(event_id = %event.event_id, error = %e, "SMTP rejected message permanently");
                Ok(())
            }
            Err(e) => Err(ChannelError::transient(format!("smtp: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::event;

    #[tokio::test]
    async fn missing_recipient_is_a_permanent_skip() {
        let adapter = EmailAdapter::new(EmailAdapterConfig::default()).unwrap();
        let event = event(vec![ChannelKind::Email]);
        // no "email" key in data -> Ok without touching the transport
        assert!(adapter.send(&event).await.is_ok());
    }

    #[tokio::test]
    async fn invalid_recipient_is_a_permanent_skip() {
        let adapter = EmailAdapter::new(EmailAdapterConfig::default()).unwrap();
        let mut event = event(vec![ChannelKind::Email]);
        event
            .data
            .insert("email".to_string(), serde_json::json!("not-an-address"));
        assert!(adapter.send(&event).await.is_ok());
    }

    #[test]
    fn invalid_from_address_fails_construction() {
        let config = EmailAdapterConfig {
            from: "<<broken".to_string(),
            ..Default::default()
        };
        assert!(EmailAdapter::new(config).is_err());
    }
}
