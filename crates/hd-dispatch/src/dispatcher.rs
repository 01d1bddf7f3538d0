//! Dispatcher consumer.
//!
//! Bound to the delayed exchange. Once the broker's delay has elapsed, it
//! re-publishes the event with zero delay to the blast fanout or, for user
//! events, to the direct exchange under `user.<id>`. It never invokes the
//! dispatch engine itself.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

use hd_broker::{event_publish_options, EventPublisher, MessageHandler};
use hd_common::{DeliveryMode, NotificationEvent};

pub struct DispatcherHandler {
    blast: Arc<dyn EventPublisher>,
    user: Arc<dyn EventPublisher>,
    blast_routing_key: String,
}

impl DispatcherHandler {
    pub fn new(
        blast: Arc<dyn EventPublisher>,
        user: Arc<dyn EventPublisher>,
        blast_routing_key: impl Into<String>,
    ) -> Self {
        Self {
            blast,
            user,
            blast_routing_key: blast_routing_key.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for DispatcherHandler {
    async fn handle(&self, body: &[u8]) -> anyhow::Result<()> {
        let event: NotificationEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                // Requeueing a payload that cannot decode would loop
                // forever; ack and drop it.
                error!(error = %e, "Malformed event payload, discarding");
                metrics::counter!("dispatcher.discarded_total").increment(1);
                return Ok(());
            }
        };

        match event.delivery_mode {
            DeliveryMode::Blast => {
                self.blast
                    .publish_event(
                        &self.blast_routing_key,
                        &event,
                        event_publish_options(&event, None),
                    )
                    .await
                    .map_err(|e| anyhow::anyhow!("republish to blast exchange: {e}"))?;

                debug!(event_id = %event.event_id, "Event routed to blast exchange");
            }
            DeliveryMode::User => {
                if event.user_id.is_empty() {
                    warn!(event_id = %event.event_id, "User event without user id, discarding");
                    metrics::counter!("dispatcher.discarded_total").increment(1);
                    return Ok(());
                }

                let routing_key = format!("user.{}", event.user_id);
                self.user
                    .publish_event(&routing_key, &event, event_publish_options(&event, None))
                    .await
                    .map_err(|e| anyhow::anyhow!("republish to user exchange: {e}"))?;

                debug!(
                    event_id = %event.event_id,
                    routing_key = %routing_key,
                    "Event routed to user exchange"
                );
            }
        }

        metrics::counter!("dispatcher.routed_total").increment(1);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::RecordingPublisher;
    use super::*;
    use hd_common::ChannelKind;

    fn handler(
        blast: Arc<RecordingPublisher>,
        user: Arc<RecordingPublisher>,
    ) -> DispatcherHandler {
        DispatcherHandler::new(blast, user, "notification.blast")
    }

    fn blast_event() -> NotificationEvent {
        NotificationEvent {
            event_id: "campaign-1-blast".to_string(),
            event_type: "order.shipped".to_string(),
            delivery_mode: DeliveryMode::Blast,
            channels: vec![ChannelKind::Email],
            user_id: String::new(),
            locale: "en".to_string(),
            data: Default::default(),
            meta: Default::default(),
        }
    }

    #[tokio::test]
    async fn blast_events_go_to_the_fanout() {
        let blast = RecordingPublisher::new();
        let user = RecordingPublisher::new();
        let handler = handler(blast.clone(), user.clone());

        let body = serde_json::to_vec(&blast_event()).unwrap();
        handler.handle(&body).await.unwrap();

        assert_eq!(blast.routing_keys(), vec!["notification.blast".to_string()]);
        assert_eq!(user.count(), 0);
        // re-publish carries zero delay
        assert!(blast.published.lock()[0].2.delay.is_none());
    }

    #[tokio::test]
    async fn user_events_route_by_user_id() {
        let blast = RecordingPublisher::new();
        let user = RecordingPublisher::new();
        let handler = handler(blast.clone(), user.clone());

        let mut event = blast_event();
        event.delivery_mode = DeliveryMode::User;
        event.user_id = "42".to_string();
        event.event_id = "campaign-1-user-42".to_string();

        handler
            .handle(&serde_json::to_vec(&event).unwrap())
            .await
            .unwrap();

        assert_eq!(user.routing_keys(), vec!["user.42".to_string()]);
        assert_eq!(blast.count(), 0);
    }

    #[tokio::test]
    async fn user_event_without_id_is_discarded() {
        let blast = RecordingPublisher::new();
        let user = RecordingPublisher::new();
        let handler = handler(blast.clone(), user.clone());

        let mut event = blast_event();
        event.delivery_mode = DeliveryMode::User;

        // discarded permanently: handler acks (Ok) and publishes nothing
        handler
            .handle(&serde_json::to_vec(&event).unwrap())
            .await
            .unwrap();
        assert_eq!(user.count(), 0);
        assert_eq!(blast.count(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_acked_not_requeued() {
        let blast = RecordingPublisher::new();
        let user = RecordingPublisher::new();
        let handler = handler(blast, user);

        assert!(handler.handle(b"{not json").await.is_ok());
    }

    #[tokio::test]
    async fn republish_failure_requeues() {
        let blast = RecordingPublisher::new();
        let user = RecordingPublisher::new();
        blast.fail(true);
        let handler = handler(blast, user);

        let body = serde_json::to_vec(&blast_event()).unwrap();
        assert!(handler.handle(&body).await.is_err());
    }
}
