//! Blast consumer: broadcast events from the fanout exchange.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, warn};

use hd_broker::MessageHandler;
use hd_common::{DeliveryMode, NotificationEvent};

use crate::engine::DispatchEngine;

pub struct BlastHandler {
    engine: Arc<DispatchEngine>,
}

impl BlastHandler {
    pub fn new(engine: Arc<DispatchEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl MessageHandler for BlastHandler {
    async fn handle(&self, body: &[u8]) -> anyhow::Result<()> {
        let event: NotificationEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "Malformed event payload, discarding");
                metrics::counter!("blast.discarded_total").increment(1);
                return Ok(());
            }
        };

        if event.delivery_mode != DeliveryMode::Blast {
            warn!(
                event_id = %event.event_id,
                mode = %event.delivery_mode,
                "Non-blast event on blast queue, discarding"
            );
            metrics::counter!("blast.discarded_total").increment(1);
            return Ok(());
        }

        self.engine.dispatch(&event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testutil::{event, ScriptedAdapter};
    use hd_common::ChannelKind;

    fn handler_with(adapter: Arc<ScriptedAdapter>) -> BlastHandler {
        BlastHandler::new(Arc::new(DispatchEngine::new(vec![adapter])))
    }

    #[tokio::test]
    async fn dispatches_blast_events() {
        let adapter = ScriptedAdapter::always_ok(ChannelKind::Email);
        let handler = handler_with(adapter.clone());

        let body = serde_json::to_vec(&event(vec![ChannelKind::Email], 1)).unwrap();
        handler.handle(&body).await.unwrap();
        assert_eq!(adapter.call_count(), 1);
    }

    #[tokio::test]
    async fn wrong_delivery_mode_is_discarded() {
        let adapter = ScriptedAdapter::always_ok(ChannelKind::Email);
        let handler = handler_with(adapter.clone());

        let mut user_event = event(vec![ChannelKind::Email], 1);
        user_event.delivery_mode = DeliveryMode::User;
        user_event.user_id = "4".to_string();

        handler
            .handle(&serde_json::to_vec(&user_event).unwrap())
            .await
            .unwrap();
        assert_eq!(adapter.call_count(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_acked() {
        let adapter = ScriptedAdapter::always_ok(ChannelKind::Email);
        let handler = handler_with(adapter.clone());

        assert!(handler.handle(b"\xff\xfe").await.is_ok());
        assert_eq!(adapter.call_count(), 0);
    }

    #[tokio::test]
    async fn transient_engine_failure_propagates_for_requeue() {
        let adapter =
            ScriptedAdapter::new(ChannelKind::Email, vec![Err("smtp down".to_string())]);
        let handler = handler_with(adapter);

        let body = serde_json::to_vec(&event(vec![ChannelKind::Email], 1)).unwrap();
        assert!(handler.handle(&body).await.is_err());
    }
}
