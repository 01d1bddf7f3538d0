//! User consumer: per-recipient events from the direct exchange.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

use hd_broker::MessageHandler;
use hd_common::{DeliveryMode, NotificationEvent};

use crate::engine::DispatchEngine;
use crate::idempotency::IdempotencyStore;

pub struct UserHandler {
    engine: Arc<DispatchEngine>,
    /// Optional duplicate suppression; absent keeps plain at-least-once.
    idempotency: Option<Arc<dyn IdempotencyStore>>,
}

impl UserHandler {
    pub fn new(engine: Arc<DispatchEngine>) -> Self {
        Self {
            engine,
            idempotency: None,
        }
    }

    pub fn with_idempotency(mut self, store: Arc<dyn IdempotencyStore>) -> Self {
        self.idempotency = Some(store);
        self
    }
}

#[async_trait]
impl MessageHandler for UserHandler {
    async fn handle(&self, body: &[u8]) -> anyhow::Result<()> {
        let event: NotificationEvent = match serde_json::from_slice(body) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "Malformed event payload, discarding");
                metrics::counter!("user.discarded_total").increment(1);
                return Ok(());
            }
        };

        if event.delivery_mode != DeliveryMode::User {
            warn!(
                event_id = %event.event_id,
                mode = %event.delivery_mode,
                "Non-user event on user queue, discarding"
            );
            metrics::counter!("user.discarded_total").increment(1);
            return Ok(());
        }

        if event.user_id.is_empty() {
            warn!(event_id = %event.event_id, "User event without user id, discarding");
            metrics::counter!("user.discarded_total").increment(1);
            return Ok(());
        }

        if let Some(store) = &self.idempotency {
            if !store.first_seen(&event.event_id).await {
                debug!(event_id = %event.event_id, "Duplicate event, acking without dispatch");
                metrics::counter!("user.duplicates_total").increment(1);
                return Ok(());
            }
        }

        self.engine.dispatch(&event).await
    }
}
