//! In-app inbox adapter backed by Redis.
//!
//! Delivered notifications land in a capped per-user list
//! (`inbox:<user_id>`) the application reads back over its own API.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use serde_json::json;
use tracing::{debug, warn};

use hd_common::{ChannelKind, NotificationEvent};

use crate::{rendered_body, rendered_title, ChannelAdapter, ChannelError};

#[derive(Debug, Clone)]
pub struct InAppAdapterConfig {
    /// Max entries retained per user feed
    pub feed_cap: usize,
    /// Feed TTL in seconds
    pub retention_secs: u64,
}

impl Default for InAppAdapterConfig {
    fn default() -> Self {
        Self {
            feed_cap: 200,
            retention_secs: 30 * 86_400,
        }
    }
}

pub struct InAppAdapter {
    config: InAppAdapterConfig,
    conn: ConnectionManager,
}

impl InAppAdapter {
    pub fn new(conn: ConnectionManager, config: InAppAdapterConfig) -> Self {
        Self { config, conn }
    }

    pub async fn connect(redis_url: &str, config: InAppAdapterConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, config))
    }

    fn feed_key(user_id: &str) -> String {
        format!("inbox:{user_id}")
    }
}

#[async_trait]
impl ChannelAdapter for InAppAdapter {
    fn name(&self) -> ChannelKind {
        ChannelKind::InApp
    }

    async fn send(&self, event: &NotificationEvent) -> Result<(), ChannelError> {
        if event.user_id.is_empty() {
            warn!(event_id = %event.event_id, "In-app delivery needs a user id, skipping");
            return Ok(());
        }

        let entry = json!({
            "event_id": event.event_id,
            "event_type": event.event_type,
            "title": rendered_title(event),
            "body": rendered_body(event),
            "created_at": Utc::now().to_rfc3339(),
        })
        .to_string();

        let key = Self::feed_key(&event.user_id);
        let mut conn = self.conn.clone();

        redis::pipe()
            .lpush(&key, entry)
            .ignore()
            .ltrim(&key, 0, self.config.feed_cap.saturating_sub(1) as isize)
            .ignore()
            .expire(&key, self.config.retention_secs as i64)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| ChannelError::transient(format!("redis inbox: {e}")))?;

        debug!(event_id = %event.event_id, user_id = %event.user_id, "In-app notification stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_key_is_per_user() {
        assert_eq!(InAppAdapter::feed_key("7"), "inbox:7");
    }

    #[test]
    fn default_config_caps_the_feed() {
        let config = InAppAdapterConfig::default();
        assert_eq!(config.feed_cap, 200);
        assert_eq!(config.retention_secs, 30 * 86_400);
    }
}
