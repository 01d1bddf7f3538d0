//! Optional idempotency guard keyed by event id.
//!
//! `SET NX EX` in Redis: the first consumer to claim an event id wins, a
//! duplicate within the TTL is acked without dispatch. With no store
//! configured the system stays at-least-once with possible duplicates.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, warn};

/// Duplicate-suppression seam. Implementations must be safe to call
/// concurrently from all consumer workers.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// `true` when this is the first sighting of the event id within the
    /// TTL; `false` for a duplicate.
    async fn first_seen(&self, event_id: &str) -> bool;
}

pub struct RedisIdempotencyStore {
    conn: ConnectionManager,
    ttl_secs: u64,
    key_prefix: String,
}

impl RedisIdempotencyStore {
    pub fn new(conn: ConnectionManager, ttl_secs: u64) -> Self {
        Self {
            conn,
            ttl_secs,
            key_prefix: "herald:event".to_string(),
        }
    }

    pub async fn connect(redis_url: &str, ttl_secs: u64) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, ttl_secs))
    }

    fn key(&self, event_id: &str) -> String {
        format!("{}:{}", self.key_prefix, event_id)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn first_seen(&self, event_id: &str) -> bool {
        let mut conn = self.conn.clone();

        // SET key 1 NX EX ttl - Some = claimed, None = already set
        let result: Result<Option<String>, _> = redis::cmd("SET")
            .arg(self.key(event_id))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(Some(_)) => true,
            Ok(None) => {
                debug!(event_id = %event_id, "Duplicate event suppressed");
                false
            }
            Err(e) => {
                // Fail open: a guard outage must not stop deliveries;
                // at-least-once wins over dedup.
                warn!(event_id = %event_id, error = %e, "Idempotency store unavailable, dispatching anyway");
                true
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// In-memory store for consumer tests.
    #[derive(Default)]
    pub struct InMemoryIdempotencyStore {
        seen: Mutex<HashSet<String>>,
    }

    impl InMemoryIdempotencyStore {
        pub fn new() -> std::sync::Arc<Self> {
            std::sync::Arc::new(Self::default())
        }
    }

    #[async_trait]
    impl IdempotencyStore for InMemoryIdempotencyStore {
        async fn first_seen(&self, event_id: &str) -> bool {
            self.seen.lock().insert(event_id.to_string())
        }
    }
}
