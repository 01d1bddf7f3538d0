//! Herald persistence layer.
//!
//! Repository traits consumed by the campaign service and the dispatch
//! engine, with a PostgreSQL implementation and in-memory doubles for
//! tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

use hd_common::{Campaign, ChannelKind, DeliveryLog, DeliveryMode, TemplateOverride};

pub mod mock;
pub mod postgres;

pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Fields of a campaign before persistence assigns id, status and
/// timestamps.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub delivery_mode: DeliveryMode,
    pub event_slug: String,
    pub channels: Vec<ChannelKind>,
    pub user_target_ids: Vec<i64>,
    pub user_exclude_ids: Vec<i64>,
    pub locale: String,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub meta: HashMap<String, String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub delay_seconds: Option<u32>,
}

/// Campaign lifecycle persistence. Rows are created `pending` and
/// transition exactly once to `published` or `failed`.
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn create(&self, campaign: NewCampaign) -> Result<Campaign>;

    async fn find_by_id(&self, id: i64) -> Result<Option<Campaign>>;

    async fn mark_published(&self, id: i64, published_at: DateTime<Utc>) -> Result<()>;

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()>;
}

/// Append-only per-attempt delivery log. Only `status`, `error` and
/// `sent_at` change after insert.
#[async_trait]
pub trait DeliveryLogRepository: Send + Sync {
    /// Insert a `pending` row and return its id.
    async fn create_pending(
        &self,
        campaign_id: i64,
        user_id: i64,
        channel: ChannelKind,
    ) -> Result<i64>;

    async fn mark_sent(&self, id: i64, sent_at: DateTime<Utc>) -> Result<()>;

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()>;

    async fn mark_skipped(&self, id: i64, error: &str) -> Result<()>;

    async fn find_by_campaign(&self, campaign_id: i64) -> Result<Vec<DeliveryLog>>;
}

/// Optional DB overrides for code-default templates.
#[async_trait]
pub trait TemplateOverrideRepository: Send + Sync {
    /// Look up the active override for `(slug, channel, locale)`, falling
    /// back to locale `"en"` on a miss. A miss on both is `Ok(None)`,
    /// not an error. Inactive and soft-deleted rows are never returned.
    async fn find_override(
        &self,
        event_slug: &str,
        channel: ChannelKind,
        locale: &str,
    ) -> Result<Option<TemplateOverride>>;
}
