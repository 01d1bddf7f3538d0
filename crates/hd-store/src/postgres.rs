//! PostgreSQL repositories.
//!
//! JSON-shaped columns (`channels`, `user_target_ids`, `data`, `meta`) are
//! stored as JSON text and round-tripped through `serde_json`. Timestamps
//! are `TIMESTAMPTZ` bound through `chrono`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::{debug, info};

use hd_common::{
    Campaign, CampaignStatus, ChannelKind, DeliveryLog, DeliveryMode, DeliveryStatus,
    TemplateOverride,
};

use crate::{
    CampaignRepository, DeliveryLogRepository, NewCampaign, Result, StoreError,
    TemplateOverrideRepository,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS notification_campaigns (
    id               BIGSERIAL PRIMARY KEY,
    delivery_mode    TEXT NOT NULL,
    event_slug       TEXT NOT NULL,
    channels         TEXT NOT NULL DEFAULT '[]',
    user_target_ids  TEXT NOT NULL DEFAULT '[]',
    user_exclude_ids TEXT NOT NULL DEFAULT '[]',
    locale           TEXT NOT NULL DEFAULT 'en',
    data             TEXT NOT NULL DEFAULT '{}',
    meta             TEXT NOT NULL DEFAULT '{}',
    scheduled_at     TIMESTAMPTZ,
    delay_seconds    BIGINT,
    status           TEXT NOT NULL DEFAULT 'pending',
    error_message    TEXT,
    published_at     TIMESTAMPTZ,
    created_at       TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at       TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS notification_logs (
    id          BIGSERIAL PRIMARY KEY,
    campaign_id BIGINT NOT NULL,
    user_id     BIGINT NOT NULL DEFAULT 0,
    channel     TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pending',
    error       TEXT,
    sent_at     TIMESTAMPTZ,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_notification_logs_campaign
    ON notification_logs (campaign_id);

CREATE TABLE IF NOT EXISTS notification_template_overrides (
    id             BIGSERIAL PRIMARY KEY,
    event_slug     TEXT NOT NULL,
    channel        TEXT NOT NULL,
    locale         TEXT NOT NULL DEFAULT 'en',
    title_template TEXT NOT NULL DEFAULT '',
    body_template  TEXT NOT NULL DEFAULT '',
    is_active      BOOLEAN NOT NULL DEFAULT TRUE,
    deleted_at     TIMESTAMPTZ,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at     TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_template_override_active
    ON notification_template_overrides (event_slug, channel, locale)
    WHERE is_active AND deleted_at IS NULL;
"#;

/// PostgreSQL-backed implementation of all Herald repositories.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the notification tables if they don't exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Notification schema ensured");
        Ok(())
    }

    fn parse_campaign_row(row: &sqlx::postgres::PgRow) -> Result<Campaign> {
        let mode_str: String = row.get("delivery_mode");
        let delivery_mode = DeliveryMode::from_str(&mode_str)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown delivery mode [{mode_str}]")))?;

        let status_str: String = row.get("status");
        let status = CampaignStatus::from_str(&status_str)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown campaign status [{status_str}]")))?;

        let channels = parse_channels(row.get("channels"))?;

        let user_target_ids: Vec<i64> = serde_json::from_str(row.get("user_target_ids"))?;
        let user_exclude_ids: Vec<i64> = serde_json::from_str(row.get("user_exclude_ids"))?;
        let data: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(row.get("data"))?;
        let meta: HashMap<String, String> = serde_json::from_str(row.get("meta"))?;

        let delay_seconds: Option<i64> = row.get("delay_seconds");

        Ok(Campaign {
            id: row.get("id"),
            delivery_mode,
            event_slug: row.get("event_slug"),
            channels,
            user_target_ids,
            user_exclude_ids,
            locale: row.get("locale"),
            data,
            meta,
            scheduled_at: row.get("scheduled_at"),
            delay_seconds: delay_seconds.map(|d| d as u32),
            status,
            error_message: row.get("error_message"),
            published_at: row.get("published_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn parse_log_row(row: &sqlx::postgres::PgRow) -> Result<DeliveryLog> {
        let channel_str: String = row.get("channel");
        let channel = ChannelKind::from_str(&channel_str)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown channel [{channel_str}]")))?;

        let status_str: String = row.get("status");
        let status = DeliveryStatus::from_str(&status_str)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown delivery status [{status_str}]")))?;

        Ok(DeliveryLog {
            id: row.get("id"),
            campaign_id: row.get("campaign_id"),
            user_id: row.get("user_id"),
            channel,
            status,
            error: row.get("error"),
            sent_at: row.get("sent_at"),
            created_at: row.get("created_at"),
        })
    }
}

fn channels_to_json(channels: &[ChannelKind]) -> String {
    let names: Vec<&str> = channels.iter().map(|c| c.as_str()).collect();
    serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string())
}

fn parse_channels(raw: &str) -> Result<Vec<ChannelKind>> {
    let names: Vec<String> = serde_json::from_str(raw)?;
    names
        .iter()
        .map(|name| {
            ChannelKind::from_str(name)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown channel [{name}]")))
        })
        .collect()
}

#[async_trait]
impl CampaignRepository for PgStore {
    async fn create(&self, campaign: NewCampaign) -> Result<Campaign> {
        let row = sqlx::query(
            "INSERT INTO notification_campaigns \
             (delivery_mode, event_slug, channels, user_target_ids, user_exclude_ids, \
              locale, data, meta, scheduled_at, delay_seconds, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING id, delivery_mode, event_slug, channels, user_target_ids, \
                       user_exclude_ids, locale, data, meta, scheduled_at, delay_seconds, \
                       status, error_message, published_at, created_at, updated_at",
        )
        .bind(campaign.delivery_mode.as_str())
        .bind(&campaign.event_slug)
        .bind(channels_to_json(&campaign.channels))
        .bind(serde_json::to_string(&campaign.user_target_ids)?)
        .bind(serde_json::to_string(&campaign.user_exclude_ids)?)
        .bind(&campaign.locale)
        .bind(serde_json::to_string(&campaign.data)?)
        .bind(serde_json::to_string(&campaign.meta)?)
        .bind(campaign.scheduled_at)
        .bind(campaign.delay_seconds.map(|d| d as i64))
        .bind(CampaignStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        let campaign = Self::parse_campaign_row(&row)?;
        debug!(campaign_id = campaign.id, slug = %campaign.event_slug, "Campaign created");
        Ok(campaign)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Campaign>> {
        let row = sqlx::query(
            "SELECT id, delivery_mode, event_slug, channels, user_target_ids, \
                    user_exclude_ids, locale, data, meta, scheduled_at, delay_seconds, \
                    status, error_message, published_at, created_at, updated_at \
             FROM notification_campaigns WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::parse_campaign_row(&r)).transpose()
    }

    async fn mark_published(&self, id: i64, published_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE notification_campaigns \
             SET status = $1, published_at = $2, updated_at = now() WHERE id = $3",
        )
        .bind(CampaignStatus::Published.as_str())
        .bind(published_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE notification_campaigns \
             SET status = $1, error_message = $2, updated_at = now() WHERE id = $3",
        )
        .bind(CampaignStatus::Failed.as_str())
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DeliveryLogRepository for PgStore {
    async fn create_pending(
        &self,
        campaign_id: i64,
        user_id: i64,
        channel: ChannelKind,
    ) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO notification_logs (campaign_id, user_id, channel, status) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(campaign_id)
        .bind(user_id)
        .bind(channel.as_str())
        .bind(DeliveryStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("id"))
    }

    async fn mark_sent(&self, id: i64, sent_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE notification_logs SET status = $1, sent_at = $2 WHERE id = $3")
            .bind(DeliveryStatus::Sent.as_str())
            .bind(sent_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query("UPDATE notification_logs SET status = $1, error = $2 WHERE id = $3")
            .bind(DeliveryStatus::Failed.as_str())
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_skipped(&self, id: i64, error: &str) -> Result<()> {
        sqlx::query("UPDATE notification_logs SET status = $1, error = $2 WHERE id = $3")
            .bind(DeliveryStatus::Skipped.as_str())
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_campaign(&self, campaign_id: i64) -> Result<Vec<DeliveryLog>> {
        let rows = sqlx::query(
            "SELECT id, campaign_id, user_id, channel, status, error, sent_at, created_at \
             FROM notification_logs WHERE campaign_id = $1 ORDER BY id ASC",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::parse_log_row).collect()
    }
}

#[async_trait]
impl TemplateOverrideRepository for PgStore {
    async fn find_override(
        &self,
        event_slug: &str,
        channel: ChannelKind,
        locale: &str,
    ) -> Result<Option<TemplateOverride>> {
        let fetch = |locale: String| {
            let pool = self.pool.clone();
            let slug = event_slug.to_string();
            async move {
                let row = sqlx::query(
                    "SELECT event_slug, channel, locale, title_template, body_template, is_active \
                     FROM notification_template_overrides \
                     WHERE event_slug = $1 AND channel = $2 AND locale = $3 \
                       AND is_active = TRUE AND deleted_at IS NULL \
                     ORDER BY updated_at DESC LIMIT 1",
                )
                .bind(slug)
                .bind(channel.as_str())
                .bind(locale)
                .fetch_optional(&pool)
                .await?;

                Ok::<_, StoreError>(row.map(|r| TemplateOverride {
                    event_slug: r.get("event_slug"),
                    channel,
                    locale: r.get("locale"),
                    title_template: r.get("title_template"),
                    body_template: r.get("body_template"),
                    is_active: r.get("is_active"),
                }))
            }
        };

        if let Some(found) = fetch(locale.to_string()).await? {
            return Ok(Some(found));
        }
        if locale != "en" {
            return fetch("en".to_string()).await;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_round_trip_as_json() {
        let channels = vec![ChannelKind::Email, ChannelKind::InApp];
        let raw = channels_to_json(&channels);
        assert_eq!(raw, r#"["email","in_app"]"#);
        assert_eq!(parse_channels(&raw).unwrap(), channels);
    }

    #[test]
    fn unknown_channel_is_a_corrupt_row() {
        let result = parse_channels(r#"["email","fax"]"#);
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }
}
