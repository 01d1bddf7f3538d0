use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

pub mod error;
pub mod logging;

pub use error::{DomainError, ErrorKind};

/// Maximum schedulable delay in seconds.
///
/// The delayed-message exchange carries the delay as a signed 32-bit
/// millisecond header, so anything above this cannot be represented.
pub const MAX_DELAY_SECONDS: u32 = 2_147_483;

/// Reserved data keys the dispatch engine injects after rendering.
pub const RENDERED_TITLE_KEY: &str = "__title__";
pub const RENDERED_BODY_KEY: &str = "__body__";

/// Meta key carrying the campaign id for delivery-log correlation.
pub const META_CAMPAIGN_ID: &str = "campaign_id";

/// Message headers set on every published notification event.
pub mod headers {
    pub const EVENT_TYPE: &str = "x-event-type";
    pub const EVENT_ID: &str = "x-event-id";
    pub const DELIVERY_MODE: &str = "x-delivery-mode";
    pub const CAMPAIGN_ID: &str = "x-campaign-id";
    pub const USER_ID: &str = "x-user-id";
}

// ============================================================================
// Delivery Modes & Channels
// ============================================================================

/// How a campaign reaches its audience.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// One event fanned out to every bound channel queue.
    Blast,
    /// One event per target user, routed by `user.<id>`.
    User,
}

impl DeliveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMode::Blast => "blast",
            DeliveryMode::User => "user",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "blast" => Some(DeliveryMode::Blast),
            "user" => Some(DeliveryMode::User),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An output transport with its own adapter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Email,
    Push,
    Sms,
    InApp,
    Webhook,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::Push => "push",
            ChannelKind::Sms => "sms",
            ChannelKind::InApp => "in_app",
            ChannelKind::Webhook => "webhook",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "email" => Some(ChannelKind::Email),
            "push" => Some(ChannelKind::Push),
            "sms" => Some(ChannelKind::Sms),
            "in_app" => Some(ChannelKind::InApp),
            "webhook" => Some(ChannelKind::Webhook),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Notification Event (broker envelope)
// ============================================================================

/// The in-flight message produced by the campaign service and consumed by
/// the channel workers. Not persisted; lives on the broker between produce
/// and ack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Unique per fan-out leg; the idempotency key.
    pub event_id: String,
    /// The registered event slug (e.g. `order.shipped`).
    pub event_type: String,
    pub delivery_mode: DeliveryMode,
    pub channels: Vec<ChannelKind>,
    /// Recipient id; empty unless `delivery_mode` is `user`.
    #[serde(default)]
    pub user_id: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Template variables. Copied per channel before rendering.
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Operational metadata (`campaign_id`, trace ids, ...).
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

fn default_locale() -> String {
    "en".to_string()
}

impl NotificationEvent {
    /// Whether this event asked for the given channel.
    pub fn targets_channel(&self, kind: ChannelKind) -> bool {
        self.channels.contains(&kind)
    }

    /// Campaign id from `meta`, or 0 when the event has no campaign
    /// correlation (log rows are skipped in that case).
    pub fn campaign_id(&self) -> i64 {
        self.meta
            .get(META_CAMPAIGN_ID)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Numeric recipient id, 0 for blast events.
    pub fn user_id_num(&self) -> i64 {
        self.user_id.parse().unwrap_or(0)
    }
}

// ============================================================================
// Campaign (persisted lifecycle record)
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Pending,
    Processing,
    Published,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Pending => "pending",
            CampaignStatus::Processing => "processing",
            CampaignStatus::Published => "published",
            CampaignStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CampaignStatus::Pending),
            "processing" => Some(CampaignStatus::Processing),
            "published" => Some(CampaignStatus::Published),
            "failed" => Some(CampaignStatus::Failed),
            _ => None,
        }
    }
}

/// One API-submitted send request and its persisted lifecycle.
///
/// Created `pending`, transitions exactly once to `published` or `failed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
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
    pub status: CampaignStatus,
    pub error_message: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Delivery Log (persisted, append-only)
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "sent" => Some(DeliveryStatus::Sent),
            "failed" => Some(DeliveryStatus::Failed),
            "skipped" => Some(DeliveryStatus::Skipped),
            _ => None,
        }
    }
}

/// One row per (campaign, user, channel) delivery attempt.
///
/// Only `status`, `error` and `sent_at` ever change after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryLog {
    pub id: i64,
    pub campaign_id: i64,
    /// 0 for blast deliveries.
    pub user_id: i64,
    pub channel: ChannelKind,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Template Override (persisted)
// ============================================================================

/// DB-sourced replacement for the code-default title/body of one
/// (event, channel, locale) combination. An empty template string falls
/// back to the code default for that field only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateOverride {
    pub event_slug: String,
    pub channel: ChannelKind,
    pub locale: String,
    pub title_template: String,
    pub body_template: String,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_kind_round_trips_through_str() {
        for kind in [
            ChannelKind::Email,
            ChannelKind::Push,
            ChannelKind::Sms,
            ChannelKind::InApp,
            ChannelKind::Webhook,
        ] {
            assert_eq!(ChannelKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ChannelKind::from_str("carrier_pigeon"), None);
    }

    #[test]
    fn event_defaults_locale_and_optional_fields() {
        let event: NotificationEvent = serde_json::from_str(
            r#"{
                "event_id": "campaign-7-blast",
                "event_type": "order.shipped",
                "delivery_mode": "blast",
                "channels": ["email", "in_app"]
            }"#,
        )
        .unwrap();

        assert_eq!(event.locale, "en");
        assert!(event.user_id.is_empty());
        assert!(event.data.is_empty());
        assert_eq!(event.campaign_id(), 0);
        assert!(event.targets_channel(ChannelKind::InApp));
        assert!(!event.targets_channel(ChannelKind::Push));
    }

    #[test]
    fn campaign_id_comes_from_meta() {
        let mut event: NotificationEvent = serde_json::from_str(
            r#"{
                "event_id": "campaign-42-user-3",
                "event_type": "order.shipped",
                "delivery_mode": "user",
                "channels": ["push"],
                "user_id": "3"
            }"#,
        )
        .unwrap();
        event
            .meta
            .insert(META_CAMPAIGN_ID.to_string(), "42".to_string());

        assert_eq!(event.campaign_id(), 42);
        assert_eq!(event.user_id_num(), 3);
    }
}
