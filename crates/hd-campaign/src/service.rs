//! Campaign service: validation, persistence, fan-out and terminal state.
//!
//! All sends go through the delayed dispatcher exchange; the broker's
//! delay plugin holds scheduled events until due. The HTTP response
//! returns when the campaign is queued, not when users are reached.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

use hd_broker::{event_publish_options, EventPublisher};
use hd_common::{
    Campaign, CampaignStatus, ChannelKind, DeliveryMode, DomainError, NotificationEvent,
    MAX_DELAY_SECONDS, META_CAMPAIGN_ID,
};
use hd_store::{CampaignRepository, NewCampaign};
use hd_template::TemplateRegistry;

/// Campaign submission, as accepted by `POST /api/notifications/send`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SendCampaignRequest {
    /// Registered event slug (e.g. `order.shipped`)
    pub event_slug: String,
    pub delivery_mode: DeliveryMode,
    /// Channels to deliver on; must be supported by the event template
    pub channels: Vec<ChannelKind>,
    /// Required and non-empty when `delivery_mode` is `user`
    #[serde(default)]
    pub user_target_ids: Vec<i64>,
    #[serde(default)]
    pub user_exclude_ids: Vec<i64>,
    /// BCP-47 tag, defaults to "en"
    #[serde(default)]
    pub locale: String,
    /// Template variables
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Operational metadata (trace ids etc.)
    #[serde(default)]
    pub meta: HashMap<String, String>,
    /// RFC3339 UTC; mutually exclusive with `delay_seconds`
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delay_seconds: Option<u32>,
}

/// Event id of the single blast leg of a campaign.
pub fn blast_event_id(campaign_id: i64) -> String {
    format!("campaign-{campaign_id}-blast")
}

/// Event id of one per-user leg of a campaign.
pub fn user_event_id(campaign_id: i64, user_id: i64) -> String {
    format!("campaign-{campaign_id}-user-{user_id}")
}

/// Resolve the schedule fields into a single broker delay.
///
/// `scheduled_at` and `delay_seconds` are mutually exclusive; a schedule in
/// the past is rejected; anything beyond the plugin's int32-millisecond
/// ceiling is rejected. Neither set means immediate routing.
pub fn resolve_delay(
    scheduled_at: Option<DateTime<Utc>>,
    delay_seconds: Option<u32>,
    now: DateTime<Utc>,
) -> Result<Duration, DomainError> {
    match (scheduled_at, delay_seconds) {
        (Some(_), Some(_)) => Err(DomainError::validation(
            "scheduled_at and delay_seconds are mutually exclusive",
        )
        .with_hint("set only one of the two fields")),
        (Some(at), None) => {
            let remaining = at - now;
            let secs = remaining.num_seconds();
            if secs <= 0 {
                return Err(DomainError::validation("scheduled_at must be in the future"));
            }
            if secs > MAX_DELAY_SECONDS as i64 {
                return Err(DomainError::validation(format!(
                    "scheduled_at is more than {MAX_DELAY_SECONDS} seconds away"
                )));
            }
            Ok(Duration::from_secs(secs as u64))
        }
        (None, Some(delay)) => {
            if delay > MAX_DELAY_SECONDS {
                return Err(DomainError::validation(format!(
                    "delay_seconds exceeds the maximum of {MAX_DELAY_SECONDS}"
                )));
            }
            Ok(Duration::from_secs(delay as u64))
        }
        (None, None) => Ok(Duration::ZERO),
    }
}

/// Target ids minus excluded ids, first-occurrence order preserved.
pub fn effective_users(target_ids: &[i64], exclude_ids: &[i64]) -> Vec<i64> {
    let mut seen = std::collections::HashSet::new();
    target_ids
        .iter()
        .filter(|id| !exclude_ids.contains(id))
        .filter(|id| seen.insert(**id))
        .copied()
        .collect()
}

pub struct CampaignService {
    registry: Arc<TemplateRegistry>,
    campaigns: Arc<dyn CampaignRepository>,
    publisher: Arc<dyn EventPublisher>,
    dispatch_routing_key: String,
}

impl CampaignService {
    pub fn new(
        registry: Arc<TemplateRegistry>,
        campaigns: Arc<dyn CampaignRepository>,
        publisher: Arc<dyn EventPublisher>,
        dispatch_routing_key: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            campaigns,
            publisher,
            dispatch_routing_key: dispatch_routing_key.into(),
        }
    }

    /// Validate, persist and fan out one campaign.
    ///
    /// Validation failures happen before any row is written. A publish
    /// failure marks the persisted campaign `failed` and surfaces a
    /// transport error. The returned campaign is in `published` state only
    /// when the terminal status update succeeded.
    pub async fn send(&self, request: SendCampaignRequest) -> Result<Campaign, DomainError> {
        let template = self.registry.must_get(&request.event_slug)?;

        if request.channels.is_empty() {
            return Err(DomainError::validation("channels must not be empty"));
        }
        let unsupported: Vec<ChannelKind> = request
            .channels
            .iter()
            .filter(|c| !template.supports(**c))
            .copied()
            .collect();
        if !unsupported.is_empty() {
            return Err(DomainError::channels_not_supported(&unsupported));
        }

        if request.delivery_mode == DeliveryMode::User && request.user_target_ids.is_empty() {
            return Err(DomainError::validation(
                "user_target_ids is required and must be non-empty for user delivery",
            ));
        }

        let delay = resolve_delay(request.scheduled_at, request.delay_seconds, Utc::now())?;

        let locale = if request.locale.is_empty() {
            "en".to_string()
        } else {
            request.locale.clone()
        };

        let campaign = self
            .campaigns
            .create(NewCampaign {
                delivery_mode: request.delivery_mode,
                event_slug: request.event_slug.clone(),
                channels: request.channels.clone(),
                user_target_ids: request.user_target_ids.clone(),
                user_exclude_ids: request.user_exclude_ids.clone(),
                locale,
                data: request.data.clone(),
                meta: request.meta.clone(),
                scheduled_at: request.scheduled_at,
                delay_seconds: request.delay_seconds,
            })
            .await
            .map_err(|e| DomainError::persistence(format!("create campaign: {e}")))?;

        let users = effective_users(&campaign.user_target_ids, &campaign.user_exclude_ids);

        if let Err(e) = self.publish_events(&campaign, &users, delay).await {
            let message = e.to_string();
            error!(campaign_id = campaign.id, error = %message, "Campaign publish failed");
            metrics::counter!("campaigns.failed_total").increment(1);
            if let Err(update_err) = self.campaigns.mark_failed(campaign.id, &message).await {
                error!(
                    campaign_id = campaign.id,
                    error = %update_err,
                    "Could not record campaign failure"
                );
            }
            return Err(DomainError::transport(message));
        }

        let published_at = Utc::now();
        self.campaigns
            .mark_published(campaign.id, published_at)
            .await
            .map_err(|e| {
                // Events are on the broker but the terminal state is not
                // recorded; surface the persistence failure without
                // mutating the in-memory campaign.
                error!(campaign_id = campaign.id, error = %e, "Terminal status update failed");
                DomainError::persistence(format!("campaign status update: {e}"))
            })?;

        metrics::counter!("campaigns.published_total").increment(1);
        info!(
            campaign_id = campaign.id,
            slug = %campaign.event_slug,
            mode = %campaign.delivery_mode,
            recipients = users.len(),
            delay_secs = delay.as_secs(),
            "Campaign published"
        );

        let mut campaign = campaign;
        campaign.status = CampaignStatus::Published;
        campaign.published_at = Some(published_at);
        Ok(campaign)
    }

    async fn publish_events(
        &self,
        campaign: &Campaign,
        users: &[i64],
        delay: Duration,
    ) -> hd_broker::Result<()> {
        let delay = (!delay.is_zero()).then_some(delay);

        match campaign.delivery_mode {
            DeliveryMode::Blast => {
                let event = self.build_event(campaign, blast_event_id(campaign.id), String::new());
                self.publisher
                    .publish_event(
                        &self.dispatch_routing_key,
                        &event,
                        event_publish_options(&event, delay),
                    )
                    .await?;
            }
            DeliveryMode::User => {
                // An empty effective list publishes nothing and is not an
                // error; the campaign still completes as published.
                for user_id in users {
                    let event = self.build_event(
                        campaign,
                        user_event_id(campaign.id, *user_id),
                        user_id.to_string(),
                    );
                    self.publisher
                        .publish_event(
                            &self.dispatch_routing_key,
                            &event,
                            event_publish_options(&event, delay),
                        )
                        .await?;
                }
            }
        }

        Ok(())
    }

    fn build_event(&self, campaign: &Campaign, event_id: String, user_id: String) -> NotificationEvent {
        let mut meta = campaign.meta.clone();
        meta.insert(META_CAMPAIGN_ID.to_string(), campaign.id.to_string());

        NotificationEvent {
            event_id,
            event_type: campaign.event_slug.clone(),
            delivery_mode: campaign.delivery_mode,
            channels: campaign.channels.clone(),
            user_id,
            locale: campaign.locale.clone(),
            data: campaign.data.clone(),
            meta,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use hd_common::ErrorKind;

    #[tokio::test]
    async fn blast_happy_path() {
        let f = fixture();
        let campaign = f.service.send(blast_request()).await.unwrap();

        assert_eq!(campaign.status, CampaignStatus::Published);
        assert!(campaign.published_at.is_some());
        assert_eq!(campaign.locale, "en"); // normalized from ""

        let published = f.publisher.published.lock();
        assert_eq!(published.len(), 1);
        let (key, event, options) = &published[0];
        assert_eq!(key, "notification.dispatch");
        assert_eq!(event.event_id, format!("campaign-{}-blast", campaign.id));
        assert_eq!(event.campaign_id(), campaign.id);
        assert!(options.delay.is_none());

        let stored = f.campaigns.find_by_id(campaign.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CampaignStatus::Published);
    }

    #[tokio::test]
    async fn user_fanout_with_exclusion() {
        let f = fixture();
        let mut request = blast_request();
        request.delivery_mode = DeliveryMode::User;
        request.user_target_ids = vec![1, 2, 3];
        request.user_exclude_ids = vec![2];

        let campaign = f.service.send(request).await.unwrap();

        let events = f.publisher.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].user_id, "1");
        assert_eq!(events[1].user_id, "3");
        assert_eq!(
            events[0].event_id,
            format!("campaign-{}-user-1", campaign.id)
        );
    }

    #[tokio::test]
    async fn empty_effective_users_still_publishes_campaign() {
        let f = fixture();
        let mut request = blast_request();
        request.delivery_mode = DeliveryMode::User;
        request.user_target_ids = vec![5];
        request.user_exclude_ids = vec![5];

        let campaign = f.service.send(request).await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Published);
        assert_eq!(f.publisher.count(), 0);
    }

    #[tokio::test]
    async fn user_mode_requires_targets() {
        let f = fixture();
        let mut request = blast_request();
        request.delivery_mode = DeliveryMode::User;

        let err = f.service.send(request).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(f.campaigns.all().is_empty());
    }

    #[tokio::test]
    async fn unknown_slug_creates_no_campaign() {
        let f = fixture();
        let mut request = blast_request();
        request.event_slug = "promo.flash".to_string();

        let err = f.service.send(request).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotRegistered);
        assert!(f.campaigns.all().is_empty());
        assert_eq!(f.publisher.count(), 0);
    }

    #[tokio::test]
    async fn unsupported_channels_are_rejected_with_csv() {
        let f = fixture();
        let mut request = blast_request();
        request.channels = vec![ChannelKind::Email, ChannelKind::Sms, ChannelKind::Webhook];

        let err = f.service.send(request).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ChannelsNotSupported);
        assert_eq!(err.to_string(), "channels_not_supported: sms,webhook");
        assert!(f.campaigns.all().is_empty());
    }

    #[tokio::test]
    async fn schedule_fields_are_mutually_exclusive() {
        let f = fixture();
        let mut request = blast_request();
        request.scheduled_at = Some(Utc::now() + chrono::Duration::hours(1));
        request.delay_seconds = Some(60);

        let err = f.service.send(request).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(err.to_string().contains("mutually exclusive"));
        assert!(f.campaigns.all().is_empty());
    }

    #[tokio::test]
    async fn delay_is_carried_on_the_publish() {
        let f = fixture();
        let mut request = blast_request();
        request.delay_seconds = Some(90);

        f.service.send(request).await.unwrap();
        let published = f.publisher.published.lock();
        assert_eq!(published[0].2.delay, Some(Duration::from_secs(90)));
    }

    #[tokio::test]
    async fn publish_failure_marks_campaign_failed() {
        let f = fixture();
        f.publisher.fail(true);

        let err = f.service.send(blast_request()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transport);

        // the persisted row is failed with the error text
        let campaigns = f.campaigns.all();
        assert_eq!(campaigns.len(), 1);
        assert_eq!(campaigns[0].status, CampaignStatus::Failed);
        assert!(campaigns[0].error_message.as_deref().unwrap().contains("broker down"));
    }

    #[tokio::test]
    async fn terminal_update_failure_does_not_mutate_campaign() {
        let f = fixture();
        f.campaigns.fail_mark_published(true);

        let err = f.service.send(blast_request()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Persistence);

        // the stored row never reached published state
        let campaigns = f.campaigns.all();
        assert_eq!(campaigns[0].status, CampaignStatus::Pending);
        assert!(campaigns[0].published_at.is_none());
    }

    #[test]
    fn resolve_delay_boundaries() {
        let now = Utc::now();

        assert_eq!(resolve_delay(None, None, now).unwrap(), Duration::ZERO);
        assert_eq!(
            resolve_delay(None, Some(0), now).unwrap(),
            Duration::ZERO
        );
        assert_eq!(
            resolve_delay(None, Some(MAX_DELAY_SECONDS), now).unwrap(),
            Duration::from_secs(MAX_DELAY_SECONDS as u64)
        );
        assert!(resolve_delay(None, Some(MAX_DELAY_SECONDS + 1), now).is_err());

        let past = now - chrono::Duration::seconds(1);
        let err = resolve_delay(Some(past), None, now).unwrap_err();
        assert!(err.to_string().contains("future"));

        let future = now + chrono::Duration::seconds(120);
        assert_eq!(
            resolve_delay(Some(future), None, now).unwrap(),
            Duration::from_secs(120)
        );

        let too_far = now + chrono::Duration::seconds(MAX_DELAY_SECONDS as i64 + 10);
        assert!(resolve_delay(Some(too_far), None, now).is_err());
    }

    #[test]
    fn effective_users_preserves_order_and_dedups() {
        assert_eq!(effective_users(&[1, 2, 3], &[2]), vec![1, 3]);
        assert_eq!(effective_users(&[3, 1, 3, 2, 1], &[]), vec![3, 1, 2]);
        assert_eq!(effective_users(&[], &[1]), Vec::<i64>::new());
        assert_eq!(effective_users(&[1, 2], &[1, 2]), Vec::<i64>::new());
    }
}
