//! In-memory repository doubles for tests.
//!
//! Same contracts as the PostgreSQL repositories, with failure toggles so
//! terminal-state semantics can be exercised without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use hd_common::{
    Campaign, CampaignStatus, ChannelKind, DeliveryLog, DeliveryStatus, TemplateOverride,
};

use crate::{
    CampaignRepository, DeliveryLogRepository, NewCampaign, Result, StoreError,
    TemplateOverrideRepository,
};

#[derive(Default)]
pub struct InMemoryCampaignRepository {
    campaigns: Mutex<Vec<Campaign>>,
    next_id: AtomicI64,
    fail_create: AtomicBool,
    fail_mark_published: AtomicBool,
}

impl InMemoryCampaignRepository {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub fn fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn fail_mark_published(&self, fail: bool) {
        self.fail_mark_published.store(fail, Ordering::SeqCst);
    }

    pub fn all(&self) -> Vec<Campaign> {
        self.campaigns.lock().clone()
    }
}

#[async_trait]
impl CampaignRepository for InMemoryCampaignRepository {
    async fn create(&self, campaign: NewCampaign) -> Result<Campaign> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(StoreError::Database("create failed (test)".to_string()));
        }

        let now = Utc::now();
        let campaign = Campaign {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            delivery_mode: campaign.delivery_mode,
            event_slug: campaign.event_slug,
            channels: campaign.channels,
            user_target_ids: campaign.user_target_ids,
            user_exclude_ids: campaign.user_exclude_ids,
            locale: campaign.locale,
            data: campaign.data,
            meta: campaign.meta,
            scheduled_at: campaign.scheduled_at,
            delay_seconds: campaign.delay_seconds,
            status: CampaignStatus::Pending,
            error_message: None,
            published_at: None,
            created_at: now,
            updated_at: now,
        };
        self.campaigns.lock().push(campaign.clone());
        Ok(campaign)
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Campaign>> {
        Ok(self.campaigns.lock().iter().find(|c| c.id == id).cloned())
    }

    async fn mark_published(&self, id: i64, published_at: DateTime<Utc>) -> Result<()> {
        if self.fail_mark_published.load(Ordering::SeqCst) {
            return Err(StoreError::Database(
                "mark_published failed (test)".to_string(),
            ));
        }

        let mut campaigns = self.campaigns.lock();
        let campaign = campaigns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("campaign {id}")))?;
        campaign.status = CampaignStatus::Published;
        campaign.published_at = Some(published_at);
        campaign.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        let mut campaigns = self.campaigns.lock();
        let campaign = campaigns
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("campaign {id}")))?;
        campaign.status = CampaignStatus::Failed;
        campaign.error_message = Some(error.to_string());
        campaign.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDeliveryLogRepository {
    logs: Mutex<Vec<DeliveryLog>>,
    next_id: AtomicI64,
}

impl InMemoryDeliveryLogRepository {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub fn all(&self) -> Vec<DeliveryLog> {
        self.logs.lock().clone()
    }

    fn update<F: FnOnce(&mut DeliveryLog)>(&self, id: i64, apply: F) -> Result<()> {
        let mut logs = self.logs.lock();
        let log = logs
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("log {id}")))?;
        apply(log);
        Ok(())
    }
}

#[async_trait]
impl DeliveryLogRepository for InMemoryDeliveryLogRepository {
    async fn create_pending(
        &self,
        campaign_id: i64,
        user_id: i64,
        channel: ChannelKind,
    ) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.logs.lock().push(DeliveryLog {
            id,
            campaign_id,
            user_id,
            channel,
            status: DeliveryStatus::Pending,
            error: None,
            sent_at: None,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn mark_sent(&self, id: i64, sent_at: DateTime<Utc>) -> Result<()> {
        self.update(id, |log| {
            log.status = DeliveryStatus::Sent;
            log.sent_at = Some(sent_at);
        })
    }

    async fn mark_failed(&self, id: i64, error: &str) -> Result<()> {
        self.update(id, |log| {
            log.status = DeliveryStatus::Failed;
            log.error = Some(error.to_string());
        })
    }

    async fn mark_skipped(&self, id: i64, error: &str) -> Result<()> {
        self.update(id, |log| {
            log.status = DeliveryStatus::Skipped;
            log.error = Some(error.to_string());
        })
    }

    async fn find_by_campaign(&self, campaign_id: i64) -> Result<Vec<DeliveryLog>> {
        Ok(self
            .logs
            .lock()
            .iter()
            .filter(|l| l.campaign_id == campaign_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryTemplateOverrideRepository {
    overrides: Mutex<Vec<TemplateOverride>>,
}

impl InMemoryTemplateOverrideRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, over: TemplateOverride) {
        self.overrides.lock().push(over);
    }
}

#[async_trait]
impl TemplateOverrideRepository for InMemoryTemplateOverrideRepository {
    async fn find_override(
        &self,
        event_slug: &str,
        channel: ChannelKind,
        locale: &str,
    ) -> Result<Option<TemplateOverride>> {
        let overrides = self.overrides.lock();
        let lookup = |locale: &str| {
            overrides
                .iter()
                .find(|o| {
                    o.event_slug == event_slug
                        && o.channel == channel
                        && o.locale == locale
                        && o.is_active
                })
                .cloned()
        };

        if let Some(found) = lookup(locale) {
            return Ok(Some(found));
        }
        if locale != "en" {
            return Ok(lookup("en"));
        }
        Ok(None)
    }
}
