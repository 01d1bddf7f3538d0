//! Channel fan-out engine.
//!
//! Per event: for every registered adapter the event targets, write a
//! `pending` log row, render title/body, inject them into a per-channel
//! copy of the data map and call the adapter.
//!
//! Termination policy: zero targeted channels or at least one success acks
//! the message; only when every targeted channel failed transiently does
//! the engine return the last error, letting the broker redeliver. A
//! broken push provider must not starve email, and at-least-once per
//! channel beats all-or-nothing.

use anyhow::anyhow;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

use hd_channel::{ChannelAdapter, ChannelError};
use hd_common::{NotificationEvent, RENDERED_BODY_KEY, RENDERED_TITLE_KEY};
use hd_store::DeliveryLogRepository;
use hd_template::Renderer;

pub struct DispatchEngine {
    channels: Vec<Arc<dyn ChannelAdapter>>,
    /// Absent renderer skips rendering (raw data goes to the adapter).
    renderer: Option<Arc<Renderer>>,
    /// Absent log repository skips persistence.
    logs: Option<Arc<dyn DeliveryLogRepository>>,
}

impl DispatchEngine {
    pub fn new(channels: Vec<Arc<dyn ChannelAdapter>>) -> Self {
        Self {
            channels,
            renderer: None,
            logs: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_logs(mut self, logs: Arc<dyn DeliveryLogRepository>) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Dispatch one event across its targeted channels.
    pub async fn dispatch(&self, event: &NotificationEvent) -> anyhow::Result<()> {
        let campaign_id = event.campaign_id();
        let user_id = event.user_id_num();

        let mut targeted = 0usize;
        let mut successes = 0usize;
        let mut last_error: Option<ChannelError> = None;

        for channel in &self.channels {
            let kind = channel.name();
            if !event.targets_channel(kind) {
                continue;
            }
            targeted += 1;

            let log_id = self.create_pending_log(campaign_id, user_id, kind).await;

            // Per-channel copy: rendered values for one channel must not
            // leak into the next.
            let mut data = event.data.clone();

            if let Some(renderer) = &self.renderer {
                match renderer
                    .render(&event.event_type, kind, &event.locale, &event.data)
                    .await
                {
                    Ok(content) => {
                        data.insert(RENDERED_TITLE_KEY.to_string(), Value::String(content.title));
                        data.insert(RENDERED_BODY_KEY.to_string(), Value::String(content.body));
                    }
                    Err(e) => {
                        // Render failures are permanent: skip the channel,
                        // never requeue for it.
                        warn!(
                            event_id = %event.event_id,
                            channel = %kind,
                            error = %e,
                            "Render failed, skipping channel"
                        );
                        metrics::counter!("dispatch.skipped_total").increment(1);
                        self.mark_skipped(log_id, &e.to_string()).await;
                        continue;
                    }
                }
            }

            let mut channel_event = event.clone();
            channel_event.data = data;

            match channel.send(&channel_event).await {
                Ok(()) => {
                    debug!(event_id = %event.event_id, channel = %kind, "Channel delivered");
                    metrics::counter!("dispatch.sent_total").increment(1);
                    successes += 1;
                    self.mark_sent(log_id).await;
                }
                Err(e) => {
                    warn!(
                        event_id = %event.event_id,
                        channel = %kind,
                        error = %e,
                        "Channel failed transiently"
                    );
                    metrics::counter!("dispatch.failed_total").increment(1);
                    self.mark_failed(log_id, &e.to_string()).await;
                    last_error = Some(e);
                }
            }
        }

        if successes == 0 {
            if let Some(e) = last_error {
                // Every targeted channel failed transiently - let the
                // broker redeliver.
                metrics::counter!("dispatch.requeued_total").increment(1);
                return Err(anyhow!("all channels failed, last error: {e}"));
            }
        }

        debug!(
            event_id = %event.event_id,
            targeted = targeted,
            successes = successes,
            "Event dispatched"
        );
        Ok(())
    }

    async fn create_pending_log(
        &self,
        campaign_id: i64,
        user_id: i64,
        channel: hd_common::ChannelKind,
    ) -> Option<i64> {
        if campaign_id == 0 {
            return None;
        }
        let logs = self.logs.as_ref()?;
        match logs.create_pending(campaign_id, user_id, channel).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(campaign_id, channel = %channel, error = %e, "Could not create delivery log");
                None
            }
        }
    }

    async fn mark_sent(&self, log_id: Option<i64>) {
        if let (Some(logs), Some(id)) = (self.logs.as_ref(), log_id) {
            if let Err(e) = logs.mark_sent(id, Utc::now()).await {
                error!(log_id = id, error = %e, "Could not mark delivery log sent");
            }
        }
    }

    async fn mark_failed(&self, log_id: Option<i64>, message: &str) {
        if let (Some(logs), Some(id)) = (self.logs.as_ref(), log_id) {
            if let Err(e) = logs.mark_failed(id, message).await {
                error!(log_id = id, error = %e, "Could not mark delivery log failed");
            }
        }
    }

    async fn mark_skipped(&self, log_id: Option<i64>, message: &str) {
        if let (Some(logs), Some(id)) = (self.logs.as_ref(), log_id) {
            if let Err(e) = logs.mark_skipped(id, message).await {
                error!(log_id = id, error = %e, "Could not mark delivery log skipped");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use async_trait::async_trait;
    use hd_common::{ChannelKind, DeliveryMode};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Adapter that plays back a scripted sequence of results.
    pub struct ScriptedAdapter {
        kind: ChannelKind,
        script: Mutex<VecDeque<Result<(), String>>>,
        pub calls: std::sync::atomic::AtomicUsize,
    }

    impl ScriptedAdapter {
        pub fn new(kind: ChannelKind, script: Vec<Result<(), String>>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                script: Mutex::new(script.into()),
                calls: Default::default(),
            })
        }

        pub fn always_ok(kind: ChannelKind) -> Arc<Self> {
            Self::new(kind, vec![])
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChannelAdapter for ScriptedAdapter {
        fn name(&self) -> ChannelKind {
            self.kind
        }

        async fn send(&self, _event: &NotificationEvent) -> Result<(), ChannelError> {
            self.calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            match self.script.lock().pop_front() {
                Some(Ok(())) | None => Ok(()),
                Some(Err(message)) => Err(ChannelError::transient(message)),
            }
        }
    }

    pub fn event(channels: Vec<ChannelKind>, campaign_id: i64) -> NotificationEvent {
        let mut event = NotificationEvent {
            event_id: format!("campaign-{campaign_id}-blast"),
            event_type: "order.shipped".to_string(),
            delivery_mode: DeliveryMode::Blast,
            channels,
            user_id: String::new(),
            locale: "en".to_string(),
            data: serde_json::Map::new(),
            meta: Default::default(),
        };
        if campaign_id > 0 {
            event.meta.insert(
                hd_common::META_CAMPAIGN_ID.to_string(),
                campaign_id.to_string(),
            );
        }
        event
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use hd_common::{ChannelKind, DeliveryStatus};
    use hd_store::mock::InMemoryDeliveryLogRepository;
    use hd_template::{EventTemplate, TemplateRegistry};

    fn renderer() -> Arc<Renderer> {
        let registry = TemplateRegistry::new();
        registry.register(
            EventTemplate::builder("order.shipped")
                .content(ChannelKind::Email, "en", "Shipped", "Order on its way")
                .content(ChannelKind::Push, "en", "Shipped", "Order on its way")
                .build(),
        );
        Arc::new(Renderer::new(Arc::new(registry)))
    }

    #[tokio::test]
    async fn partial_success_acks_and_logs_both_outcomes() {
        let email = ScriptedAdapter::new(ChannelKind::Email, vec![Err("smtp down".to_string())]);
        let push = ScriptedAdapter::always_ok(ChannelKind::Push);
        let logs = Arc::new(InMemoryDeliveryLogRepository::new());

        let engine = DispatchEngine::new(vec![email.clone(), push.clone()])
            .with_renderer(renderer())
            .with_logs(logs.clone());

        let event = event(vec![ChannelKind::Email, ChannelKind::Push], 7);
        engine.dispatch(&event).await.unwrap();

        let rows = logs.all();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].channel, ChannelKind::Email);
        assert_eq!(rows[0].status, DeliveryStatus::Failed);
        assert_eq!(rows[1].channel, ChannelKind::Push);
        assert_eq!(rows[1].status, DeliveryStatus::Sent);
        assert!(rows[1].sent_at.is_some());
    }

    #[tokio::test]
    async fn all_transient_failures_requeue() {
        let email = ScriptedAdapter::new(ChannelKind::Email, vec![Err("smtp down".to_string())]);
        let push = ScriptedAdapter::new(ChannelKind::Push, vec![Err("fcm 503".to_string())]);
        let logs = Arc::new(InMemoryDeliveryLogRepository::new());

        let engine = DispatchEngine::new(vec![email, push])
            .with_renderer(renderer())
            .with_logs(logs.clone());

        let event = event(vec![ChannelKind::Email, ChannelKind::Push], 7);
        let err = engine.dispatch(&event).await.unwrap_err();
        assert!(err.to_string().contains("fcm 503"));

        // redelivery with both healthy succeeds and logs sent rows
        engine.dispatch(&event).await.unwrap();
        let rows = logs.all();
        assert_eq!(rows.len(), 4);
        assert!(rows[2..].iter().all(|r| r.status == DeliveryStatus::Sent));
    }

    #[tokio::test]
    async fn zero_targeted_channels_is_a_success() {
        let email = ScriptedAdapter::always_ok(ChannelKind::Email);
        let engine = DispatchEngine::new(vec![email.clone()]).with_renderer(renderer());

        // event only targets sms, which has no registered adapter
        let event = event(vec![ChannelKind::Sms], 7);
        engine.dispatch(&event).await.unwrap();
        assert_eq!(email.call_count(), 0);
    }

    #[tokio::test]
    async fn render_error_skips_channel_but_others_proceed() {
        let registry = TemplateRegistry::new();
        registry.register(
            EventTemplate::builder("order.shipped")
                // malformed email template, healthy push template
                .content(ChannelKind::Email, "en", "Hi {{.name", "")
                .content(ChannelKind::Push, "en", "Shipped", "On its way")
                .build(),
        );
        let renderer = Arc::new(Renderer::new(Arc::new(registry)));

        let email = ScriptedAdapter::always_ok(ChannelKind::Email);
        let push = ScriptedAdapter::always_ok(ChannelKind::Push);
        let logs = Arc::new(InMemoryDeliveryLogRepository::new());

        let engine = DispatchEngine::new(vec![email.clone(), push.clone()])
            .with_renderer(renderer)
            .with_logs(logs.clone());

        let event = event(vec![ChannelKind::Email, ChannelKind::Push], 7);
        engine.dispatch(&event).await.unwrap();

        // email never reached its adapter
        assert_eq!(email.call_count(), 0);
        assert_eq!(push.call_count(), 1);

        let rows = logs.all();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, DeliveryStatus::Skipped);
        assert_eq!(rows[1].status, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn rendered_content_is_injected_per_channel() {
        use async_trait::async_trait;
        use parking_lot::Mutex;

        struct CapturingAdapter {
            seen: Mutex<Option<NotificationEvent>>,
        }

        #[async_trait]
        impl ChannelAdapter for CapturingAdapter {
            fn name(&self) -> ChannelKind {
                ChannelKind::Email
            }
            async fn send(&self, event: &NotificationEvent) -> Result<(), ChannelError> {
                *self.seen.lock() = Some(event.clone());
                Ok(())
            }
        }

        let capturing = Arc::new(CapturingAdapter {
            seen: Mutex::new(None),
        });
        let engine =
            DispatchEngine::new(vec![capturing.clone()]).with_renderer(renderer());

        let event = event(vec![ChannelKind::Email], 0);
        engine.dispatch(&event).await.unwrap();

        let seen = capturing.seen.lock().clone().unwrap();
        assert_eq!(
            seen.data.get(RENDERED_TITLE_KEY).and_then(|v| v.as_str()),
            Some("Shipped")
        );
        assert_eq!(
            seen.data.get(RENDERED_BODY_KEY).and_then(|v| v.as_str()),
            Some("Order on its way")
        );
        // original event data stays clean
        assert!(!event.data.contains_key(RENDERED_TITLE_KEY));
    }

    #[tokio::test]
    async fn log_rows_match_targeted_registered_channels() {
        let email = ScriptedAdapter::always_ok(ChannelKind::Email);
        let push = ScriptedAdapter::always_ok(ChannelKind::Push);
        let logs = Arc::new(InMemoryDeliveryLogRepository::new());

        let engine = DispatchEngine::new(vec![email, push])
            .with_renderer(renderer())
            .with_logs(logs.clone());

        // sms is requested but no sms adapter is registered
        let event = event(
            vec![ChannelKind::Email, ChannelKind::Push, ChannelKind::Sms],
            3,
        );
        engine.dispatch(&event).await.unwrap();

        assert_eq!(logs.all().len(), 2);
    }

    #[tokio::test]
    async fn no_campaign_correlation_skips_logging() {
        let email = ScriptedAdapter::always_ok(ChannelKind::Email);
        let logs = Arc::new(InMemoryDeliveryLogRepository::new());

        let engine = DispatchEngine::new(vec![email])
            .with_renderer(renderer())
            .with_logs(logs.clone());

        let event = event(vec![ChannelKind::Email], 0);
        engine.dispatch(&event).await.unwrap();
        assert!(logs.all().is_empty());
    }
}
