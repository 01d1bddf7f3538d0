//! Hybrid renderer: code defaults merged with persisted overrides.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::warn;

use hd_common::{ChannelKind, DomainError};
use hd_store::TemplateOverrideRepository;

use crate::engine::render_str;
use crate::registry::TemplateRegistry;

/// Rendered title/body for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub title: String,
    pub body: String,
}

pub struct Renderer {
    registry: Arc<TemplateRegistry>,
    overrides: Option<Arc<dyn TemplateOverrideRepository>>,
}

impl Renderer {
    /// Renderer over code defaults only.
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self {
            registry,
            overrides: None,
        }
    }

    pub fn with_overrides(
        registry: Arc<TemplateRegistry>,
        overrides: Arc<dyn TemplateOverrideRepository>,
    ) -> Self {
        Self {
            registry,
            overrides: Some(overrides),
        }
    }

    /// Render title and body for `(slug, channel, locale)` against `data`.
    ///
    /// An unregistered slug is a programmer error upstream (the campaign
    /// service validates before publishing) and propagates. Template
    /// parse/execution failures are permanent render errors: the caller
    /// skips the channel instead of requeueing.
    pub async fn render(
        &self,
        event_slug: &str,
        channel: ChannelKind,
        locale: &str,
        data: &Map<String, Value>,
    ) -> Result<RenderedContent, DomainError> {
        let template = self.registry.must_get(event_slug)?;

        let locale = if locale.is_empty() { "en" } else { locale };

        let (mut title_source, mut body_source) = template
            .default_content(channel, locale)
            .map(|content| (content.title.clone(), content.body.clone()))
            .unwrap_or_default();

        if let Some(repo) = &self.overrides {
            match repo.find_override(event_slug, channel, locale).await {
                Ok(Some(over)) => {
                    // Empty override fields keep the code default per field.
                    if !over.title_template.is_empty() {
                        title_source = over.title_template;
                    }
                    if !over.body_template.is_empty() {
                        body_source = over.body_template;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    // An unavailable override store must not poison the
                    // channel permanently; fall back to code defaults.
                    warn!(
                        slug = %event_slug,
                        channel = %channel,
                        error = %e,
                        "Override lookup failed, using code defaults"
                    );
                }
            }
        }

        let title = render_str(&title_source, data)
            .map_err(|e| DomainError::render(format!("title template for [{event_slug}/{channel}]: {e}")))?;
        let body = render_str(&body_source, data)
            .map_err(|e| DomainError::render(format!("body template for [{event_slug}/{channel}]: {e}")))?;

        Ok(RenderedContent { title, body })
    }
}
