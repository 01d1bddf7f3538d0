//! Process-wide registry of event template contracts.
//!
//! Populated once at startup by explicit registration (no global
//! singletons, no init side effects); read-mostly afterwards, so readers
//! share a reader-writer lock and never block each other.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use hd_common::{ChannelKind, DomainError};

/// Default title/body template strings for one (channel, locale).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContent {
    pub title: String,
    pub body: String,
}

impl TemplateContent {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }
}

/// Code-defined template contract for one event slug. Immutable after
/// registration.
#[derive(Debug, Clone)]
pub struct EventTemplate {
    slug: String,
    supported_channels: Vec<ChannelKind>,
    contents: HashMap<(ChannelKind, String), TemplateContent>,
}

impl EventTemplate {
    pub fn builder(slug: impl Into<String>) -> EventTemplateBuilder {
        EventTemplateBuilder {
            slug: slug.into(),
            supported_channels: Vec::new(),
            contents: HashMap::new(),
        }
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn supported_channels(&self) -> &[ChannelKind] {
        &self.supported_channels
    }

    pub fn supports(&self, channel: ChannelKind) -> bool {
        self.supported_channels.contains(&channel)
    }

    /// Default content for a channel, falling back to `"en"` when the
    /// requested locale has none.
    pub fn default_content(&self, channel: ChannelKind, locale: &str) -> Option<&TemplateContent> {
        self.contents
            .get(&(channel, locale.to_string()))
            .or_else(|| {
                if locale != "en" {
                    self.contents.get(&(channel, "en".to_string()))
                } else {
                    None
                }
            })
    }
}

pub struct EventTemplateBuilder {
    slug: String,
    supported_channels: Vec<ChannelKind>,
    contents: HashMap<(ChannelKind, String), TemplateContent>,
}

impl EventTemplateBuilder {
    /// Declare default content for a channel and locale. Declaring content
    /// also marks the channel as supported.
    pub fn content(
        mut self,
        channel: ChannelKind,
        locale: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        if !self.supported_channels.contains(&channel) {
            self.supported_channels.push(channel);
        }
        self.contents
            .insert((channel, locale.into()), TemplateContent::new(title, body));
        self
    }

    /// Mark a channel as supported without default content (its content
    /// must come from an override or remain empty).
    pub fn channel(mut self, channel: ChannelKind) -> Self {
        if !self.supported_channels.contains(&channel) {
            self.supported_channels.push(channel);
        }
        self
    }

    pub fn build(self) -> EventTemplate {
        EventTemplate {
            slug: self.slug,
            supported_channels: self.supported_channels,
            contents: self.contents,
        }
    }
}

/// Thread-safe slug -> template map.
#[derive(Default)]
pub struct TemplateRegistry {
    templates: RwLock<HashMap<String, Arc<EventTemplate>>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template. Registering the same slug twice is a
    /// programming error caught at startup.
    ///
    /// # Panics
    ///
    /// Panics on a duplicate slug.
    pub fn register(&self, template: EventTemplate) {
        let slug = template.slug().to_string();
        let mut templates = self.templates.write();
        if templates.contains_key(&slug) {
            panic!("event template [{slug}] registered twice");
        }
        debug!(slug = %slug, channels = ?template.supported_channels(), "Event template registered");
        templates.insert(slug, Arc::new(template));
    }

    pub fn get(&self, slug: &str) -> Option<Arc<EventTemplate>> {
        self.templates.read().get(slug).cloned()
    }

    pub fn must_get(&self, slug: &str) -> Result<Arc<EventTemplate>, DomainError> {
        self.get(slug)
            .ok_or_else(|| DomainError::event_not_registered(slug))
    }

    /// Registered slugs, for admin/debug surfaces.
    pub fn slugs(&self) -> Vec<String> {
        let mut slugs: Vec<String> = self.templates.read().keys().cloned().collect();
        slugs.sort();
        slugs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hd_common::ErrorKind;

    fn order_shipped() -> EventTemplate {
        EventTemplate::builder("order.shipped")
            .content(
                ChannelKind::Email,
                "en",
                "Order {{order_id}} shipped",
                "Hi {{name}}, your order is on its way.",
            )
            .content(ChannelKind::Push, "en", "Shipped!", "Order {{order_id}} shipped")
            .build()
    }

    #[test]
    fn register_and_lookup() {
        let registry = TemplateRegistry::new();
        registry.register(order_shipped());

        let template = registry.must_get("order.shipped").unwrap();
        assert!(template.supports(ChannelKind::Email));
        assert!(!template.supports(ChannelKind::Sms));
        assert_eq!(registry.slugs(), vec!["order.shipped".to_string()]);
    }

    #[test]
    fn unknown_slug_is_not_registered() {
        let registry = TemplateRegistry::new();
        let err = registry.must_get("promo.flash").unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotRegistered);
        assert_eq!(err.code, "event_not_registered");
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let registry = TemplateRegistry::new();
        registry.register(order_shipped());
        registry.register(order_shipped());
    }

    #[test]
    fn default_content_falls_back_to_en() {
        let template = order_shipped();
        let content = template.default_content(ChannelKind::Email, "id").unwrap();
        assert_eq!(content.title, "Order {{order_id}} shipped");
        assert!(template.default_content(ChannelKind::Sms, "en").is_none());
    }
}
