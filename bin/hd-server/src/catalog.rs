//! Built-in event catalog.
//!
//! Every notification type the platform can send is declared here, at
//! startup, with its supported channels and default content. Persisted
//! template overrides replace these defaults per (event, channel, locale)
//! without a deploy.

use hd_common::ChannelKind;
use hd_template::{EventTemplate, TemplateRegistry};

pub fn build_registry() -> TemplateRegistry {
    let registry = TemplateRegistry::new();

    registry.register(
        EventTemplate::builder("user.registered")
            .content(
                ChannelKind::Email,
                "en",
                "Welcome, {{name}}!",
                "Hi {{name}}, your account is ready. Sign in to get started.",
            )
            .content(
                ChannelKind::Email,
                "id",
                "Selamat datang, {{name}}!",
                "Hai {{name}}, akun Anda sudah siap. Silakan masuk untuk memulai.",
            )
            .content(
                ChannelKind::InApp,
                "en",
                "Welcome aboard",
                "Thanks for joining, {{name}}.",
            )
            .build(),
    );

    registry.register(
        EventTemplate::builder("user.password_reset")
            .content(
                ChannelKind::Email,
                "en",
                "Reset your password",
                "Hi {{name}}, use code {{code}} to reset your password. It expires in {{ttl_minutes}} minutes.",
            )
            .content(
                ChannelKind::Sms,
                "en",
                "Password reset",
                "Your reset code is {{code}}",
            )
            .build(),
    );

    registry.register(
        EventTemplate::builder("order.shipped")
            .content(
                ChannelKind::Email,
                "en",
                "Order {{order_id}} shipped",
                "Hi {{name}}, order {{order_id}} left the warehouse. Track it with {{tracking_code}}.",
            )
            .content(
                ChannelKind::Email,
                "id",
                "Pesanan {{order_id}} dikirim",
                "Hai {{name}}, pesanan {{order_id}} sudah dikirim. Lacak dengan {{tracking_code}}.",
            )
            .content(
                ChannelKind::Push,
                "en",
                "Order shipped",
                "Order {{order_id}} is on its way",
            )
            .content(
                ChannelKind::InApp,
                "en",
                "Order {{order_id}} shipped",
                "Track it with {{tracking_code}}",
            )
            .channel(ChannelKind::Webhook)
            .build(),
    );

    registry.register(
        EventTemplate::builder("system.announcement")
            .content(
                ChannelKind::InApp,
                "en",
                "{{title}}",
                "{{message}}",
            )
            .content(
                ChannelKind::Push,
                "en",
                "{{title}}",
                "{{message}}",
            )
            .channel(ChannelKind::Email)
            .channel(ChannelKind::Webhook)
            .build(),
    );

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_registers_all_events() {
        let registry = build_registry();
        assert_eq!(
            registry.slugs(),
            vec![
                "order.shipped".to_string(),
                "system.announcement".to_string(),
                "user.password_reset".to_string(),
                "user.registered".to_string(),
            ]
        );
    }

    #[test]
    fn order_shipped_supports_webhook_without_default_content() {
        let registry = build_registry();
        let template = registry.get("order.shipped").unwrap();
        assert!(template.supports(ChannelKind::Webhook));
        assert!(template.default_content(ChannelKind::Webhook, "en").is_none());
    }
}
