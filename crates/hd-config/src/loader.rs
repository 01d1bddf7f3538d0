//! Configuration loader with file and environment variable support

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "herald.toml",
    "./config/config.toml",
    "./config/herald.toml",
    "/etc/herald/config.toml",
];

/// Configuration loader
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Create a loader with a specific config file path
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable overrides
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "Loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);

        Ok(config)
    }

    /// Find the configuration file to use
    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("HERALD_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, config: &mut AppConfig) {
        // HTTP
        if let Ok(val) = env::var("HERALD_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http.port = port;
            }
        }
        if let Ok(val) = env::var("HERALD_HTTP_HOST") {
            config.http.host = val;
        }
        if let Ok(val) = env::var("HERALD_CORS_ORIGINS") {
            config.http.cors_origins = val.split(',').map(|s| s.trim().to_string()).collect();
        }

        // Database
        if let Ok(val) = env::var("HERALD_DATABASE_URL") {
            config.database.url = val;
        }
        if let Ok(val) = env::var("HERALD_DATABASE_MAX_CONNECTIONS") {
            if let Ok(n) = val.parse() {
                config.database.max_connections = n;
            }
        }

        // Broker
        if let Ok(val) = env::var("HERALD_BROKER_URL") {
            config.broker.url = val;
        }
        if let Ok(val) = env::var("HERALD_BROKER_PUBLISH_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.broker.publish_timeout_secs = secs;
            }
        }
        if let Ok(val) = env::var("HERALD_EXCHANGE_EVENTS") {
            config.broker.exchanges.events = val;
        }
        if let Ok(val) = env::var("HERALD_EXCHANGE_BLAST") {
            config.broker.exchanges.blast = val;
        }
        if let Ok(val) = env::var("HERALD_EXCHANGE_USER") {
            config.broker.exchanges.user = val;
        }

        // Consumers
        if let Ok(val) = env::var("HERALD_DISPATCHER_WORKERS") {
            if let Ok(n) = val.parse() {
                config.consumers.dispatcher.workers = n;
            }
        }
        if let Ok(val) = env::var("HERALD_BLAST_WORKERS") {
            if let Ok(n) = val.parse() {
                config.consumers.blast.workers = n;
            }
        }
        if let Ok(val) = env::var("HERALD_USER_WORKERS") {
            if let Ok(n) = val.parse() {
                config.consumers.user.workers = n;
            }
        }
        if let Ok(val) = env::var("HERALD_PREFETCH") {
            if let Ok(n) = val.parse::<u16>() {
                config.consumers.dispatcher.prefetch = n;
                config.consumers.blast.prefetch = n;
                config.consumers.user.prefetch = n;
            }
        }

        // Redis
        if let Ok(val) = env::var("HERALD_REDIS_ENABLED") {
            config.redis.enabled = val.parse().unwrap_or(false);
        }
        if let Ok(val) = env::var("HERALD_REDIS_URL") {
            config.redis.url = val;
        }
        if let Ok(val) = env::var("HERALD_IDEMPOTENCY_TTL_SECS") {
            if let Ok(ttl) = val.parse() {
                config.redis.idempotency_ttl_secs = ttl;
            }
        }

        // Channels
        if let Ok(val) = env::var("HERALD_EMAIL_ENABLED") {
            config.channels.email.enabled = val.parse().unwrap_or(false);
        }
        if let Ok(val) = env::var("HERALD_SMTP_HOST") {
            config.channels.email.smtp_host = val;
        }
        if let Ok(val) = env::var("HERALD_SMTP_PORT") {
            if let Ok(port) = val.parse() {
                config.channels.email.smtp_port = port;
            }
        }
        if let Ok(val) = env::var("HERALD_SMTP_USERNAME") {
            config.channels.email.username = val;
        }
        if let Ok(val) = env::var("HERALD_SMTP_PASSWORD") {
            config.channels.email.password = val;
        }
        if let Ok(val) = env::var("HERALD_EMAIL_FROM") {
            config.channels.email.from = val;
        }
        if let Ok(val) = env::var("HERALD_PUSH_ENABLED") {
            config.channels.push.enabled = val.parse().unwrap_or(false);
        }
        if let Ok(val) = env::var("HERALD_PUSH_ENDPOINT") {
            config.channels.push.endpoint = val;
        }
        if let Ok(val) = env::var("HERALD_PUSH_API_KEY") {
            config.channels.push.api_key = val;
        }
        if let Ok(val) = env::var("HERALD_SMS_ENABLED") {
            config.channels.sms.enabled = val.parse().unwrap_or(false);
        }
        if let Ok(val) = env::var("HERALD_SMS_ENDPOINT") {
            config.channels.sms.endpoint = val;
        }
        if let Ok(val) = env::var("HERALD_SMS_API_KEY") {
            config.channels.sms.api_key = val;
        }
        if let Ok(val) = env::var("HERALD_WEBHOOK_ENABLED") {
            config.channels.webhook.enabled = val.parse().unwrap_or(false);
        }
        if let Ok(val) = env::var("HERALD_WEBHOOK_SIGNING_SECRET") {
            config.channels.webhook.signing_secret = val;
        }
        if let Ok(val) = env::var("HERALD_IN_APP_ENABLED") {
            config.channels.in_app.enabled = val.parse().unwrap_or(false);
        }

        // General
        if let Ok(val) = env::var("HERALD_DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
