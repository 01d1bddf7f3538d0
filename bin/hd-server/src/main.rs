//! Herald Notification Server
//!
//! Accepts campaigns over HTTP, fans them out as notification events on the
//! delayed exchange and runs the dispatcher/blast/user consumers that
//! render templates and call the channel adapters.
//!
//! Configuration comes from `herald.toml` (or `HERALD_CONFIG`) with
//! `HERALD_*` environment overrides.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use redis::aio::ConnectionManager;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::{signal, task::JoinHandle};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use hd_broker::{Broker, Consumer, ConsumerSettings, ExchangeSpec, Producer, QueueSpec, Topology};
use hd_campaign::{api::AppState, create_router, CampaignService};
use hd_channel::{
    ChannelAdapter, EmailAdapter, EmailAdapterConfig, InAppAdapter, InAppAdapterConfig,
    PushAdapter, PushAdapterConfig, SmsAdapter, SmsAdapterConfig, WebhookAdapter,
    WebhookAdapterConfig,
};
use hd_config::{AppConfig, ConfigLoader, ConsumerConfig};
use hd_dispatch::{
    BlastHandler, DispatchEngine, DispatcherHandler, RedisIdempotencyStore, UserHandler,
};
use hd_store::PgStore;
use hd_template::Renderer;

mod catalog;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    hd_common::logging::init_logging("hd-server");

    info!("Starting Herald Notification Server");

    let config = ConfigLoader::new().load()?;

    // 1. Database
    let store = Arc::new(
        PgStore::connect(&config.database.url, config.database.max_connections).await?,
    );
    store.ensure_schema().await?;

    // 2. Broker + topology
    let broker = Arc::new(Broker::new(
        &config.broker.url,
        "herald-server",
        config.broker.reconnect_max_retries,
    ));
    broker.connect().await?;

    let exchanges = config.broker.exchanges.clone();
    let topology = Topology::new()
        .exchange(ExchangeSpec::delayed(&exchanges.events))
        .exchange(ExchangeSpec::fanout(&exchanges.blast))
        .exchange(ExchangeSpec::topic(&exchanges.user))
        .queue(QueueSpec::new(
            &config.consumers.dispatcher.queue,
            &exchanges.events,
            vec![exchanges.dispatch_routing_key.clone()],
        ))
        .queue(QueueSpec::new(
            &config.consumers.blast.queue,
            &exchanges.blast,
            vec![],
        ))
        .queue(QueueSpec::new(
            &config.consumers.user.queue,
            &exchanges.user,
            vec![exchanges.user_routing_pattern.clone()],
        ));

    let channel = broker.channel().await?;
    topology.declare(&channel).await?;

    let publish_timeout = Duration::from_secs(config.broker.publish_timeout_secs);
    let events_producer =
        Arc::new(Producer::new(&broker, &exchanges.events, publish_timeout).await?);
    let blast_producer =
        Arc::new(Producer::new(&broker, &exchanges.blast, publish_timeout).await?);
    let user_producer = Arc::new(Producer::new(&broker, &exchanges.user, publish_timeout).await?);

    // 3. Redis (idempotency guard + in-app feed), optional
    let redis_conn = if config.redis.enabled {
        match connect_redis(&config.redis.url).await {
            Ok(conn) => {
                info!(url = %config.redis.url, "Redis connected");
                Some(conn)
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable - idempotency guard and in-app channel disabled");
                None
            }
        }
    } else {
        None
    };

    // 4. Template registry and renderer
    let registry = Arc::new(catalog::build_registry());
    info!(events = ?registry.slugs(), "Event catalog registered");

    let renderer = Arc::new(Renderer::with_overrides(registry.clone(), store.clone()));

    // 5. Channel adapters
    let adapters = build_adapters(&config, redis_conn.clone())?;
    if adapters.is_empty() {
        warn!("No channel adapters enabled - events will be consumed without delivery");
    }

    let engine = Arc::new(
        DispatchEngine::new(adapters)
            .with_renderer(renderer)
            .with_logs(store.clone()),
    );

    let idempotency = redis_conn
        .clone()
        .map(|conn| Arc::new(RedisIdempotencyStore::new(conn, config.redis.idempotency_ttl_secs)));

    // 6. Consumers
    let (shutdown_tx, _) = broadcast::channel(1);
    let mut consumer_tasks: Vec<JoinHandle<()>> = Vec::new();

    if config.consumers.dispatcher.enabled {
        let handler = Arc::new(DispatcherHandler::new(
            blast_producer.clone(),
            user_producer.clone(),
            exchanges.blast_routing_key.clone(),
        ));
        consumer_tasks.push(spawn_consumer(
            broker.clone(),
            &config.consumers.dispatcher,
            topology.clone(),
            handler,
            shutdown_tx.clone(),
        ));
    }

    if config.consumers.blast.enabled {
        let handler = Arc::new(BlastHandler::new(engine.clone()));
        consumer_tasks.push(spawn_consumer(
            broker.clone(),
            &config.consumers.blast,
            topology.clone(),
            handler,
            shutdown_tx.clone(),
        ));
    }

    if config.consumers.user.enabled {
        let mut handler = UserHandler::new(engine.clone());
        if let Some(store) = idempotency.clone() {
            handler = handler.with_idempotency(store);
        }
        consumer_tasks.push(spawn_consumer(
            broker.clone(),
            &config.consumers.user,
            topology.clone(),
            Arc::new(handler),
            shutdown_tx.clone(),
        ));
    }

    // 7. Campaign service + HTTP API
    let service = Arc::new(CampaignService::new(
        registry.clone(),
        store.clone(),
        events_producer.clone(),
        exchanges.dispatch_routing_key.clone(),
    ));

    let app = create_router(AppState {
        service,
        campaigns: store.clone(),
        logs: store.clone(),
    })
    .layer(TraceLayer::new_for_http())
    .layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 8. Drain consumers and close the broker
    info!("Shutdown signal received, stopping consumers");
    let _ = shutdown_tx.send(());
    for task in consumer_tasks {
        let _ = task.await;
    }
    broker.close().await;

    info!("Herald stopped");
    Ok(())
}

async fn connect_redis(url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(url)?;
    Ok(ConnectionManager::new(client).await?)
}

fn build_adapters(
    config: &AppConfig,
    redis_conn: Option<ConnectionManager>,
) -> Result<Vec<Arc<dyn ChannelAdapter>>> {
    let mut adapters: Vec<Arc<dyn ChannelAdapter>> = Vec::new();
    let channels = &config.channels;

    if channels.email.enabled {
        adapters.push(Arc::new(EmailAdapter::new(EmailAdapterConfig {
            smtp_host: channels.email.smtp_host.clone(),
            smtp_port: channels.email.smtp_port,
            username: channels.email.username.clone(),
            password: channels.email.password.clone(),
            from: channels.email.from.clone(),
        })?));
        info!(host = %channels.email.smtp_host, "Email channel enabled");
    }

    if channels.push.enabled {
        adapters.push(Arc::new(PushAdapter::new(PushAdapterConfig {
            endpoint: channels.push.endpoint.clone(),
            api_key: channels.push.api_key.clone(),
            timeout: Duration::from_secs(channels.push.timeout_secs),
        })));
        info!(endpoint = %channels.push.endpoint, "Push channel enabled");
    }

    if channels.sms.enabled {
        adapters.push(Arc::new(SmsAdapter::new(SmsAdapterConfig {
            endpoint: channels.sms.endpoint.clone(),
            api_key: channels.sms.api_key.clone(),
            sender: channels.sms.sender.clone(),
            timeout: Duration::from_secs(10),
        })));
        info!(endpoint = %channels.sms.endpoint, "SMS channel enabled");
    }

    if channels.webhook.enabled {
        adapters.push(Arc::new(WebhookAdapter::new(WebhookAdapterConfig {
            signing_secret: channels.webhook.signing_secret.clone(),
            timeout: Duration::from_secs(channels.webhook.timeout_secs),
        })));
        info!("Webhook channel enabled");
    }

    if channels.in_app.enabled {
        match redis_conn {
            Some(conn) => {
                adapters.push(Arc::new(InAppAdapter::new(
                    conn,
                    InAppAdapterConfig {
                        feed_cap: channels.in_app.feed_cap,
                        retention_secs: channels.in_app.retention_secs,
                    },
                )));
                info!("In-app channel enabled");
            }
            None => {
                warn!("In-app channel enabled but Redis is not available - skipping");
            }
        }
    }

    Ok(adapters)
}

fn spawn_consumer(
    broker: Arc<Broker>,
    config: &ConsumerConfig,
    topology: Topology,
    handler: Arc<dyn hd_broker::MessageHandler>,
    shutdown: broadcast::Sender<()>,
) -> JoinHandle<()> {
    let consumer = Consumer::new(
        broker,
        ConsumerSettings::new(&config.queue, config.prefetch, config.workers),
    )
    .with_topology(topology);

    tokio::spawn(async move {
        if let Err(e) = consumer.run(handler, shutdown).await {
            error!(queue = %consumer.queue(), error = %e, "Consumer exited with error");
        }
    })
}

async fn shutdown_signal() {
    signal::ctrl_c()
        .await
        .expect("failed to install ctrl-c handler");
}
