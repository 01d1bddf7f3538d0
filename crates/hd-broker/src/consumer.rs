//! Worker-pool consumer.
//!
//! One consumer owns one queue. It sets the prefetch (QoS), starts
//! `workers` cooperative tasks over clones of the same delivery stream and
//! acks on a successful handler, nacks-with-requeue on an error. Decode
//! failures are the handler's business: a handler that wants to discard a
//! poison message returns `Ok(())`.
//!
//! When the delivery stream ends (connection loss) the consumer re-acquires
//! a channel from the broker - which reconnects with backoff - and resumes,
//! until shutdown is signalled. Unacked messages are returned to the queue
//! by the broker when the old channel dies.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions},
    types::FieldTable,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{Broker, BrokerError, Result, Topology};

/// Handler invoked once per delivery.
///
/// `Ok(())` acks the message. `Err(_)` nacks it back onto the queue for
/// broker redelivery. Handlers must ack-and-drop poison input (malformed
/// JSON, wrong delivery mode) by returning `Ok(())` - requeueing it would
/// loop forever.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub queue: String,
    pub consumer_tag: String,
    pub prefetch: u16,
    pub workers: usize,
}

impl ConsumerSettings {
    pub fn new(queue: impl Into<String>, prefetch: u16, workers: usize) -> Self {
        let queue = queue.into();
        Self {
            consumer_tag: format!("herald-{}-{}", queue, Uuid::new_v4()),
            queue,
            prefetch,
            workers: workers.max(1),
        }
    }
}

pub struct Consumer {
    broker: Arc<Broker>,
    settings: ConsumerSettings,
    /// Re-asserted at every session start so a reconnect finds its queue.
    topology: Option<Topology>,
}

impl Consumer {
    pub fn new(broker: Arc<Broker>, settings: ConsumerSettings) -> Self {
        Self {
            broker,
            settings,
            topology: None,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn queue(&self) -> &str {
        &self.settings.queue
    }

    /// Consume until shutdown. Reconnects between sessions.
    pub async fn run(
        &self,
        handler: Arc<dyn MessageHandler>,
        shutdown: broadcast::Sender<()>,
    ) -> Result<()> {
        let mut shutdown_rx = shutdown.subscribe();
        loop {
            match self.consume_session(handler.clone(), &mut shutdown_rx).await {
                Ok(SessionEnd::Shutdown) => {
                    info!(queue = %self.settings.queue, "Consumer shut down");
                    return Ok(());
                }
                Ok(SessionEnd::StreamClosed) => {
                    warn!(
                        queue = %self.settings.queue,
                        "Delivery stream closed, re-establishing consumer"
                    );
                }
                Err(e) => {
                    warn!(
                        queue = %self.settings.queue,
                        error = %e,
                        "Consumer session failed, re-establishing"
                    );
                }
            }

            // Don't spin between sessions; the broker's own reconnect
            // backoff kicks in on the next channel() call.
            match shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => return Ok(()),
                _ => {}
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }

    async fn consume_session(
        &self,
        handler: Arc<dyn MessageHandler>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<SessionEnd> {
        let channel = self.broker.channel().await?;

        // Declarations are idempotent; after a reconnect this restores the
        // queue and bindings before consuming.
        if let Some(topology) = &self.topology {
            topology.declare(&channel).await?;
        }

        channel
            .basic_qos(self.settings.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| BrokerError::Consume(format!("set QoS: {e}")))?;

        let consumer = channel
            .basic_consume(
                &self.settings.queue,
                &self.settings.consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| BrokerError::Consume(format!("start consume: {e}")))?;

        info!(
            queue = %self.settings.queue,
            workers = self.settings.workers,
            prefetch = self.settings.prefetch,
            "Consumer started"
        );

        let mut joins = Vec::with_capacity(self.settings.workers);
        for worker_id in 0..self.settings.workers {
            let mut stream = consumer.clone();
            let handler = handler.clone();
            let mut shutdown_rx = shutdown.resubscribe();
            let queue = self.settings.queue.clone();

            joins.push(tokio::spawn(async move {
                loop {
                    let delivery = tokio::select! {
                        _ = shutdown_rx.recv() => {
                            debug!(queue = %queue, worker_id, "Worker stopping on shutdown");
                            return SessionEnd::Shutdown;
                        }
                        next = stream.next() => next,
                    };

                    match delivery {
                        Some(Ok(delivery)) => {
                            match handler.handle(&delivery.data).await {
                                Ok(()) => {
                                    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                                        error!(queue = %queue, error = %e, "ACK failed");
                                    }
                                }
                                Err(e) => {
                                    warn!(
                                        queue = %queue,
                                        worker_id,
                                        error = %e,
                                        "Handler failed, requeueing"
                                    );
                                    metrics::counter!("broker.requeued_total").increment(1);
                                    if let Err(e) = delivery
                                        .nack(BasicNackOptions {
                                            requeue: true,
                                            ..Default::default()
                                        })
                                        .await
                                    {
                                        error!(queue = %queue, error = %e, "NACK failed");
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            error!(queue = %queue, worker_id, error = %e, "Delivery stream error");
                            return SessionEnd::StreamClosed;
                        }
                        None => {
                            debug!(queue = %queue, worker_id, "Delivery stream ended");
                            return SessionEnd::StreamClosed;
                        }
                    }
                }
            }));
        }

        let mut end = SessionEnd::StreamClosed;
        for join in joins {
            match join.await {
                Ok(SessionEnd::Shutdown) => end = SessionEnd::Shutdown,
                Ok(SessionEnd::StreamClosed) => {}
                Err(e) => error!(queue = %self.settings.queue, error = %e, "Worker panicked"),
            }
        }

        let _ = channel.close(200, "session end").await;
        Ok(end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    StreamClosed,
}
