//! Topology bootstrap - exchanges, queues and bindings.
//!
//! Declared once at startup, before any producer or consumer runs, and
//! re-asserted idempotently after a reconnect. Declarations are always
//! synchronous (`nowait` stays off) so errors surface at bootstrap.

use lapin::{
    options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
    Channel, ExchangeKind,
};
use tracing::info;

use crate::{BrokerError, Result};

/// Exchange flavor. `Delayed` wraps another type behind the
/// `x-delayed-message` plugin; all scheduled notifications land there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeType {
    /// `x-delayed-message` exchange delegating to the given inner type
    Delayed { inner: String },
    Fanout,
    Direct,
    Topic,
}

#[derive(Debug, Clone)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeType,
}

impl ExchangeSpec {
    pub fn delayed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeType::Delayed {
                inner: "direct".to_string(),
            },
        }
    }

    pub fn fanout(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeType::Fanout,
        }
    }

    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeType::Direct,
        }
    }

    pub fn topic(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ExchangeType::Topic,
        }
    }
}

/// A durable queue bound to one exchange.
#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub name: String,
    pub exchange: String,
    pub routing_keys: Vec<String>,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>, exchange: impl Into<String>, routing_keys: Vec<String>) -> Self {
        Self {
            name: name.into(),
            exchange: exchange.into(),
            routing_keys,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    pub exchanges: Vec<ExchangeSpec>,
    pub queues: Vec<QueueSpec>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exchange(mut self, spec: ExchangeSpec) -> Self {
        self.exchanges.push(spec);
        self
    }

    pub fn queue(mut self, spec: QueueSpec) -> Self {
        self.queues.push(spec);
        self
    }

    fn exchange_kind(&self, name: &str) -> Option<&ExchangeType> {
        self.exchanges
            .iter()
            .find(|e| e.name == name)
            .map(|e| &e.kind)
    }

    /// Effective routing keys for a queue binding. Fanout bindings require
    /// an empty routing key, so a fanout consumer that declared none gets
    /// one automatically (otherwise the queue would receive nothing).
    pub fn binding_keys(&self, queue: &QueueSpec) -> Vec<String> {
        if queue.routing_keys.is_empty() {
            if let Some(ExchangeType::Fanout) = self.exchange_kind(&queue.exchange) {
                return vec![String::new()];
            }
        }
        queue.routing_keys.clone()
    }

    /// Declare all exchanges, queues and bindings on the given channel.
    pub async fn declare(&self, channel: &Channel) -> Result<()> {
        for exchange in &self.exchanges {
            let (kind, arguments) = match &exchange.kind {
                ExchangeType::Delayed { inner } => {
                    let mut args = FieldTable::default();
                    args.insert(
                        "x-delayed-type".into(),
                        AMQPValue::LongString(inner.clone().into()),
                    );
                    (ExchangeKind::Custom("x-delayed-message".to_string()), args)
                }
                ExchangeType::Fanout => (ExchangeKind::Fanout, FieldTable::default()),
                ExchangeType::Direct => (ExchangeKind::Direct, FieldTable::default()),
                ExchangeType::Topic => (ExchangeKind::Topic, FieldTable::default()),
            };

            channel
                .exchange_declare(
                    &exchange.name,
                    kind,
                    ExchangeDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    arguments,
                )
                .await
                .map_err(|e| {
                    BrokerError::Topology(format!("declare exchange [{}]: {e}", exchange.name))
                })?;

            info!(exchange = %exchange.name, kind = ?exchange.kind, "Exchange declared");
        }

        for queue in &self.queues {
            channel
                .queue_declare(
                    &queue.name,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| BrokerError::Topology(format!("declare queue [{}]: {e}", queue.name)))?;

            for key in self.binding_keys(queue) {
                channel
                    .queue_bind(
                        &queue.name,
                        &queue.exchange,
                        &key,
                        QueueBindOptions::default(),
                        FieldTable::default(),
                    )
                    .await
                    .map_err(|e| {
                        BrokerError::Topology(format!(
                            "bind queue [{}] to [{}] with key [{}]: {e}",
                            queue.name, queue.exchange, key
                        ))
                    })?;
            }

            info!(
                queue = %queue.name,
                exchange = %queue.exchange,
                keys = ?self.binding_keys(queue),
                "Queue declared and bound"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_topology() -> Topology {
        Topology::new()
            .exchange(ExchangeSpec::delayed("app.events"))
            .exchange(ExchangeSpec::fanout("notification.blast"))
            .exchange(ExchangeSpec::direct("notification.user"))
            .queue(QueueSpec::new(
                "herald.dispatch",
                "app.events",
                vec!["notification.dispatch".to_string()],
            ))
            .queue(QueueSpec::new("herald.blast", "notification.blast", vec![]))
            .queue(QueueSpec::new(
                "herald.user",
                "notification.user",
                vec!["user.*".to_string()],
            ))
    }

    #[test]
    fn fanout_queue_without_keys_gets_empty_binding() {
        let topology = sample_topology();
        let blast = &topology.queues[1];
        assert_eq!(topology.binding_keys(blast), vec![String::new()]);
    }

    #[test]
    fn direct_queue_keeps_declared_keys() {
        let topology = sample_topology();
        let dispatch = &topology.queues[0];
        assert_eq!(
            topology.binding_keys(dispatch),
            vec!["notification.dispatch".to_string()]
        );
    }

    #[test]
    fn non_fanout_queue_without_keys_gets_none() {
        let topology = Topology::new()
            .exchange(ExchangeSpec::direct("notification.user"))
            .queue(QueueSpec::new("herald.user", "notification.user", vec![]));
        assert!(topology.binding_keys(&topology.queues[0]).is_empty());
    }

    #[test]
    fn delayed_exchange_wraps_direct() {
        let spec = ExchangeSpec::delayed("app.events");
        assert_eq!(
            spec.kind,
            ExchangeType::Delayed {
                inner: "direct".to_string()
            }
        );
    }
}
