use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Topology error: {0}")]
    Topology(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Publish timed out after {0:?}")]
    PublishTimeout(Duration),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Consume error: {0}")]
    Consume(String),

    #[error("Broker is stopped")]
    Stopped,
}
