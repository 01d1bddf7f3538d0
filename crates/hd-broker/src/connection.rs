//! Long-lived AMQP connection with automatic reconnect.
//!
//! One [`Broker`] per process. Producers and consumers ask it for channels;
//! when the underlying connection has dropped, the next channel request
//! reconnects with exponential backoff.

use lapin::{Channel, Connection, ConnectionProperties};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{BrokerError, Result};

const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

pub struct Broker {
    url: String,
    connection_name: String,
    /// 0 = retry forever
    max_retries: u32,
    connection: RwLock<Option<Connection>>,
}

impl Broker {
    pub fn new(url: impl Into<String>, connection_name: impl Into<String>, max_retries: u32) -> Self {
        Self {
            url: url.into(),
            connection_name: connection_name.into(),
            max_retries,
            connection: RwLock::new(None),
        }
    }

    /// Establish the initial connection. Fails fast so startup errors
    /// surface immediately.
    pub async fn connect(&self) -> Result<()> {
        let connection = self.open_connection().await?;
        *self.connection.write().await = Some(connection);
        Ok(())
    }

    /// Create a channel, reconnecting first if the connection is gone.
    pub async fn channel(&self) -> Result<Channel> {
        {
            let guard = self.connection.read().await;
            if let Some(connection) = guard.as_ref() {
                if connection.status().connected() {
                    return connection
                        .create_channel()
                        .await
                        .map_err(|e| BrokerError::Connection(format!("create channel: {e}")));
                }
            }
        }

        self.reconnect().await?;

        let guard = self.connection.read().await;
        let connection = guard.as_ref().ok_or(BrokerError::Stopped)?;
        connection
            .create_channel()
            .await
            .map_err(|e| BrokerError::Connection(format!("create channel: {e}")))
    }

    /// Close the connection (shutdown path).
    pub async fn close(&self) {
        if let Some(connection) = self.connection.write().await.take() {
            let _ = connection.close(200, "Shutdown").await;
        }
        info!("Broker connection closed");
    }

    async fn open_connection(&self) -> Result<Connection> {
        info!(url = %self.url, "Connecting to AMQP broker");
        Connection::connect(
            &self.url,
            ConnectionProperties::default().with_connection_name(self.connection_name.as_str().into()),
        )
        .await
        .map_err(|e| BrokerError::Connection(format!("AMQP connection failed: {e}")))
    }

    /// Reconnect with exponential backoff. Holds the write lock so
    /// concurrent callers wait for one reconnect instead of racing.
    async fn reconnect(&self) -> Result<()> {
        let mut guard = self.connection.write().await;

        // Another caller may have reconnected while we waited for the lock.
        if let Some(connection) = guard.as_ref() {
            if connection.status().connected() {
                return Ok(());
            }
        }
        *guard = None;

        let mut attempt: u32 = 0;
        let mut delay = RECONNECT_BASE_DELAY;

        loop {
            attempt += 1;
            match self.open_connection().await {
                Ok(connection) => {
                    info!(attempt = attempt, "Reconnected to AMQP broker");
                    *guard = Some(connection);
                    return Ok(());
                }
                Err(e) => {
                    if self.max_retries > 0 && attempt >= self.max_retries {
                        return Err(BrokerError::Connection(format!(
                            "reconnect gave up after {attempt} attempts: {e}"
                        )));
                    }
                    warn!(
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Broker reconnect failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, RECONNECT_MAX_DELAY);
                }
            }
        }
    }
}
