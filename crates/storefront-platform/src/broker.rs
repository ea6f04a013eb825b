use std::time::Duration;

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::ServiceConfig;
use crate::error::ConnectionError;

const CONNECT_ATTEMPTS: u32 = 8;
const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(attempt.min(16)))
        .min(BACKOFF_CAP)
}

/// Owns the broker connection for one process. Constructed at startup and
/// handed to the Publisher and Dispatcher explicitly; nothing reaches for
/// it as ambient state.
pub struct BrokerClient {
    url: String,
    exchange: String,
    connection: RwLock<Connection>,
}

impl BrokerClient {
    pub async fn connect(config: &ServiceConfig) -> Result<Self, ConnectionError> {
        let connection = open(&config.amqp_url).await?;
        Ok(Self {
            url: config.amqp_url.clone(),
            exchange: config.exchange.clone(),
            connection: RwLock::new(connection),
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Creates a channel, transparently re-opening the connection with
    /// backoff if the previous one died.
    pub async fn channel(&self) -> Result<Channel, ConnectionError> {
        {
            let connection = self.connection.read().await;
            if connection.status().connected() {
                return Ok(connection.create_channel().await?);
            }
        }

        let mut connection = self.connection.write().await;
        if !connection.status().connected() {
            warn!("broker connection lost, reconnecting");
            *connection = open(&self.url).await?;
        }
        Ok(connection.create_channel().await?)
    }

    /// Idempotent declare of the shared durable topic exchange.
    pub async fn declare_exchange(&self, channel: &Channel) -> Result<(), ConnectionError> {
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    /// Declares the durable queue owned by `service` and binds it to the
    /// exchange with the service's own name as binding key.
    pub async fn declare_service_queue(
        &self,
        channel: &Channel,
        service: &str,
    ) -> Result<(), ConnectionError> {
        self.declare_exchange(channel).await?;
        channel
            .queue_declare(
                service,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                service,
                &self.exchange,
                service,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    pub async fn close(&self) {
        let connection = self.connection.read().await;
        if let Err(err) = connection.close(200, "shutdown").await {
            warn!("broker connection close failed: {err}");
        }
    }
}

async fn open(url: &str) -> Result<Connection, ConnectionError> {
    let mut attempt = 0;
    loop {
        match Connection::connect(url, ConnectionProperties::default()).await {
            Ok(connection) => {
                info!("connected to broker");
                return Ok(connection);
            }
            Err(source) if attempt + 1 >= CONNECT_ATTEMPTS => {
                return Err(ConnectionError::Exhausted {
                    attempts: attempt + 1,
                    source,
                });
            }
            Err(err) => {
                let delay = backoff_delay(attempt);
                warn!("broker connect failed ({err}), retrying in {delay:?}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(500));
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(3), Duration::from_secs(4));
        assert_eq!(backoff_delay(10), BACKOFF_CAP);
        assert_eq!(backoff_delay(u32::MAX), BACKOFF_CAP);
    }
}
