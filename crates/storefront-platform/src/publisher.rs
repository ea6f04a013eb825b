use std::sync::Arc;

use lapin::options::{BasicPublishOptions, ConfirmSelectOptions};
use lapin::{BasicProperties, Channel};
use tokio::sync::RwLock;
use tracing::debug;

use crate::broker::BrokerClient;
use crate::envelope::Envelope;
use crate::error::{ConnectionError, TransportError};

/// Publishes envelopes to the shared exchange with publisher confirms.
/// `publish` succeeds only once the broker has acknowledged durable
/// storage; it never waits for consumer-side application.
pub struct Publisher {
    broker: Arc<BrokerClient>,
    channel: RwLock<Channel>,
}

impl Publisher {
    pub async fn new(broker: Arc<BrokerClient>) -> Result<Self, ConnectionError> {
        let channel = open_channel(&broker).await?;
        Ok(Self {
            broker,
            channel: RwLock::new(channel),
        })
    }

    /// Hands one envelope to the broker for the named destination service.
    /// Cart events need two destinations; callers issue two independent
    /// publishes and handle partial failure themselves.
    pub async fn publish(&self, target: &str, envelope: &Envelope) -> Result<(), TransportError> {
        if target.is_empty() {
            return Err(TransportError::EmptyTarget);
        }
        let payload = envelope.to_bytes()?;
        let channel = self.channel().await?;

        let confirm = channel
            .basic_publish(
                self.broker.exchange(),
                target,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(TransportError::Broker)?
            .await
            .map_err(TransportError::Broker)?;

        if !confirm.is_ack() {
            return Err(TransportError::Unconfirmed);
        }
        debug!(target, event = %envelope.kind(), "published");
        Ok(())
    }

    async fn channel(&self) -> Result<Channel, TransportError> {
        {
            let channel = self.channel.read().await;
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }

        let mut channel = self.channel.write().await;
        if !channel.status().connected() {
            *channel = open_channel(&self.broker).await?;
        }
        Ok(channel.clone())
    }
}

async fn open_channel(broker: &BrokerClient) -> Result<Channel, ConnectionError> {
    let channel = broker.channel().await?;
    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await?;
    broker.declare_exchange(&channel).await?;
    Ok(channel)
}
