use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
    BasicPublishOptions, BasicQosOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, ShortString};
use lapin::{BasicProperties, Channel};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broker::{BrokerClient, backoff_delay};
use crate::envelope::Envelope;
use crate::error::ConnectionError;
use crate::handler::HandlerRegistry;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const ATTEMPT_HEADER: &str = "x-attempt";
const REASON_HEADER: &str = "x-reason";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Idle,
    Connected,
    Consuming,
    Draining,
    Closed,
}

/// Outcome of dispatching one delivery. Retries carry the incremented
/// attempt counter that is republished with the message; the broker's
/// boolean redelivered flag is never consulted.
#[derive(Debug, PartialEq, Eq)]
enum Disposition {
    Ack,
    Retry { attempt: u32, reason: String },
    DeadLetter { reason: String },
}

async fn decide(
    registry: &HandlerRegistry,
    max_attempts: u32,
    body: &[u8],
    attempt: u32,
) -> Disposition {
    let envelope = match Envelope::from_bytes(body) {
        Ok(envelope) => envelope,
        // Malformed input can never become valid through redelivery.
        Err(err) => {
            return Disposition::DeadLetter {
                reason: err.to_string(),
            };
        }
    };

    let kind = envelope.kind();
    let Some(handler) = registry.get(kind) else {
        // Recognized kind with no handler is a wiring or versioning error,
        // not a transient one.
        return Disposition::DeadLetter {
            reason: format!("no handler registered for {kind}"),
        };
    };

    match handler.applies(&envelope).await {
        Ok(()) => Disposition::Ack,
        Err(err) if attempt + 1 < max_attempts => Disposition::Retry {
            attempt: attempt + 1,
            reason: err.to_string(),
        },
        Err(err) => Disposition::DeadLetter {
            reason: format!("handler failed after {} attempts: {err}", attempt + 1),
        },
    }
}

/// Consumes the service's own queue and routes each envelope by kind to
/// the handler registered at startup. One message is in flight at a time,
/// so handlers observe queue order, and nothing is acknowledged before its
/// handler returns.
pub struct Dispatcher {
    broker: Arc<BrokerClient>,
    service: String,
    registry: HandlerRegistry,
    max_attempts: u32,
    state: Mutex<DispatcherState>,
}

impl Dispatcher {
    pub fn new(
        broker: Arc<BrokerClient>,
        service: impl Into<String>,
        registry: HandlerRegistry,
    ) -> Self {
        Self {
            broker,
            service: service.into(),
            registry,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            state: Mutex::new(DispatcherState::Idle),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn state(&self) -> DispatcherState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: DispatcherState) {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *state = next;
    }

    /// Consumes until cancelled, reconnecting with backoff whenever the
    /// broker connection or channel fails. Unacknowledged messages are
    /// redelivered by the broker after a reconnect; that is expected and
    /// absorbed by handler idempotence.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut failures = 0u32;
        while !shutdown.is_cancelled() {
            match self.consume(&shutdown).await {
                Ok(()) => break,
                Err(err) => {
                    self.set_state(DispatcherState::Idle);
                    let delay = backoff_delay(failures);
                    warn!(
                        service = %self.service,
                        "consumer loop failed ({err}), reconnecting in {delay:?}"
                    );
                    failures = failures.saturating_add(1);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        self.set_state(DispatcherState::Closed);
        info!(service = %self.service, "dispatcher closed");
    }

    async fn consume(&self, shutdown: &CancellationToken) -> Result<(), ConnectionError> {
        let channel = self.broker.channel().await?;
        // Prefetch of one keeps delivery strictly FIFO per queue.
        channel.basic_qos(1, BasicQosOptions::default()).await?;
        self.broker
            .declare_service_queue(&channel, &self.service)
            .await?;
        self.declare_dead_letter_queue(&channel).await?;
        self.set_state(DispatcherState::Connected);

        let consumer_tag = format!("{}-dispatcher", self.service);
        let mut deliveries = channel
            .basic_consume(
                &self.service,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;
        self.set_state(DispatcherState::Consuming);
        info!(service = %self.service, "consuming");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    self.set_state(DispatcherState::Draining);
                    info!(service = %self.service, "draining before close");
                    let _ = channel
                        .basic_cancel(&consumer_tag, BasicCancelOptions::default())
                        .await;
                    let _ = channel.close(200, "shutdown").await;
                    return Ok(());
                }
                delivery = deliveries.next() => {
                    match delivery {
                        Some(Ok(delivery)) => self.process(&channel, delivery).await?,
                        Some(Err(err)) => return Err(ConnectionError::Channel(err)),
                        None => return Err(ConnectionError::StreamClosed),
                    }
                }
            }
        }
    }

    async fn process(&self, channel: &Channel, delivery: Delivery) -> Result<(), ConnectionError> {
        let attempt = attempt_of(&delivery.properties);
        match decide(&self.registry, self.max_attempts, &delivery.data, attempt).await {
            Disposition::Ack => {
                delivery
                    .ack(BasicAckOptions::default())
                    .await
                    .map_err(ConnectionError::Channel)?;
            }
            Disposition::Retry { attempt, reason } => {
                warn!(service = %self.service, attempt, "handler failed ({reason}), requeueing");
                match self.republish(channel, &delivery.data, attempt).await {
                    Ok(()) => {
                        delivery
                            .ack(BasicAckOptions::default())
                            .await
                            .map_err(ConnectionError::Channel)?;
                    }
                    Err(err) => {
                        // Fall back to a broker-side requeue so the message
                        // is not lost; the attempt counter stays as it was.
                        warn!(
                            service = %self.service,
                            "requeue publish failed ({err}), returning message to the broker"
                        );
                        delivery
                            .nack(BasicNackOptions {
                                requeue: true,
                                ..Default::default()
                            })
                            .await
                            .map_err(ConnectionError::Channel)?;
                    }
                }
            }
            Disposition::DeadLetter { reason } => {
                error!(service = %self.service, "dead-lettering message: {reason}");
                if let Err(err) = self.dead_letter(channel, &delivery.data, &reason).await {
                    error!(
                        service = %self.service,
                        "dead-letter publish failed ({err}), dropping message"
                    );
                }
                delivery
                    .ack(BasicAckOptions::default())
                    .await
                    .map_err(ConnectionError::Channel)?;
            }
        }
        Ok(())
    }

    async fn republish(
        &self,
        channel: &Channel,
        body: &[u8],
        attempt: u32,
    ) -> Result<(), ConnectionError> {
        let mut headers = FieldTable::default();
        headers.insert(
            ShortString::from(ATTEMPT_HEADER),
            AMQPValue::LongUInt(attempt),
        );
        channel
            .basic_publish(
                self.broker.exchange(),
                &self.service,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_headers(headers),
            )
            .await
            .map_err(ConnectionError::Channel)?;
        Ok(())
    }

    fn dead_letter_queue(&self) -> String {
        format!("{}.dead_letter", self.service)
    }

    async fn declare_dead_letter_queue(&self, channel: &Channel) -> Result<(), ConnectionError> {
        let queue = self.dead_letter_queue();
        channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(
                &queue,
                self.broker.exchange(),
                &queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn dead_letter(
        &self,
        channel: &Channel,
        body: &[u8],
        reason: &str,
    ) -> Result<(), ConnectionError> {
        let mut headers = FieldTable::default();
        headers.insert(
            ShortString::from(REASON_HEADER),
            AMQPValue::LongString(reason.to_string().into()),
        );
        channel
            .basic_publish(
                self.broker.exchange(),
                &self.dead_letter_queue(),
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_headers(headers),
            )
            .await
            .map_err(ConnectionError::Channel)?;
        Ok(())
    }
}

fn attempt_of(properties: &BasicProperties) -> u32 {
    let Some(headers) = properties.headers().as_ref() else {
        return 0;
    };
    headers
        .inner()
        .iter()
        .find(|(name, _)| name.as_str() == ATTEMPT_HEADER)
        .map(|(_, value)| match value {
            AMQPValue::LongUInt(n) => *n,
            AMQPValue::LongInt(n) => (*n).max(0) as u32,
            AMQPValue::LongLongInt(n) => (*n).max(0) as u32,
            AMQPValue::ShortUInt(n) => u32::from(*n),
            AMQPValue::ShortShortUInt(n) => u32::from(*n),
            _ => 0,
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use serde_json::json;

    use storefront_core::ProductSnapshot;

    use crate::envelope::{CartChange, EventKind};
    use crate::error::HandlerError;
    use crate::handler::EventHandler;

    struct CountingHandler {
        calls: AtomicU32,
        failures_before_success: u32,
    }

    impl CountingHandler {
        fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                failures_before_success: 0,
            })
        }

        fn failing_first(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                failures_before_success: failures,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn applies(&self, _envelope: &Envelope) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures_before_success {
                return Err(HandlerError::message("storage write failed"));
            }
            Ok(())
        }
    }

    fn cart_envelope() -> Vec<u8> {
        Envelope::AddToCart(CartChange {
            user_id: "u1".to_string(),
            product: ProductSnapshot {
                id: "p1".to_string(),
                name: String::new(),
                desc: String::new(),
                category: String::new(),
                unit: 1,
                price: Decimal::new(300, 0),
                banner: String::new(),
            },
            qty: 2,
        })
        .to_bytes()
        .unwrap()
    }

    fn registry_with(kind: EventKind, handler: Arc<CountingHandler>) -> HandlerRegistry {
        HandlerRegistry::builder().on(kind, handler).build()
    }

    #[tokio::test]
    async fn valid_envelope_is_applied_and_acknowledged() {
        let handler = CountingHandler::succeeding();
        let registry = registry_with(EventKind::AddToCart, handler.clone());

        let disposition = decide(&registry, 3, &cart_envelope(), 0).await;

        assert_eq!(disposition, Disposition::Ack);
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_event_kind_never_reaches_a_handler() {
        let handler = CountingHandler::succeeding();
        let registry = registry_with(EventKind::AddToCart, handler.clone());
        let body = json!({"event": "EMPTY_CART", "data": {"userId": "u1"}}).to_string();

        let disposition = decide(&registry, 3, body.as_bytes(), 0).await;

        assert!(matches!(disposition, Disposition::DeadLetter { .. }));
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn missing_payload_field_is_rejected_before_handler_invocation() {
        let handler = CountingHandler::succeeding();
        let registry = registry_with(EventKind::AddToCart, handler.clone());
        let body = json!({
            "event": "ADD_TO_CART",
            "data": {"product": {"id": "p1", "price": 300}, "qty": 2}
        })
        .to_string();

        let disposition = decide(&registry, 3, body.as_bytes(), 0).await;

        assert!(matches!(disposition, Disposition::DeadLetter { .. }));
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn recognized_kind_without_handler_is_dead_lettered() {
        let handler = CountingHandler::succeeding();
        let registry = registry_with(EventKind::CreateOrder, handler.clone());

        let disposition = decide(&registry, 3, &cart_envelope(), 0).await;

        assert!(matches!(disposition, Disposition::DeadLetter { .. }));
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn handler_failure_requeues_with_incremented_attempt() {
        let handler = CountingHandler::failing_first(u32::MAX);
        let registry = registry_with(EventKind::AddToCart, handler.clone());

        let disposition = decide(&registry, 3, &cart_envelope(), 0).await;
        assert!(matches!(disposition, Disposition::Retry { attempt: 1, .. }));

        let disposition = decide(&registry, 3, &cart_envelope(), 1).await;
        assert!(matches!(disposition, Disposition::Retry { attempt: 2, .. }));
    }

    #[tokio::test]
    async fn destinations_apply_independently() {
        // The same cart mutation fans out to two services; one failing
        // handler must not affect the other's application.
        let customer = CountingHandler::succeeding();
        let shopping = CountingHandler::failing_first(u32::MAX);
        let customer_registry = registry_with(EventKind::AddToCart, customer.clone());
        let shopping_registry = registry_with(EventKind::AddToCart, shopping.clone());
        let body = cart_envelope();

        let customer_disposition = decide(&customer_registry, 3, &body, 0).await;
        let shopping_disposition = decide(&shopping_registry, 3, &body, 0).await;

        assert_eq!(customer_disposition, Disposition::Ack);
        assert!(matches!(shopping_disposition, Disposition::Retry { .. }));
        assert_eq!(customer.calls(), 1);
        assert_eq!(shopping.calls(), 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_dead_letter_the_message() {
        let handler = CountingHandler::failing_first(u32::MAX);
        let registry = registry_with(EventKind::AddToCart, handler.clone());

        let disposition = decide(&registry, 3, &cart_envelope(), 2).await;

        assert!(matches!(disposition, Disposition::DeadLetter { .. }));
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn failure_then_success_applies_exactly_once() {
        let handler = CountingHandler::failing_first(1);
        let registry = registry_with(EventKind::AddToCart, handler.clone());
        let body = cart_envelope();

        let first = decide(&registry, 3, &body, 0).await;
        assert!(matches!(first, Disposition::Retry { attempt: 1, .. }));

        let second = decide(&registry, 3, &body, 1).await;
        assert_eq!(second, Disposition::Ack);
        assert_eq!(handler.calls(), 2);
    }

    #[test]
    fn attempt_header_round_trips() {
        let mut headers = FieldTable::default();
        headers.insert(ShortString::from(ATTEMPT_HEADER), AMQPValue::LongUInt(2));
        let properties = BasicProperties::default().with_headers(headers);
        assert_eq!(attempt_of(&properties), 2);

        assert_eq!(attempt_of(&BasicProperties::default()), 0);
    }
}
