//! Consumer dispatcher
//!
//! Drives bound queues through a fixed per-delivery state machine:
//! receive, validate, dispatch, then settle as acked or dropped. One
//! message is in flight per queue at a time, so handlers on the same queue
//! never interleave.
//!
//! Failure policy: a message that cannot be decoded or fails its schema is
//! copied to the dead-letter queue and acked, with a structured log record;
//! it never blocks the queue and is never silently lost. Handler failures
//! classified retryable are redelivered with exponential backoff up to a
//! bounded delivery budget, then dead-lettered. A routing key with no
//! registered handler is acked as a no-op, since queues may be bound to a
//! superset of the keys a service handles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::{Envelope, EnvelopeError, EventName};
use crate::registry::SchemaRegistry;

use super::{BrokerError, Delivery, MessageBroker};

/// Why a handler could not process an event.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// A referenced entity has not arrived yet. Usually a transient
    /// ordering condition across queues; worth redelivering.
    #[error("referenced entity not found: {0}")]
    NotFound(String),

    /// The event decoded but can never be applied. Permanent.
    #[error("event cannot be applied: {0}")]
    Rejected(String),

    /// Datastore or downstream-publish fault. Transient.
    #[error("handler infrastructure failure: {0}")]
    Infrastructure(String),
}

impl HandlerError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HandlerError::NotFound(_) | HandlerError::Infrastructure(_)
        )
    }
}

impl From<EnvelopeError> for HandlerError {
    fn from(err: EnvelopeError) -> Self {
        HandlerError::Rejected(err.to_string())
    }
}

/// One event handler, registered in the dispatcher's lookup table under
/// the [`EventName`] it consumes.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Prefix for the dead-letter exchange and queue names.
    pub service_name: String,
    /// Total deliveries a message gets before it is dead-lettered.
    pub max_deliveries: u32,
    /// Per-handler wall-clock budget; expiry counts as retryable.
    pub handler_timeout: Duration,
    /// Base for exponential redelivery backoff.
    pub retry_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            service_name: "ledger".to_string(),
            max_deliveries: 5,
            handler_timeout: Duration::from_secs(30),
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// How one delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Handler succeeded; message acked.
    Handled,
    /// No handler registered for the routing key; acked as a no-op.
    NoHandler,
    /// Copied to the dead-letter queue and acked.
    DeadLettered,
    /// Returned to the queue for another delivery.
    Requeued,
}

pub struct ConsumerDispatcher {
    broker: Arc<dyn MessageBroker>,
    registry: Arc<SchemaRegistry>,
    handlers: HashMap<EventName, Arc<dyn EventHandler>>,
    queues: Vec<String>,
    config: ConsumerConfig,
}

impl ConsumerDispatcher {
    pub fn new(
        broker: Arc<dyn MessageBroker>,
        registry: Arc<SchemaRegistry>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            broker,
            registry,
            handlers: HashMap::new(),
            queues: Vec::new(),
            config,
        }
    }

    /// Register the handler for an event name. Last registration wins.
    pub fn register(&mut self, name: EventName, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(name, handler);
    }

    pub fn dead_letter_exchange(&self) -> String {
        format!("{}.dead-letter", self.config.service_name)
    }

    pub fn dead_letter_queue(&self) -> String {
        format!("{}.dead-letter.queue", self.config.service_name)
    }

    pub fn service_name(&self) -> &str {
        &self.config.service_name
    }

    /// Declare an exchange without binding a queue to it.
    pub async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError> {
        self.broker.declare_exchange(name).await
    }

    /// Declare `queue`, bind it to `exchange` under `pattern` and add it to
    /// the set of consumed queues. Also keeps the dead-letter topology
    /// declared; every declaration is an idempotent no-op on restart.
    pub async fn bind(
        &mut self,
        exchange: &str,
        pattern: &str,
        queue: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_dead_letter().await?;
        self.broker.declare_exchange(exchange).await?;
        self.broker.declare_queue(queue).await?;
        self.broker.bind_queue(queue, exchange, pattern).await?;
        if !self.queues.iter().any(|q| q == queue) {
            self.queues.push(queue.to_string());
        }
        Ok(())
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    async fn ensure_dead_letter(&self) -> Result<(), BrokerError> {
        let exchange = self.dead_letter_exchange();
        let queue = self.dead_letter_queue();
        self.broker.declare_exchange(&exchange).await?;
        self.broker.declare_queue(&queue).await?;
        self.broker.bind_queue(&queue, &exchange, "#").await
    }

    /// Spawn one consumer loop per bound queue.
    pub fn start(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        self.queues
            .iter()
            .cloned()
            .map(|queue| {
                let dispatcher = Arc::clone(&self);
                tokio::spawn(async move {
                    info!(queue = %queue, "consumer loop started");
                    loop {
                        match dispatcher.process_one(&queue).await {
                            Ok(outcome) => {
                                debug!(queue = %queue, ?outcome, "delivery settled");
                            }
                            Err(BrokerError::Closed) => {
                                info!(queue = %queue, "queue closed, consumer loop stopping");
                                break;
                            }
                            Err(err) => {
                                error!(queue = %queue, error = %err, "broker failure in consumer loop");
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                        }
                    }
                })
            })
            .collect()
    }

    /// Receive and settle exactly one delivery from `queue`.
    ///
    /// Waits for a message if the queue is empty. Broken out of the run
    /// loop so tests can step the state machine deterministically.
    pub async fn process_one(&self, queue: &str) -> Result<DispatchOutcome, BrokerError> {
        let delivery = self.broker.receive(queue).await?;

        let envelope = match Envelope::from_bytes(&delivery.body) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    queue = %delivery.queue,
                    routing_key = %delivery.routing_key,
                    error = %err,
                    "malformed envelope"
                );
                return self.dead_letter(&delivery, "malformed envelope").await;
            }
        };

        let document = match serde_json::to_value(&envelope) {
            Ok(document) => document,
            Err(err) => {
                warn!(routing_key = %delivery.routing_key, error = %err, "unencodable envelope");
                return self.dead_letter(&delivery, "unencodable envelope").await;
            }
        };
        if let Err(err) = self
            .registry
            .validate(&document, &envelope.meta.name, envelope.meta.version)
            .await
        {
            warn!(
                queue = %delivery.queue,
                routing_key = %delivery.routing_key,
                event_id = %envelope.meta.id,
                version = envelope.meta.version,
                error = %err,
                "schema validation failed"
            );
            return self.dead_letter(&delivery, "schema validation failed").await;
        }

        let handler = match envelope.event_name().and_then(|name| self.handlers.get(&name)) {
            Some(handler) => handler,
            None => {
                debug!(
                    queue = %delivery.queue,
                    routing_key = %delivery.routing_key,
                    "no handler registered, acked as no-op"
                );
                self.broker.ack(&delivery).await?;
                return Ok(DispatchOutcome::NoHandler);
            }
        };

        match tokio::time::timeout(self.config.handler_timeout, handler.handle(&envelope)).await {
            Ok(Ok(())) => {
                self.broker.ack(&delivery).await?;
                debug!(
                    event_id = %envelope.meta.id,
                    routing_key = %envelope.meta.name,
                    "event handled"
                );
                Ok(DispatchOutcome::Handled)
            }
            Ok(Err(err)) if err.is_retryable() && self.has_budget(&delivery) => {
                self.retry_later(&delivery, &err.to_string()).await
            }
            Ok(Err(err)) => {
                warn!(
                    event_id = %envelope.meta.id,
                    routing_key = %envelope.meta.name,
                    delivery_count = delivery.delivery_count,
                    error = %err,
                    "handler failed, dead-lettering"
                );
                self.dead_letter(&delivery, "handler failed").await
            }
            Err(_elapsed) if self.has_budget(&delivery) => {
                self.retry_later(&delivery, "handler timed out").await
            }
            Err(_elapsed) => {
                warn!(
                    event_id = %envelope.meta.id,
                    routing_key = %envelope.meta.name,
                    delivery_count = delivery.delivery_count,
                    "handler timed out past the retry budget, dead-lettering"
                );
                self.dead_letter(&delivery, "handler timed out").await
            }
        }
    }

    fn has_budget(&self, delivery: &Delivery) -> bool {
        delivery.delivery_count < self.config.max_deliveries
    }

    async fn retry_later(
        &self,
        delivery: &Delivery,
        reason: &str,
    ) -> Result<DispatchOutcome, BrokerError> {
        let exponent = delivery.delivery_count.saturating_sub(1).min(6);
        let backoff = self.config.retry_backoff * 2u32.pow(exponent);
        warn!(
            queue = %delivery.queue,
            routing_key = %delivery.routing_key,
            delivery_count = delivery.delivery_count,
            backoff_ms = backoff.as_millis() as u64,
            reason,
            "redelivering after backoff"
        );
        tokio::time::sleep(backoff).await;
        self.broker.nack_requeue(delivery).await?;
        Ok(DispatchOutcome::Requeued)
    }

    async fn dead_letter(
        &self,
        delivery: &Delivery,
        reason: &str,
    ) -> Result<DispatchOutcome, BrokerError> {
        let exchange = self.dead_letter_exchange();
        match self
            .broker
            .publish(&exchange, &delivery.routing_key, delivery.body.clone(), true)
            .await
        {
            Ok(()) => {
                self.broker.ack(delivery).await?;
                warn!(
                    queue = %delivery.queue,
                    routing_key = %delivery.routing_key,
                    delivery_count = delivery.delivery_count,
                    reason,
                    "message dead-lettered"
                );
                Ok(DispatchOutcome::DeadLettered)
            }
            Err(err) => {
                // Keep the message on its queue rather than lose it.
                error!(
                    queue = %delivery.queue,
                    routing_key = %delivery.routing_key,
                    error = %err,
                    "dead-letter publish failed, requeueing"
                );
                self.broker.nack_requeue(delivery).await?;
                Ok(DispatchOutcome::Requeued)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InProcessBroker;
    use crate::events::payloads::TaskCompleted;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct CountingHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _: &Envelope) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler {
        error: fn() -> HandlerError,
    }

    #[async_trait]
    impl EventHandler for FailingHandler {
        async fn handle(&self, _: &Envelope) -> Result<(), HandlerError> {
            Err((self.error)())
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl EventHandler for SlowHandler {
        async fn handle(&self, _: &Envelope) -> Result<(), HandlerError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(SchemaRegistry::new(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/schemas"
        )))
    }

    fn test_config() -> ConsumerConfig {
        ConsumerConfig {
            service_name: "probe".to_string(),
            max_deliveries: 2,
            handler_timeout: Duration::from_millis(50),
            retry_backoff: Duration::from_millis(1),
        }
    }

    async fn dispatcher_on_queue(
        broker: Arc<InProcessBroker>,
    ) -> ConsumerDispatcher {
        let mut dispatcher = ConsumerDispatcher::new(broker, registry(), test_config());
        dispatcher
            .bind("bussines.events", "Tasks.*", "probe.tasks.queue")
            .await
            .unwrap();
        dispatcher
    }

    async fn publish_completed(broker: &InProcessBroker) -> Envelope {
        let payload = TaskCompleted { guid: Uuid::new_v4() };
        let envelope = Envelope::new(EventName::TaskCompleted, &payload, "tests").unwrap();
        broker
            .publish(
                "bussines.events",
                "Tasks.Completed",
                envelope.to_bytes().unwrap(),
                true,
            )
            .await
            .unwrap();
        envelope
    }

    #[tokio::test]
    async fn test_valid_event_reaches_handler() {
        let broker = Arc::new(InProcessBroker::new());
        let mut dispatcher = dispatcher_on_queue(broker.clone()).await;
        let handler = Arc::new(CountingHandler { calls: AtomicU32::new(0) });
        dispatcher.register(EventName::TaskCompleted, handler.clone());

        publish_completed(&broker).await;
        let outcome = dispatcher.process_one("probe.tasks.queue").await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Handled);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.depth("probe.tasks.queue").await, 0);
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_dead_lettered() {
        let broker = Arc::new(InProcessBroker::new());
        let dispatcher = dispatcher_on_queue(broker.clone()).await;

        broker
            .publish("bussines.events", "Tasks.Completed", b"{}".to_vec(), true)
            .await
            .unwrap();
        let outcome = dispatcher.process_one("probe.tasks.queue").await.unwrap();

        assert_eq!(outcome, DispatchOutcome::DeadLettered);
        assert_eq!(broker.depth("probe.dead-letter.queue").await, 1);
    }

    #[tokio::test]
    async fn test_unpublished_version_is_dead_lettered_before_dispatch() {
        let broker = Arc::new(InProcessBroker::new());
        let mut dispatcher = dispatcher_on_queue(broker.clone()).await;
        let handler = Arc::new(CountingHandler { calls: AtomicU32::new(0) });
        dispatcher.register(EventName::TaskCompleted, handler.clone());

        let payload = TaskCompleted { guid: Uuid::new_v4() };
        let envelope =
            Envelope::with_version(EventName::TaskCompleted, 99, &payload, "tests").unwrap();
        broker
            .publish(
                "bussines.events",
                "Tasks.Completed",
                envelope.to_bytes().unwrap(),
                true,
            )
            .await
            .unwrap();

        let outcome = dispatcher.process_one("probe.tasks.queue").await.unwrap();
        assert_eq!(outcome, DispatchOutcome::DeadLettered);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(broker.depth("probe.dead-letter.queue").await, 1);
    }

    #[tokio::test]
    async fn test_unregistered_event_acks_as_noop() {
        let broker = Arc::new(InProcessBroker::new());
        let dispatcher = dispatcher_on_queue(broker.clone()).await;

        publish_completed(&broker).await;
        let outcome = dispatcher.process_one("probe.tasks.queue").await.unwrap();

        assert_eq!(outcome, DispatchOutcome::NoHandler);
        assert_eq!(broker.depth("probe.tasks.queue").await, 0);
        assert_eq!(broker.depth("probe.dead-letter.queue").await, 0);
    }

    #[tokio::test]
    async fn test_retryable_failure_redelivers_then_dead_letters() {
        let broker = Arc::new(InProcessBroker::new());
        let mut dispatcher = dispatcher_on_queue(broker.clone()).await;
        dispatcher.register(
            EventName::TaskCompleted,
            Arc::new(FailingHandler {
                error: || HandlerError::NotFound("task".into()),
            }),
        );

        publish_completed(&broker).await;

        // First delivery is within the budget of 2, so it requeues.
        let first = dispatcher.process_one("probe.tasks.queue").await.unwrap();
        assert_eq!(first, DispatchOutcome::Requeued);

        // Second delivery exhausts the budget.
        let second = dispatcher.process_one("probe.tasks.queue").await.unwrap();
        assert_eq!(second, DispatchOutcome::DeadLettered);
        assert_eq!(broker.depth("probe.dead-letter.queue").await, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_dead_letters_immediately() {
        let broker = Arc::new(InProcessBroker::new());
        let mut dispatcher = dispatcher_on_queue(broker.clone()).await;
        dispatcher.register(
            EventName::TaskCompleted,
            Arc::new(FailingHandler {
                error: || HandlerError::Rejected("task is already done".into()),
            }),
        );

        publish_completed(&broker).await;
        let outcome = dispatcher.process_one("probe.tasks.queue").await.unwrap();

        assert_eq!(outcome, DispatchOutcome::DeadLettered);
        assert_eq!(broker.depth("probe.dead-letter.queue").await, 1);
    }

    #[tokio::test]
    async fn test_handler_timeout_counts_as_retryable() {
        let broker = Arc::new(InProcessBroker::new());
        let mut dispatcher = dispatcher_on_queue(broker.clone()).await;
        dispatcher.register(EventName::TaskCompleted, Arc::new(SlowHandler));

        publish_completed(&broker).await;
        let outcome = dispatcher.process_one("probe.tasks.queue").await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Requeued);

        let redelivery = broker.receive("probe.tasks.queue").await.unwrap();
        assert_eq!(redelivery.delivery_count, 2);
    }
}
