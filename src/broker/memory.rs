//! In-process broker
//!
//! Topic-exchange semantics over tokio channels, used by the service when
//! everything runs in one process and by the integration tests. Durability
//! here is process-lifetime only; the `persistent` publish flag is accepted
//! and irrelevant. A real transport binds behind the same trait and owns
//! actual disk durability.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;

use super::topic::TopicPattern;
use super::{BrokerError, Delivery, MessageBroker};

#[derive(Default)]
pub struct InProcessBroker {
    state: RwLock<State>,
}

#[derive(Default)]
struct State {
    exchanges: HashMap<String, Vec<Binding>>,
    queues: HashMap<String, Arc<Queue>>,
}

struct Binding {
    pattern_source: String,
    pattern: TopicPattern,
    queue: String,
}

struct Queue {
    tx: mpsc::UnboundedSender<Delivery>,
    rx: Mutex<mpsc::UnboundedReceiver<Delivery>>,
    depth: AtomicUsize,
}

impl Queue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            depth: AtomicUsize::new(0),
        }
    }

    fn enqueue(&self, delivery: Delivery) {
        self.depth.fetch_add(1, Ordering::SeqCst);
        // The receiver lives as long as the broker; send cannot fail.
        let _ = self.tx.send(delivery);
    }
}

impl InProcessBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently waiting on `queue`. Test and stats helper, not
    /// part of the broker trait.
    pub async fn depth(&self, queue: &str) -> usize {
        let state = self.state.read().await;
        state
            .queues
            .get(queue)
            .map(|q| q.depth.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    async fn queue(&self, name: &str) -> Result<Arc<Queue>, BrokerError> {
        let state = self.state.read().await;
        state
            .queues
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))
    }
}

#[async_trait]
impl MessageBroker for InProcessBroker {
    async fn declare_exchange(&self, name: &str) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        state.exchanges.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn declare_queue(&self, name: &str) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        state
            .queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Queue::new()));
        Ok(())
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        pattern: &str,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.write().await;
        if !state.queues.contains_key(queue) {
            return Err(BrokerError::UnknownQueue(queue.to_string()));
        }
        let bindings = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;
        let exists = bindings
            .iter()
            .any(|b| b.queue == queue && b.pattern_source == pattern);
        if !exists {
            bindings.push(Binding {
                pattern_source: pattern.to_string(),
                pattern: TopicPattern::parse(pattern),
                queue: queue.to_string(),
            });
        }
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Vec<u8>,
        _persistent: bool,
    ) -> Result<(), BrokerError> {
        let state = self.state.read().await;
        let bindings = state
            .exchanges
            .get(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;

        // A queue bound by several matching patterns still gets one copy.
        let mut matched: HashSet<&str> = HashSet::new();
        for binding in bindings {
            if binding.pattern.matches(routing_key) {
                matched.insert(binding.queue.as_str());
            }
        }

        if matched.is_empty() {
            debug!(exchange, routing_key, "message matched no binding, unrouted");
            return Ok(());
        }

        for name in matched {
            if let Some(queue) = state.queues.get(name) {
                queue.enqueue(Delivery {
                    queue: name.to_string(),
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    body: body.clone(),
                    delivery_count: 1,
                });
            }
        }
        Ok(())
    }

    async fn receive(&self, queue: &str) -> Result<Delivery, BrokerError> {
        let queue = self.queue(queue).await?;
        let mut rx = queue.rx.lock().await;
        match rx.recv().await {
            Some(delivery) => {
                queue.depth.fetch_sub(1, Ordering::SeqCst);
                Ok(delivery)
            }
            None => Err(BrokerError::Closed),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        // Nothing to settle in process memory, but the queue must be real.
        self.queue(&delivery.queue).await.map(|_| ())
    }

    async fn nack_requeue(&self, delivery: &Delivery) -> Result<(), BrokerError> {
        let queue = self.queue(&delivery.queue).await?;
        // Redelivery lands at the back of the queue.
        let mut redelivery = delivery.clone();
        redelivery.delivery_count += 1;
        queue.enqueue(redelivery);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn topology() -> InProcessBroker {
        let broker = InProcessBroker::new();
        broker.declare_exchange("tasks.cud.events").await.unwrap();
        broker.declare_queue("ledger.tasks-stream.queue").await.unwrap();
        broker
            .bind_queue("ledger.tasks-stream.queue", "tasks.cud.events", "Tasks.*")
            .await
            .unwrap();
        broker
    }

    #[tokio::test]
    async fn test_publish_routes_to_bound_queue() {
        let broker = topology().await;
        broker
            .publish("tasks.cud.events", "Tasks.Created", b"one".to_vec(), true)
            .await
            .unwrap();

        let delivery = broker.receive("ledger.tasks-stream.queue").await.unwrap();
        assert_eq!(delivery.routing_key, "Tasks.Created");
        assert_eq!(delivery.body, b"one");
        assert_eq!(delivery.delivery_count, 1);
        broker.ack(&delivery).await.unwrap();
        assert_eq!(broker.depth("ledger.tasks-stream.queue").await, 0);
    }

    #[tokio::test]
    async fn test_unmatched_routing_key_is_unrouted() {
        let broker = topology().await;
        broker
            .publish("tasks.cud.events", "Users.Created", b"stray".to_vec(), true)
            .await
            .unwrap();
        assert_eq!(broker.depth("ledger.tasks-stream.queue").await, 0);
    }

    #[tokio::test]
    async fn test_publish_to_unknown_exchange_fails() {
        let broker = topology().await;
        let err = broker
            .publish("nowhere", "Tasks.Created", b"x".to_vec(), true)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::UnknownExchange(_)));
    }

    #[tokio::test]
    async fn test_nack_requeues_with_incremented_count() {
        let broker = topology().await;
        broker
            .publish("tasks.cud.events", "Tasks.Created", b"again".to_vec(), true)
            .await
            .unwrap();

        let first = broker.receive("ledger.tasks-stream.queue").await.unwrap();
        broker.nack_requeue(&first).await.unwrap();

        let second = broker.receive("ledger.tasks-stream.queue").await.unwrap();
        assert_eq!(second.delivery_count, 2);
        assert_eq!(second.body, b"again");
    }

    #[tokio::test]
    async fn test_overlapping_bindings_deliver_once() {
        let broker = topology().await;
        broker
            .bind_queue("ledger.tasks-stream.queue", "tasks.cud.events", "#")
            .await
            .unwrap();
        broker
            .publish("tasks.cud.events", "Tasks.Created", b"one".to_vec(), true)
            .await
            .unwrap();
        assert_eq!(broker.depth("ledger.tasks-stream.queue").await, 1);
    }

    #[tokio::test]
    async fn test_redeclaration_is_a_no_op() {
        let broker = topology().await;
        broker.declare_exchange("tasks.cud.events").await.unwrap();
        broker.declare_queue("ledger.tasks-stream.queue").await.unwrap();
        broker
            .bind_queue("ledger.tasks-stream.queue", "tasks.cud.events", "Tasks.*")
            .await
            .unwrap();

        broker
            .publish("tasks.cud.events", "Tasks.Created", b"one".to_vec(), true)
            .await
            .unwrap();
        assert_eq!(broker.depth("ledger.tasks-stream.queue").await, 1);
    }
}
