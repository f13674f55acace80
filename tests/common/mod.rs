//! Common test utilities
//!
//! Assembles the whole service in process: broker, schema registry, the
//! upstream producer, the ledger engine and a fully wired dispatcher.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use uuid::Uuid;

use task_ledger::broker::{ConsumerConfig, ConsumerDispatcher, EventPublisher, InProcessBroker};
use task_ledger::events::payloads::UserCreated;
use task_ledger::events::EventName;
use task_ledger::handlers::{bind_event_routes, register_ledger_handlers};
use task_ledger::ledger::{LedgerEngine, MemoryLedgerStore, Role};
use task_ledger::registry::SchemaRegistry;

pub struct TestHarness {
    pub broker: Arc<InProcessBroker>,
    pub registry: Arc<SchemaRegistry>,
    pub store: Arc<MemoryLedgerStore>,
    pub engine: Arc<LedgerEngine>,
    /// Publishes as the upstream auth and task services would.
    pub upstream: Arc<EventPublisher>,
    pub dispatcher: Arc<ConsumerDispatcher>,
    pub queues: Vec<String>,
}

/// Consumer configuration with short timings so retry paths finish fast.
pub fn fast_config() -> ConsumerConfig {
    ConsumerConfig {
        service_name: "ledger".to_string(),
        max_deliveries: 5,
        handler_timeout: Duration::from_secs(5),
        retry_backoff: Duration::from_millis(10),
    }
}

pub async fn harness() -> TestHarness {
    harness_with_config(fast_config()).await
}

pub async fn harness_with_config(config: ConsumerConfig) -> TestHarness {
    let broker = Arc::new(InProcessBroker::new());
    let registry = Arc::new(SchemaRegistry::new(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/schemas"
    )));
    let upstream = Arc::new(EventPublisher::new(
        broker.clone(),
        registry.clone(),
        "upstream-service",
    ));
    let store = Arc::new(MemoryLedgerStore::new());
    let publisher = Arc::new(EventPublisher::new(
        broker.clone(),
        registry.clone(),
        "ledger",
    ));
    let engine = Arc::new(LedgerEngine::with_rng(
        store.clone(),
        publisher,
        StdRng::seed_from_u64(42),
    ));

    let mut dispatcher = ConsumerDispatcher::new(broker.clone(), registry.clone(), config);
    register_ledger_handlers(&mut dispatcher, &engine);
    bind_event_routes(&mut dispatcher)
        .await
        .expect("topology declaration failed");
    let dispatcher = Arc::new(dispatcher);
    let queues = dispatcher.queues().to_vec();

    TestHarness {
        broker,
        registry,
        store,
        engine,
        upstream,
        dispatcher,
        queues,
    }
}

impl TestHarness {
    /// Start the consumer loops.
    pub fn start(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.dispatcher.clone().start()
    }

    /// Publish `Users.Created` for a fresh user and return its guid.
    pub async fn publish_user(&self, username: &str, role: Role) -> Uuid {
        let guid = Uuid::new_v4();
        self.upstream
            .publish(
                EventName::UserCreated,
                &UserCreated {
                    guid,
                    username: username.to_string(),
                    full_name: None,
                    role,
                },
            )
            .await
            .expect("publish user");
        guid
    }

    /// Wait for every consumed queue to empty, plus a beat for in-flight
    /// deliveries. Only reliable when no redelivery backoff is pending;
    /// retry-heavy tests should use [`wait_until`] on the end state.
    pub async fn drain(&self) {
        for _ in 0..1000 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let mut depth = 0;
            for queue in &self.queues {
                depth += self.broker.depth(queue).await;
            }
            if depth == 0 {
                tokio::time::sleep(Duration::from_millis(30)).await;
                return;
            }
        }
        panic!("queues did not drain");
    }
}

/// Poll `check` until it holds or the test times out.
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..1000 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
