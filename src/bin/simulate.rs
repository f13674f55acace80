//! End-to-end simulation over the in-process broker.
//!
//! Seeds users through the event flow, creates and completes tasks, runs a
//! payout and prints the resulting ledger.
//!
//! Run with: cargo run --bin simulate -- --users 5 --tasks 20

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use task_ledger::broker::{ConsumerConfig, ConsumerDispatcher, EventPublisher, InProcessBroker};
use task_ledger::events::payloads::UserCreated;
use task_ledger::events::EventName;
use task_ledger::handlers::{bind_event_routes, register_ledger_handlers};
use task_ledger::ledger::{LedgerEngine, MemoryLedgerStore, Role};
use task_ledger::registry::SchemaRegistry;

fn arg(args: &[String], name: &str, default: usize) -> usize {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Wait until every consumed queue is empty, then one more beat for
/// in-flight deliveries.
async fn drain(broker: &InProcessBroker, queues: &[String]) {
    for _ in 0..500 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut depth = 0;
        for queue in queues {
            depth += broker.depth(queue).await;
        }
        if depth == 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            return;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let user_count = arg(&args, "--users", 5);
    let task_count = arg(&args, "--tasks", 20);

    println!("Simulation - {} workers, {} tasks", user_count, task_count);

    let broker = Arc::new(InProcessBroker::new());
    let registry = Arc::new(SchemaRegistry::new("schemas"));
    let publisher = Arc::new(EventPublisher::new(
        broker.clone(),
        registry.clone(),
        "simulation",
    ));
    let store = Arc::new(MemoryLedgerStore::new());
    let engine = Arc::new(LedgerEngine::new(store, publisher.clone()));

    let mut dispatcher = ConsumerDispatcher::new(
        broker.clone(),
        registry,
        ConsumerConfig {
            service_name: "simulation".to_string(),
            ..ConsumerConfig::default()
        },
    );
    register_ledger_handlers(&mut dispatcher, &engine);
    bind_event_routes(&mut dispatcher).await?;

    let dispatcher = Arc::new(dispatcher);
    let queues = dispatcher.queues().to_vec();
    let handles = dispatcher.start();

    // Seed one manager and the workers through the real wire path, as the
    // auth service would.
    publisher
        .publish(
            EventName::UserCreated,
            &UserCreated {
                guid: Uuid::new_v4(),
                username: "manager".to_string(),
                full_name: None,
                role: Role::Manager,
            },
        )
        .await?;

    let mut workers = Vec::with_capacity(user_count);
    for i in 0..user_count {
        let guid = Uuid::new_v4();
        workers.push(guid);
        publisher
            .publish(
                EventName::UserCreated,
                &UserCreated {
                    guid,
                    username: format!("worker-{}", i + 1),
                    full_name: None,
                    role: Role::Worker,
                },
            )
            .await?;
    }
    drain(&broker, &queues).await;

    // Create tasks; assignment and pricing are the engine's dice.
    let mut tasks = Vec::with_capacity(task_count);
    for i in 0..task_count {
        let receipt = engine
            .create_task(
                format!("Task {}", i + 1),
                format!("UBER-{}", i + 1),
                None,
            )
            .await?;
        tasks.push(receipt.guid);
    }
    drain(&broker, &queues).await;

    // Complete a random share of them.
    let mut completed = 0;
    {
        let mut rng = rand::thread_rng();
        for guid in &tasks {
            if rng.gen_bool(0.6) {
                engine.complete_task(*guid).await?;
                completed += 1;
            }
        }
    }
    drain(&broker, &queues).await;

    let report = engine.run_payout().await?;

    println!("\n=== Simulation Results ===");
    println!("Tasks created: {}", tasks.len());
    println!("Tasks completed: {}", completed);
    println!(
        "Payout: {} payments, {} total",
        report.settled, report.total_amount
    );
    for (i, guid) in workers.iter().enumerate() {
        let stats = engine.statistics_for(*guid).await?;
        println!(
            "worker-{}: balance {}, {} transactions today",
            i + 1,
            stats.balance,
            stats.transactions.len()
        );
    }
    println!(
        "Management earned today: {}",
        engine.total_earned_today().await?
    );

    for handle in handles {
        handle.abort();
    }
    Ok(())
}
