//! task_ledger - Event-driven task accounting service
//!
//! Consumes user and task events, projects them into a local ledger,
//! charges and rewards assignees, pays out positive balances on a
//! schedule and serves a thin statistics and task API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, Router};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use task_ledger::api;
use task_ledger::api::middleware::identity_middleware;
use task_ledger::broker::{
    ConsumerConfig, ConsumerDispatcher, EventPublisher, InProcessBroker, MessageBroker,
};
use task_ledger::db;
use task_ledger::events::exchanges;
use task_ledger::handlers::{bind_event_routes, register_ledger_handlers};
use task_ledger::jobs::{PayoutScheduler, PayoutSchedulerConfig};
use task_ledger::ledger::{LedgerEngine, LedgerStore, MemoryLedgerStore, PgLedgerStore};
use task_ledger::registry::SchemaRegistry;
use task_ledger::Config;

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "task_ledger=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the application router
fn build_router(engine: Arc<LedgerEngine>) -> Router {
    // Identity resolution applies to every route except the health check.
    let api_router = api::create_router().layer(middleware::from_fn_with_state(
        engine.clone(),
        identity_middleware,
    ));

    Router::new()
        .route("/health", axum::routing::get(health_check))
        .merge(api_router)
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Starting task ledger service");

    let (store, pool): (Arc<dyn LedgerStore>, Option<PgPool>) = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(url)
                .await?;

            if !db::check_schema(&pool).await? {
                tracing::error!("Database schema is not complete. Please run migrations.");
                return Err(anyhow::anyhow!("Database schema incomplete"));
            }
            tracing::info!("Database connected successfully");

            (Arc::new(PgLedgerStore::new(pool.clone())), Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using the in-memory store");
            (Arc::new(MemoryLedgerStore::new()), None)
        }
    };

    // Messaging topology: broker, schema registry, validating publisher.
    let broker = Arc::new(InProcessBroker::new());
    let registry = Arc::new(SchemaRegistry::new(&config.schema_root));
    let publisher = Arc::new(EventPublisher::new(
        broker.clone(),
        registry.clone(),
        config.service_name.clone(),
    ));

    let engine = Arc::new(LedgerEngine::new(store, publisher));

    // Consumer dispatcher with every handler registered and bound.
    let consumer_config = ConsumerConfig {
        service_name: config.service_name.clone(),
        max_deliveries: config.max_deliveries,
        handler_timeout: config.handler_timeout,
        retry_backoff: config.retry_backoff,
    };
    let mut dispatcher = ConsumerDispatcher::new(broker.clone(), registry, consumer_config);
    register_ledger_handlers(&mut dispatcher, &engine);
    bind_event_routes(&mut dispatcher).await?;

    // Exchanges from the v1 protocol stay declared so unmigrated producers
    // keep a valid destination.
    for exchange in exchanges::LEGACY {
        broker.declare_exchange(exchange).await?;
    }

    let consumer_handles = Arc::new(dispatcher).start();
    tracing::info!(
        consumers = consumer_handles.len(),
        "consumer dispatcher started"
    );

    let scheduler = PayoutScheduler::with_config(
        engine.clone(),
        PayoutSchedulerConfig {
            payout_interval: config.payout_interval,
        },
    );
    let scheduler_handle = scheduler.start();

    // Build router and start server
    let app = build_router(engine);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    scheduler_handle.abort();
    for handle in consumer_handles {
        handle.abort();
    }
    if let Some(pool) = pool {
        pool.close().await;
    }
    tracing::info!("Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
