//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL. When unset the service runs against the
    /// in-memory store, which is enough for local development.
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Service name, used as queue prefix and event producer identity
    pub service_name: String,

    /// Directory holding the published event schemas
    pub schema_root: String,

    /// Total deliveries an event gets before it is dead-lettered
    pub max_deliveries: u32,

    /// Per-handler wall-clock budget
    pub handler_timeout: Duration,

    /// Base for exponential redelivery backoff
    pub retry_backoff: Duration,

    /// Time between payout runs
    pub payout_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL").ok();

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT"))?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let service_name = env::var("SERVICE_NAME").unwrap_or_else(|_| "ledger".to_string());

        let schema_root = env::var("SCHEMA_ROOT").unwrap_or_else(|_| "schemas".to_string());

        let max_deliveries = env::var("MAX_DELIVERIES")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("MAX_DELIVERIES"))?;

        let handler_timeout = env::var("HANDLER_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue("HANDLER_TIMEOUT_SECS"))?;

        let retry_backoff = env::var("RETRY_BACKOFF_MS")
            .unwrap_or_else(|_| "500".to_string())
            .parse()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidValue("RETRY_BACKOFF_MS"))?;

        let payout_interval = env::var("PAYOUT_INTERVAL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue("PAYOUT_INTERVAL_SECS"))?;

        Ok(Self {
            database_url,
            database_max_connections,
            host,
            port,
            environment,
            service_name,
            schema_root,
            max_deliveries,
            handler_timeout,
            retry_backoff,
            payout_interval,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
