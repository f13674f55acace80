//! task_ledger Library
//!
//! Event-driven task accounting: schema-validated messaging, user and
//! task projections, an append-only transaction log and periodic payouts.
//! Re-exports modules for integration testing and the service binaries.

pub mod api;
pub mod broker;
pub mod events;
pub mod handlers;
pub mod jobs;
pub mod ledger;
pub mod registry;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use ledger::{LedgerEngine, LedgerError, LedgerStore};
