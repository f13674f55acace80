//! Ledger module
//!
//! User and task projections, the append-only transaction log, assignment
//! and pricing policy, and the engine that applies events and serves the
//! HTTP surface. The [`LedgerStore`] trait splits the engine from its
//! persistence so the event flow can run against the in-memory store in
//! tests and against Postgres in production.

pub mod engine;
pub mod memory;
pub mod model;
pub mod pg;
pub mod policy;
pub mod store;

pub use engine::{LedgerEngine, MyStatistics, PayoutReport};
pub use memory::MemoryLedgerStore;
pub use model::{Payment, PaymentStatus, Role, Task, Transaction, TransactionKind, User};
pub use pg::PgLedgerStore;
pub use store::{LedgerError, LedgerStore};
